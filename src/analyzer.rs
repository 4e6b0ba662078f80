//! End-to-end differential expression runs
//!
//! Planning, design matrix construction, fitting and result assembly for one
//! configuration, repeated per subset level when a subset factor is set.

use crate::config::AnalysisConfig;
use crate::data::{ExperimentalDesign, ExpressionMatrix, FactorId, FactorValueId, ProbeGeneMap, SampleId};
use crate::design::{check_valid_for_lm, plan_analysis, AnalysisPlan, DesignMatrix, DesignMatrixBuilder};
use crate::error::Result;
use crate::fitting::{CancellationToken, FitOptions, FitRequest, FitStatus, FittingEngine, FittingOrchestrator};
use crate::results::{trim_by_qvalue, Analysis, ResultAssembler};

/// Characteristic value marking a subset level as excluded from analysis
pub const EXCLUDE_CHARACTERISTIC: &str = "DE_Exclude";

/// Human-readable summary of the model
pub fn describe(design: &DesignMatrix, subset: Option<(&str, &str)>) -> String {
    let mut description = format!("Linear model with {} factors", design.columns.len());
    if design.intercept_factor.is_some() {
        description.push_str(" with intercept treated as factor");
    }
    if design.has_interactions() {
        description.push_str(" with interaction");
    }
    if let Some((factor, value)) = subset {
        description.push_str(&format!(" Subset of {} = {}", factor, value));
    }
    description
}

/// Runs analyses against a fitting engine
pub struct DifferentialExpressionAnalyzer<'a> {
    engine: &'a dyn FittingEngine,
    genes: Option<&'a ProbeGeneMap>,
}

impl<'a> DifferentialExpressionAnalyzer<'a> {
    pub fn new(engine: &'a dyn FittingEngine) -> Self {
        Self { engine, genes: None }
    }

    /// Probe to gene map used for gene counts in the result sets
    pub fn with_genes(mut self, genes: &'a ProbeGeneMap) -> Self {
        self.genes = Some(genes);
        self
    }

    /// Run the analysis described by `config`
    ///
    /// Returns one [`Analysis`], or one per retained subset level. An empty
    /// vector means no suitable model was found.
    pub fn analyze(
        &self,
        design: &ExperimentalDesign,
        matrix: &ExpressionMatrix,
        config: &AnalysisConfig,
        options: &FitOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Analysis>> {
        match self.analyze_inner(design, matrix, config, options, cancel) {
            Ok(analyses) => Ok(analyses),
            Err(e) => {
                log::error!("Failed analysis: {}", e);
                Err(e)
            }
        }
    }

    fn analyze_inner(
        &self,
        design: &ExperimentalDesign,
        matrix: &ExpressionMatrix,
        config: &AnalysisConfig,
        options: &FitOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Analysis>> {
        let quantitations = [matrix.quantitation().clone()];
        let plan = match plan_analysis(design, &quantitations, config)? {
            Some(plan) => plan,
            None => {
                log::info!("No analysis was run");
                return Ok(Vec::new());
            }
        };

        let subset_factor = match plan.config.subset_factor {
            Some(f) => f,
            None => {
                let analysis = self.run_one(design, matrix, &plan, &design.sample_ids(), None, options, cancel)?;
                return Ok(vec![analysis]);
            }
        };

        let mut analyses = Vec::new();
        for (level, samples) in self.subsets(design, &plan.config, subset_factor)? {
            if cancel.is_cancelled() {
                log::warn!("Cancelled; skipping remaining subsets");
                break;
            }
            let analysis = self.run_one(
                design,
                matrix,
                &plan,
                &samples,
                Some((subset_factor, level)),
                options,
                cancel,
            )?;
            analyses.push(analysis);
        }
        log::info!("Completed {} subset analyses", analyses.len());
        Ok(analyses)
    }

    /// Sample partitions by subset level, without excluded or unusable levels
    fn subsets(
        &self,
        design: &ExperimentalDesign,
        config: &AnalysisConfig,
        subset_factor: FactorId,
    ) -> Result<Vec<(FactorValueId, Vec<SampleId>)>> {
        let all = design.sample_ids();
        let mut partitions = Vec::new();
        for level in design.used_values(subset_factor, &all)? {
            let fv = design.factor_value(level)?;
            if fv
                .characteristics
                .iter()
                .any(|c| c.value.eq_ignore_ascii_case(EXCLUDE_CHARACTERISTIC))
            {
                log::info!("Subset '{}' is marked for exclusion; skipping", fv.label());
                continue;
            }

            let samples = design.samples_with_value(level);
            let mut usable = true;
            for &f in &config.factors {
                if !check_valid_for_lm(design, &samples, f)? {
                    usable = false;
                    break;
                }
            }
            if !usable {
                log::info!(
                    "Subset '{}' ({} samples) cannot be analyzed with these factors; skipping",
                    fv.label(),
                    samples.len()
                );
                continue;
            }
            partitions.push((level, samples));
        }
        Ok(partitions)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_one(
        &self,
        design: &ExperimentalDesign,
        matrix: &ExpressionMatrix,
        plan: &AnalysisPlan,
        samples: &[SampleId],
        subset: Option<(FactorId, FactorValueId)>,
        options: &FitOptions,
        cancel: &CancellationToken,
    ) -> Result<Analysis> {
        let config = &plan.config;
        let design_matrix = DesignMatrixBuilder::new(design)
            .samples(samples)
            .quantitation(matrix.quantitation())
            .build(config)?;
        let data = matrix
            .select_samples(&design_matrix.sample_names())?
            .ensure_log_scale()?;

        let subset_label = match subset {
            Some((f, v)) => Some((design.factor(f)?.name.clone(), design.factor_value(v)?.label())),
            None => None,
        };
        let description = describe(
            &design_matrix,
            subset_label.as_ref().map(|(f, v)| (f.as_str(), v.as_str())),
        );
        log::info!("{}: {}", plan.analysis_type, description);

        let request = FitRequest::new(design_matrix)
            .moderate_statistics(config.moderate_statistics)
            .use_weights(config.use_weights);
        let outcome = FittingOrchestrator::new(self.engine, options.clone()).run(&data, &request, cancel)?;
        if outcome.status == FitStatus::Interrupted {
            log::warn!(
                "Fit was interrupted; {} of {} features have results",
                outcome.received(),
                data.n_features()
            );
        }

        let mut assembler = ResultAssembler::new(&request.design, data.feature_ids());
        if let Some(genes) = self.genes {
            assembler = assembler.genes(genes);
        }
        let mut result_sets = assembler.assemble(&outcome.results)?;

        if let Some(threshold) = config.qvalue_threshold {
            for rs in &mut result_sets {
                trim_by_qvalue(&mut rs.results, threshold);
            }
        }

        Ok(Analysis {
            analysis_type: plan.analysis_type,
            description,
            formula: request.formula.clone(),
            subset,
            result_sets,
            complete: outcome.status == FitStatus::Completed,
        })
    }
}
