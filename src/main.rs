//! rust_diffex command-line interface

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use log::{info, warn, LevelFilter};

use rust_diffex::cli::{Cli, Commands, ModelArgs};
use rust_diffex::design::plan_analysis;
use rust_diffex::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["analyze", "meta", "select", "help"];
    let has_subcommand = first_positional.map_or(false, |a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("rust_diffex {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Analyze {
            expression,
            model,
            gene_map,
            scale,
            qvalue_threshold,
            timeout_secs,
            threads,
            output_dir,
        }) => run_analyze(
            &expression,
            &model,
            gene_map.as_deref(),
            &scale,
            qvalue_threshold,
            timeout_secs,
            threads,
            &output_dir,
        ),
        Some(Commands::Meta {
            results,
            gene_map,
            output,
            qvalue_threshold,
        }) => run_meta(&results, &gene_map, &output, qvalue_threshold),
        Some(Commands::Select { model }) => run_select(&model),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("rust_diffex v{}", VERSION);
    println!("Run `rust_diffex -h` for usage or `rust_diffex --help` for detailed information.");
}

fn print_short_help() {
    println!("rust_diffex v{}", VERSION);
    println!();
    println!("Usage: rust_diffex <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  analyze  Run a differential expression analysis");
    println!("  meta     Combine result sets into a gene-level meta-analysis");
    println!("  select   Print the analysis type that would be chosen");
    println!();
    println!("Run `rust_diffex <COMMAND> -h` for command-specific options.");
}

fn print_long_help() {
    println!("rust_diffex v{}", VERSION);
    println!("Linear model differential expression and gene-level meta-analysis");
    println!();
    println!("Usage: rust_diffex <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  analyze  Run a differential expression analysis");
    println!("             - t-tests, one and two-way ANOVA, generic linear models");
    println!("             - Baselines from annotations or --baseline");
    println!("             - Interaction terms for complete block designs");
    println!("             - Separate analyses per subset level");
    println!("  meta     Combine result sets with Fisher's method per gene");
    println!("  select   Print the analysis type that would be chosen");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h               Print short help");
    println!("      --help       Print detailed help");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  rust_diffex analyze -e expression.tsv -d design.json -o results/");
    println!();
    println!("  rust_diffex analyze -e expression.tsv -d design.json -f genotype -f treatment \\");
    println!("    --interaction genotype:treatment --baseline treatment=untreated");
    println!();
    println!("  rust_diffex meta -r a/fact.1.tsv -r b/fact.4.tsv -g genes.tsv -o meta.tsv");
}

// ---------------------------------------------------------------------------
// Argument resolution
// ---------------------------------------------------------------------------

fn invalid(reason: String) -> DiffexError {
    DiffexError::InvalidInput { reason }
}

fn factor_id(design: &ExperimentalDesign, name: &str) -> Result<FactorId> {
    design
        .factor_by_name(name.trim())
        .map(|f| f.id)
        .ok_or_else(|| invalid(format!("no factor named '{}' in the design", name.trim())))
}

/// Parse `factor=level` into ids
fn parse_baseline(design: &ExperimentalDesign, spec: &str) -> Result<(FactorId, FactorValueId)> {
    let (factor_name, level) = spec
        .split_once('=')
        .ok_or_else(|| invalid(format!("invalid baseline '{}'. Format: factor=level", spec)))?;
    let factor = design
        .factor_by_name(factor_name.trim())
        .ok_or_else(|| invalid(format!("no factor named '{}' in the design", factor_name.trim())))?;
    for &v in &factor.values {
        if design.factor_value(v)?.label() == level.trim() {
            return Ok((factor.id, v));
        }
    }
    Err(invalid(format!(
        "factor '{}' has no level '{}'",
        factor.name,
        level.trim()
    )))
}

fn parse_scale(scale: &str) -> Result<ScaleType> {
    match scale.to_ascii_lowercase().as_str() {
        "log2" => Ok(ScaleType::Log2),
        "linear" => Ok(ScaleType::Linear),
        "count" => Ok(ScaleType::Count),
        "other" => Ok(ScaleType::Other),
        other => Err(invalid(format!(
            "unknown scale '{}'. Use log2, linear, count or other.",
            other
        ))),
    }
}

fn build_config(
    design: &ExperimentalDesign,
    model: &ModelArgs,
    qvalue_threshold: Option<f64>,
) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder().prefer_interactions(!model.no_interactions);
    if let Some(q) = qvalue_threshold {
        builder = builder.qvalue_threshold(q);
    }

    for name in &model.factor {
        builder = builder.factor(factor_id(design, name)?);
    }
    if let Some(subset) = &model.subset {
        builder = builder.subset_factor(factor_id(design, subset)?);
    }
    if let Some(t) = &model.analysis_type {
        builder = builder.analysis_type(t.parse()?);
    }
    for term in &model.interaction {
        let ids = term
            .split(':')
            .map(|name| factor_id(design, name))
            .collect::<Result<Vec<_>>>()?;
        builder = builder.interaction(&ids);
    }
    for spec in &model.baseline {
        let (factor, value) = parse_baseline(design, spec)?;
        builder = builder.baseline(factor, value);
    }
    builder.build(design)
}

/// File name for a result set; subset analyses get the level as prefix
fn result_file_name(design: &ExperimentalDesign, analysis: &Analysis, term: &str) -> Result<String> {
    let term = term.replace(':', "_");
    match analysis.subset {
        Some((_, level)) => {
            let label: String = design
                .factor_value(level)?
                .label()
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
                .collect();
            Ok(format!("{}_{}.tsv", label, term))
        }
        None => Ok(format!("{}.tsv", term)),
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn run_analyze(
    expression_path: &str,
    model: &ModelArgs,
    gene_map_path: Option<&str>,
    scale: &str,
    qvalue_threshold: Option<f64>,
    timeout_secs: Option<u64>,
    threads: usize,
    output_dir: &str,
) -> Result<()> {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }

    info!("Loading design from: {}", model.design);
    let design = read_design(&model.design)?;

    let quantitation = QuantitationType {
        scale: parse_scale(scale)?,
        is_ratio: model.ratio,
        ..QuantitationType::default()
    };
    info!("Loading expression data from: {}", expression_path);
    let matrix = read_expression_matrix(expression_path, quantitation)?;
    info!("  {} features, {} samples", matrix.n_features(), matrix.n_samples());

    let genes = match gene_map_path {
        Some(path) => Some(read_gene_map(path)?),
        None => None,
    };

    let config = build_config(&design, model, qvalue_threshold)?;

    let options = FitOptions {
        timeout: timeout_secs.map(Duration::from_secs),
        ..FitOptions::default()
    };

    let engine = NativeEngine::new();
    let mut analyzer = DifferentialExpressionAnalyzer::new(&engine);
    if let Some(genes) = &genes {
        analyzer = analyzer.with_genes(genes);
    }
    let analyses = analyzer.analyze(&design, &matrix, &config, &options, &CancellationToken::new())?;
    if analyses.is_empty() {
        warn!("No analysis was run for the requested factors");
        return Ok(());
    }

    std::fs::create_dir_all(output_dir)?;
    for analysis in &analyses {
        info!("{} ({})", analysis.description, analysis.formula);
        if !analysis.complete {
            warn!("Analysis did not complete; results are partial");
        }
        for rs in &analysis.result_sets {
            let path = Path::new(output_dir).join(result_file_name(&design, analysis, &rs.term)?);
            write_result_set(&path, rs)?;
            info!("Wrote {}", path.display());
            println!("{}", rs.summary(0.05));
        }
    }

    info!("Done!");
    Ok(())
}

fn run_meta(result_paths: &[String], gene_map_path: &str, output_path: &str, qvalue_threshold: f64) -> Result<()> {
    let mut result_sets = Vec::with_capacity(result_paths.len());
    for path in result_paths {
        info!("Loading result set from: {}", path);
        result_sets.push(read_result_set(path)?);
    }
    let genes = read_gene_map(gene_map_path)?;

    let aggregator = MetaAnalysisAggregator::new().with_qvalue_threshold(qvalue_threshold);
    let meta = match aggregator.aggregate(&result_sets, &genes)? {
        Some(meta) => meta,
        None => return Ok(()),
    };

    info!(
        "{} of {} genes retained from {} result sets",
        meta.results.len(),
        meta.num_genes_analyzed,
        meta.num_result_sets
    );
    write_meta_analysis(output_path, &meta)?;
    info!("Wrote {}", output_path);
    Ok(())
}

fn run_select(model: &ModelArgs) -> Result<()> {
    let design = read_design(&model.design)?;
    let config = build_config(&design, model, None)?;
    let quantitation = QuantitationType {
        is_ratio: model.ratio,
        ..QuantitationType::default()
    };

    match plan_analysis(&design, &[quantitation], &config)? {
        Some(plan) => {
            println!("{}", plan.analysis_type);
            for term in &plan.config.interactions {
                let names: Vec<&str> = term
                    .iter()
                    .filter_map(|f| design.factor(*f).ok().map(|f| f.name.as_str()))
                    .collect();
                println!("  interaction: {}", names.join(":"));
            }
        }
        None => println!("none"),
    }
    Ok(())
}
