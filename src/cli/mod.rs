//! Command-line interface for rust_diffex

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rust_diffex")]
#[command(version)]
#[command(about = "Linear model differential expression and gene-level meta-analysis")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Model selection options shared by `analyze` and `select`
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Path to the experimental design JSON file
    #[arg(short, long,
        long_help = "Path to the experimental design JSON file.\n\
            Lists the factors (name, kind, optional levels and baseline flags)\n\
            and, per sample, the level or measurement it has for each factor.")]
    pub design: String,

    /// Factor to include in the model (repeatable; default: all)
    #[arg(short, long, value_name = "NAME",
        long_help = "Factor to include in the model, by name.\n\
            Can be specified multiple times: --factor genotype --factor treatment\n\
            Without this, every factor except the subset factor is included.")]
    pub factor: Vec<String>,

    /// Analysis type (default: chosen from the design)
    #[arg(long = "type", value_name = "TYPE",
        long_help = "Force an analysis type instead of selecting one.\n\
            ONE_SAMPLE_T_TEST, T_TEST, ONE_WAY_ANOVA, TWO_WAY_ANOVA_WITH_INTERACTION,\n\
            TWO_WAY_ANOVA_NO_INTERACTION or GENERIC_LM.\n\
            The requested type is checked against the design.")]
    pub analysis_type: Option<String>,

    /// Factor whose levels define separate analyses
    #[arg(long, value_name = "NAME",
        long_help = "Subset factor. Samples are split by its levels and each part is\n\
            analysed on its own. Levels annotated DE_Exclude are skipped.")]
    pub subset: Option<String>,

    /// Interaction term (format: A:B, repeatable)
    #[arg(long, value_name = "A:B")]
    pub interaction: Vec<String>,

    /// Baseline level (format: factor=level, repeatable)
    #[arg(long, value_name = "FACTOR=LEVEL",
        long_help = "Baseline level for a factor.\n\
            Format: factor=level (e.g., --baseline treatment=untreated)\n\
            Without this, the baseline comes from the level annotations.")]
    pub baseline: Vec<String>,

    /// Never add an interaction term automatically
    #[arg(long)]
    pub no_interactions: bool,

    /// The data are ratios against a common reference
    #[arg(long)]
    pub ratio: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a differential expression analysis
    #[command(
        long_about = "Run a differential expression analysis.\n\n\
            Chooses a linear model from the design (or uses --type), builds the\n\
            design matrix with baseline levels, fits every feature and writes one\n\
            TSV per model term.",
        after_long_help = "\
Examples:
  # Let the design decide
  rust_diffex analyze -e expression.tsv -d design.json -o results/

  # Two factors without interaction, explicit baseline
  rust_diffex analyze -e expression.tsv -d design.json -f genotype -f treatment \\
    --no-interactions --baseline treatment=untreated

  # One analysis per tissue
  rust_diffex analyze -e expression.tsv -d design.json -f treatment --subset tissue"
    )]
    Analyze {
        /// Path to expression matrix (CSV or TSV)
        #[arg(short, long,
            long_help = "Path to expression matrix.\n\
                Format: first column = feature ids, remaining columns = samples.\n\
                Supports both CSV (comma) and TSV (tab) delimiters (auto-detected).")]
        expression: String,

        #[command(flatten)]
        model: ModelArgs,

        /// Probe to gene map (feature, genes separated by '|')
        #[arg(short, long)]
        gene_map: Option<String>,

        /// Scale of the expression values [default: log2]
        #[arg(short, long, default_value = "log2",
            long_help = "Scale of the expression values: log2, linear, count or other.\n\
                Non-log2 data that contain values above 20 are log2-transformed\n\
                before fitting.")]
        scale: String,

        /// Keep only results with corrected p-value at or below this
        #[arg(long)]
        qvalue_threshold: Option<f64>,

        /// Give up on a fit after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Number of threads (0 = auto) [default: 0]
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,

        /// Output directory [default: diffex_results]
        #[arg(short, long, default_value = "diffex_results")]
        output_dir: String,
    },

    /// Combine result sets into a gene-level meta-analysis
    #[command(
        long_about = "Combine result sets from separate analyses into a gene-level\n\
            meta-analysis with Fisher's method. Each result set must be for a\n\
            single factor with two levels.",
        after_long_help = "\
Examples:
  rust_diffex meta -r study1/fact.1.tsv -r study2/fact.3.tsv -g genes.tsv -o meta.tsv"
    )]
    Meta {
        /// Result set TSV written by `analyze` (repeatable)
        #[arg(short, long, required = true)]
        results: Vec<String>,

        /// Probe to gene map (feature, genes separated by '|')
        #[arg(short, long)]
        gene_map: String,

        /// Output file path [default: meta_analysis.tsv]
        #[arg(short, long, default_value = "meta_analysis.tsv")]
        output: String,

        /// Meta q-value threshold for keeping a gene [default: 0.1]
        #[arg(long, default_value = "0.1")]
        qvalue_threshold: f64,
    },

    /// Print the analysis type that would be chosen
    Select {
        #[command(flatten)]
        model: ModelArgs,
    },
}
