//! Call conversion CLI
//!
//! Merges the call logs, fits the classifiers and writes the scored dataset.

use clap::{Parser, Subcommand};
use call_conversion::{Config, Result};

#[derive(Parser)]
#[command(name = "callconv")]
#[command(about = "Call-center conversion likelihood scoring", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init,
    /// Profile the merged inputs against the column treatments
    Profile,
    /// Run the whole pipeline and write the scored dataset
    Run {
        /// Override the random seed
        #[arg(long)]
        seed: Option<u64>,
        /// Override the decision threshold
        #[arg(long)]
        threshold: Option<f64>,
        /// Override the output path
        #[arg(long)]
        output: Option<String>,
        /// Report format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Clone, Debug)]
enum OutputFormat {
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}. Use table or json.", s)),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Init => commands::init(&cli.config),
        Commands::Profile => commands::profile(&config),
        Commands::Run {
            seed,
            threshold,
            output,
            format,
        } => commands::run(config, seed, threshold, output, format),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use call_conversion::data::loader::{merge, write_csv, RawSources};
    use call_conversion::features::cleaning::ColumnPolicy;
    use call_conversion::features::profile::profile as profile_columns;
    use call_conversion::model::ModelDetails;
    use call_conversion::pipeline::{self, ModelStatus, RunReport};
    use call_conversion::ConversionError;

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all("data")?;
        std::fs::create_dir_all("output")?;
        println!("Created data/ and output/ directories");

        println!("\nNext steps:");
        println!("  1. Place the two call logs and both lookups under data/");
        println!("  2. Run 'callconv profile' to review the column treatments");
        println!("  3. Run 'callconv run' to fit, evaluate and score");

        Ok(())
    }

    pub fn profile(config: &Config) -> Result<()> {
        let merged = merge(RawSources::load(config)?, config)?;
        let policy = ColumnPolicy::from_config(&config.cleaning);
        let profiles = profile_columns(&merged, &policy);

        println!("\nMerged table: {} rows x {} columns\n", merged.n_rows(), merged.n_columns());
        println!(
            "{:<24} {:<16} {:>8} {:>8} {:>9}  {}",
            "Column", "Treatment", "Missing", "Blank", "Distinct", "Flags"
        );
        println!("{}", "-".repeat(80));

        let mut review = 0;
        for p in &profiles {
            let treatment = p
                .treatment
                .map(|t| format!("{:?}", t))
                .unwrap_or_else(|| "-".to_string());
            let mut flags = Vec::new();
            if p.looks_constant {
                flags.push("constant");
            }
            if p.looks_sparse {
                flags.push("sparse");
            }
            if p.needs_review() {
                flags.push("REVIEW");
                review += 1;
            }
            println!(
                "{:<24} {:<16} {:>7.1}% {:>8} {:>9}  {}",
                p.name,
                treatment,
                p.missing_fraction * 100.0,
                p.blank_count,
                p.distinct,
                flags.join(", ")
            );
        }

        println!("\n{} column(s) need review", review);
        Ok(())
    }

    pub fn run(
        mut config: Config,
        seed: Option<u64>,
        threshold: Option<f64>,
        output: Option<String>,
        format: OutputFormat,
    ) -> Result<()> {
        if let Some(seed) = seed {
            config.seed = seed;
        }
        if let Some(threshold) = threshold {
            config.scoring.threshold = threshold;
        }
        if let Some(output) = output {
            config.data.output = output;
        }
        config.validate()?;

        log::info!("Loading inputs (seed {})", config.seed);
        let raw = RawSources::load(&config)?;
        let result = pipeline::run(&config, raw)?;
        write_csv(&result.augmented, &config.data.output)?;

        match format {
            OutputFormat::Table => print_report(&result.report),
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&result.report)
                    .map_err(|e| ConversionError::Parse(format!("Failed to serialize report: {}", e)))?;
                println!("{}", json);
            }
        }

        println!("\nScored dataset written to {}", config.data.output);
        Ok(())
    }

    fn print_report(report: &RunReport) {
        let rows = &report.rows;
        println!("\n=== Data ===");
        println!("  Merged rows:        {}", rows.merged);
        println!("  Complete rows:      {}", rows.complete);
        println!("  Labeled rows:       {}", rows.labeled);
        println!(
            "  Train / test:       {} / {} ({} after upsampling)",
            rows.train, rows.test, rows.train_balanced
        );
        println!(
            "  Features:           {} ({} excluded)",
            report.n_features, report.excluded_features
        );

        println!("\n=== Models ===");
        println!(
            "{:<22} {:>9} {:>8} {:>6} {:>6} {:>6} {:>6}",
            "Model", "Accuracy", "AUC", "TP", "TN", "FP", "FN"
        );
        println!("{}", "-".repeat(70));
        for model in &report.models {
            match &model.status {
                ModelStatus::Fitted { evaluation, .. } => {
                    let cm = &evaluation.confusion;
                    println!(
                        "{:<22} {:>8.2}% {:>8} {:>6} {:>6} {:>6} {:>6}",
                        model.kind.to_string(),
                        evaluation.accuracy * 100.0,
                        evaluation
                            .auc
                            .map_or("n/a".to_string(), |a| format!("{:.4}", a)),
                        cm.tp,
                        cm.tn,
                        cm.fp,
                        cm.fn_
                    );
                }
                ModelStatus::Failed { error } => {
                    println!("{:<22} FAILED: {}", model.kind.to_string(), error);
                }
            }
        }

        for model in &report.models {
            let ModelStatus::Fitted {
                top_features,
                details,
                ..
            } = &model.status
            else {
                continue;
            };

            println!("\n--- {} ---", model.kind);
            match details {
                ModelDetails::Logistic {
                    intercept,
                    coefficients,
                    epochs,
                    converged,
                    ..
                } => {
                    println!(
                        "  Intercept {:.4}, {} epochs{}",
                        intercept,
                        epochs,
                        if *converged { "" } else { " (not converged)" }
                    );
                    let mut ranked = coefficients.clone();
                    ranked.sort_by(|a, b| b.coefficient.abs().total_cmp(&a.coefficient.abs()));
                    for c in ranked.iter().take(top_features.len()) {
                        println!(
                            "  {:<32} coef {:>8.4}  odds ratio {:>8.4}",
                            c.feature, c.coefficient, c.odds_ratio
                        );
                    }
                }
                ModelDetails::DecisionTree {
                    chosen_cp,
                    n_leaves,
                    cp_table,
                } => {
                    println!("  Chosen cp {:.5}, {} leaves", chosen_cp, n_leaves);
                    println!("  {:>10} {:>7} {:>10} {:>10}", "cp", "nsplit", "rel error", "xerror");
                    for row in cp_table {
                        println!(
                            "  {:>10.5} {:>7} {:>10.4} {:>10}",
                            row.cp,
                            row.n_splits,
                            row.rel_error,
                            row.xerror.map_or("-".to_string(), |x| format!("{:.4}", x))
                        );
                    }
                    print_importances(top_features);
                }
                ModelDetails::RandomForest {
                    n_trees,
                    max_features,
                    oob_error,
                } => {
                    println!(
                        "  {} trees, {} features per split, OOB error {}",
                        n_trees,
                        max_features,
                        oob_error.map_or("n/a".to_string(), |e| format!("{:.4}", e))
                    );
                    print_importances(top_features);
                }
            }
        }

        println!("\n=== Combined likelihood ({:?}) by segment ===", report.combine);
        println!(
            "{:<16} {:<16} {:>6} {:>7} {:>7} {:>7} {:>7} {:>7} {:>7}",
            "Column", "Level", "N", "Min", "Q1", "Median", "Q3", "Max", "Mean"
        );
        println!("{}", "-".repeat(90));
        for s in &report.segments {
            let b = &s.stats;
            println!(
                "{:<16} {:<16} {:>6} {:>7.3} {:>7.3} {:>7.3} {:>7.3} {:>7.3} {:>7.3}",
                s.column, s.level, b.n, b.min, b.q1, b.median, b.q3, b.max, b.mean
            );
        }
    }

    fn print_importances(features: &[call_conversion::model::FeatureImportance]) {
        for f in features {
            println!("  {:<32} {:>6.2}%", f.feature, f.importance * 100.0);
        }
    }
}
