//! conjoint CLI - Balanced vignette design generation with a QC gate.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use conjoint::models::{sanitize_slug, StudyMode, EXAMPLE_CONFIG};
use conjoint::output::{dataset_id, design_matrix_csv, write_outputs};
use conjoint::pipeline::resolve_base_seed;
use conjoint::{
    lock_rows, Certificate, CheckpointManager, Config, Orchestrator, Plan, RunFingerprint,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "conjoint")]
#[command(version)]
#[command(about = "Balanced, respondent-unique vignette designs with a statistical quality gate")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, gate and write designs for every respondent
    Generate {
        /// Override the respondent count
        #[arg(short = 'n', long)]
        respondents: Option<usize>,

        /// Override the base seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Override the output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Checkpoint directory for resumable runs
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Show the planner's decision (T, E, absences) without building
    Plan,

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn load_config(path: &Path) -> Result<Config> {
    let config =
        Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn print_plan(plan: &Plan) {
    println!("Mode:         {}", plan.mode);
    println!("Rows (T):     {}", plan.t);
    println!("Exposure (E): {}", plan.e);
    println!("Parameters:   {}", plan.params);
    println!("Capacity:     {}", plan.capacity);
    if plan.mode == StudyMode::Grid {
        println!(
            "Actives/row:  {}..={} (avg {:.2})",
            plan.min_active, plan.max_active, plan.avg_active
        );
        println!("Absence min:  {}", plan.absence_min);
    }
    for c in &plan.categories {
        println!(
            "  {:<16} q={:<3} exposure={:<3} absences={:<3} remainder={}",
            c.name, c.size, c.exposure, c.absences, c.remainder
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            println!("{EXAMPLE_CONFIG}");
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            let layout = config.study.layout()?;

            info!("Configuration is valid");
            info!(
                "  Study: {} ({} mode, {} respondents)",
                config.study.name, config.study.mode, config.study.respondents
            );
            info!(
                "  Layout: {} categories, {} elements",
                layout.len(),
                layout.total_elements()
            );
            info!("  Output: {:?}", config.output_dir());
        }

        Commands::Plan => {
            let config = load_config(&cli.config)?;
            let plan = Plan::from_config(&config).context("Planning failed")?;
            print_plan(&plan);
        }

        Commands::Generate {
            respondents,
            seed,
            output,
            checkpoint,
        } => {
            let mut config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            // CLI overrides
            if let Some(n) = respondents {
                config.study.respondents = n;
            }
            if seed.is_some() {
                config.study.seed = seed;
            }
            if let Some(dir) = output {
                config.output.dir = dir;
            }
            if let Some(dir) = checkpoint {
                config.output.checkpoint_dir = Some(dir);
            }
            config.validate().context("Invalid configuration")?;

            let layout = config.study.layout()?;
            let planned = Plan::from_config(&config).context("Planning failed")?;
            let base_seed = resolve_base_seed(config.study.seed);
            let preflight = lock_rows(
                &layout,
                &planned,
                &config.builder,
                base_seed,
                config.run.on_preflight_failure,
            )
            .context("Preflight failed")?;
            let plan = preflight.plan;

            // Setup checkpoint manager if requested
            let mut checkpoint_mgr = match config.checkpoint_dir() {
                Some(dir) => {
                    let mut mgr = CheckpointManager::new(&dir)
                        .context("Failed to create checkpoint manager")?;
                    let fingerprint = RunFingerprint::new(&plan, &layout, &config, base_seed)?;
                    mgr.init_or_load(fingerprint, config.study.respondents)
                        .context("Failed to initialize checkpoint")?;
                    Some(mgr)
                }
                None => None,
            };

            let orchestrator = Orchestrator::new(&layout, &plan, &config, base_seed);
            let outcome = orchestrator.run(checkpoint_mgr.as_mut())?;
            let stats = &outcome.stats;

            println!("\n=== Generation Complete ===");
            println!("Respondents: {}", stats.total_respondents);
            println!("Accepted:    {}", stats.accepted);
            println!("Resumed:     {}", stats.resumed);
            println!("Failed:      {}", stats.failed);
            println!("Attempts:    {}", stats.total_attempts);
            println!("Build fails: {}", stats.build_failures);
            println!("Gate fails:  {}", stats.gate_rejections);
            println!("Gate pass:   {:.1}%", stats.gate_pass_rate * 100.0);
            println!("Throughput:  {:.0}/hr", stats.throughput_per_hour);
            println!("Runtime:     {:.1}s", stats.runtime_secs);
            println!("Base seed:   {base_seed}");

            if !outcome.is_complete() {
                for err in &outcome.unbuildable {
                    error!("{err}");
                }
                bail!(
                    "{} respondent(s) unbuildable; no outputs written",
                    outcome.unbuildable.len()
                );
            }

            let csv = design_matrix_csv(&outcome.accepted, &layout)?;
            let certificate = Certificate::new(
                &config,
                &plan,
                base_seed,
                dataset_id(&csv),
                &outcome.accepted,
            );
            let paths = write_outputs(
                &config.output_dir(),
                &sanitize_slug(&config.study.name),
                &layout,
                &outcome.accepted,
                &csv,
                &certificate,
            )?;

            println!("Tasks:       {:?}", paths.tasks);
            println!("Matrix:      {:?}", paths.design_matrix);
            println!("Certificate: {:?}", paths.certificate_txt);
            if let Some(worst) = &certificate.worst_kappa {
                println!(
                    "Worst κ:     {:.4} (respondent {})",
                    worst.kappa, worst.respondent
                );
            }
        }
    }

    Ok(())
}
