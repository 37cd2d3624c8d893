use std::path::PathBuf;

use clap::{Parser, Subcommand};

use mattecheck::{RunConfig, Tolerances, compare_all};

#[derive(Parser, Debug)]
#[command(name = "mattecheck", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a scene with kick, then compare the results against the
    /// known-good reference directory.
    Run(RunArgs),
    /// Compare an already-rendered result directory against the reference.
    Compare(CompareArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Scene description file; result/reference directories are derived from
    /// its name (`<first-3-chars>_result` / `_correct`).
    scene: PathBuf,

    /// Plugin build directory, prepended to ARNOLD_PLUGIN_PATH.
    #[arg(long)]
    build_dir: Option<PathBuf>,

    /// Render verbosity passed to kick -v.
    #[arg(long, default_value_t = 1)]
    verbosity: u32,

    /// Render thread count passed to kick -t.
    #[arg(long, default_value_t = 4)]
    threads: u32,

    #[command(flatten)]
    compare: CompareOpts,
}

#[derive(Parser, Debug)]
struct CompareArgs {
    /// Scene description file used only to locate the directories.
    scene: PathBuf,

    #[command(flatten)]
    compare: CompareOpts,
}

#[derive(Parser, Debug)]
struct CompareOpts {
    /// Maximum acceptable coverage RMS error.
    #[arg(long, default_value_t = 0.01)]
    rms_tolerance: f64,

    /// Number of very-different coverage samples at which comparison fails.
    #[arg(long, default_value_t = 4)]
    max_very_different: usize,

    /// Per-sample threshold for plain (non-cryptomatte) image comparison.
    #[arg(long, default_value_t = 0.1)]
    plain_threshold: f32,

    /// Print the comparison summary as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Run(args) => cmd_run(args),
        Command::Compare(args) => cmd_compare(args),
    }
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = RunConfig::for_scene(&args.scene)?
        .with_verbosity(args.verbosity)
        .with_threads(args.threads);
    if let Some(build_dir) = args.build_dir {
        config = config.with_build_dir(build_dir);
    }

    config.prepare()?;
    config.render()?;
    run_comparison(&config, &args.compare)
}

fn cmd_compare(args: CompareArgs) -> anyhow::Result<()> {
    let config = RunConfig::for_scene(&args.scene)?;
    run_comparison(&config, &args.compare)
}

fn run_comparison(config: &RunConfig, opts: &CompareOpts) -> anyhow::Result<()> {
    let tolerances = Tolerances {
        rms: opts.rms_tolerance,
        max_very_different: opts.max_very_different,
    };

    let report = compare_all(config, &tolerances, opts.plain_threshold)?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for file in &report.files {
            if file.skipped {
                eprintln!("skipped {}", file.file);
            } else if let Some(coverage) = &file.coverage {
                eprintln!(
                    "ok {} (coverage rms {:.6}, {} very different)",
                    file.file,
                    coverage.rms(),
                    coverage.very_different
                );
            } else if let Some(plain) = &file.plain {
                eprintln!(
                    "ok {} (mean error {:.6}, max error {:.6})",
                    file.file, plain.mean_error, plain.max_error
                );
            }
        }
        eprintln!("all comparisons passed for {}", config.result_dir.display());
    }
    Ok(())
}
