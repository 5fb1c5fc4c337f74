//! sbk - build songbooks from the command line.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sbk_core::config::{ConfigManager, Settings};
use sbk_core::logging::{init_tracing_with_file, BuildLogger, LogLevel, MessageSink};
use sbk_core::orchestrator::{
    BuildController, BuildSession, BuildState, CommandStepExecutor, ContinueFlag, StepName,
    CLEAN_STEP,
};

/// Exit status for a build stopped by Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

/// sbk - songbook builder
#[derive(Parser)]
#[command(name = "sbk")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = ".config/sbk.toml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a songbook
    Build {
        /// Path to the songbook file (.sb)
        songbook: PathBuf,

        /// Comma separated steps to run (default: from config)
        #[arg(short, long, value_delimiter = ',')]
        steps: Vec<String>,

        /// Extra data directory (repeatable)
        #[arg(short, long = "datadir")]
        datadirs: Vec<PathBuf>,

        /// Directory the steps run in (default: the songbook's directory)
        #[arg(short, long)]
        working_dir: Option<PathBuf>,

        /// How often to check for an interrupt, in milliseconds
        #[arg(long)]
        poll_ms: Option<u64>,
    },

    /// Load and validate a songbook without building it
    Check {
        /// Path to the songbook file (.sb)
        songbook: PathBuf,
    },

    /// Show the configured build steps
    Steps,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = ConfigManager::new(&cli.config);
    config
        .load_or_create()
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    config.ensure_dirs_exist()?;

    let settings = config.settings().clone();
    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        settings.logging.level
    };
    let _guard = if settings.logging.log_to_file {
        init_tracing_with_file(level, &config.logs_folder())
    } else {
        sbk_core::logging::init_tracing(level);
        None
    };

    tracing::debug!("sbk {} using {}", sbk_core::version(), cli.config.display());

    match cli.command {
        Commands::Build {
            songbook,
            steps,
            datadirs,
            working_dir,
            poll_ms,
        } => cmd_build(
            &settings,
            &config.logs_folder(),
            BuildArgs {
                songbook,
                steps,
                datadirs,
                working_dir,
                poll_ms,
            },
        ),
        Commands::Check { songbook } => cmd_check(&settings, &songbook),
        Commands::Steps => cmd_steps(&settings),
    }
}

struct BuildArgs {
    songbook: PathBuf,
    steps: Vec<String>,
    datadirs: Vec<PathBuf>,
    working_dir: Option<PathBuf>,
    poll_ms: Option<u64>,
}

fn cmd_build(settings: &Settings, logs_folder: &Path, args: BuildArgs) -> Result<ExitCode> {
    let build_name = args
        .songbook
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("songbook")
        .to_string();

    let mut log_config = settings.logging.log_config();
    log_config.mirror_to_tracing = false;
    let logger = Arc::new(
        BuildLogger::new(
            &build_name,
            logs_folder,
            log_config,
            Some(Box::new(|line: &str| println!("{}", line))),
        )
        .with_context(|| format!("creating build log in {}", logs_folder.display()))?,
    );

    let executor = Arc::new(CommandStepExecutor::from_settings(&settings.steps));
    let poll_interval = args
        .poll_ms
        .map(|ms| Duration::from_millis(ms.max(1)))
        .unwrap_or_else(|| settings.poll_interval());

    let sink: Arc<dyn MessageSink> = logger.clone();
    let mut controller = BuildController::new(settings.build_options(), executor.clone(), sink)
        .with_poll_interval(poll_interval);
    controller.set_datadirs(args.datadirs);
    if let Some(dir) = args.working_dir {
        controller.set_working_dir(dir);
    }

    controller
        .setup_session(&args.songbook)
        .with_context(|| format!("setting up {}", args.songbook.display()))?;

    let steps = if args.steps.is_empty() {
        settings.default_steps()
    } else {
        StepName::list(args.steps.iter().map(|s| s.trim()).filter(|s| !s.is_empty()))
    };

    let flag = ContinueFlag::new();
    watch_interrupt(flag.clone(), executor.clone())?;

    logger.phase(&format!("Building {}", build_name));
    let outcome = controller.build(steps, &flag)?;

    let code = match outcome {
        BuildState::Completed => {
            logger.success("Songbook built");
            ExitCode::SUCCESS
        }
        BuildState::Cancelled => ExitCode::from(EXIT_INTERRUPTED),
        _ => {
            logger.show_tail("build log");
            if let Some(path) = logger.log_path() {
                eprintln!("Full log: {}", path.display());
            }
            ExitCode::FAILURE
        }
    };
    logger.close();
    Ok(code)
}

/// Flip `flag` on the first Ctrl-C; the supervisor picks it up on its next
/// poll. A second Ctrl-C kills the running step and exits with 130.
fn watch_interrupt(flag: ContinueFlag, executor: Arc<CommandStepExecutor>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("creating signal runtime")?;

    std::thread::Builder::new()
        .name("sbk-interrupt".to_string())
        .spawn(move || {
            runtime.block_on(handle_interrupts(tokio::signal::ctrl_c, &flag, || {
                executor.kill_running();
                std::process::exit(i32::from(EXIT_INTERRUPTED));
            }));
        })
        .context("spawning interrupt watcher")?;
    Ok(())
}

/// Wait for interrupts from `next_interrupt` and escalate on the second one.
async fn handle_interrupts<S, F, A>(mut next_interrupt: S, flag: &ContinueFlag, abort: A)
where
    S: FnMut() -> F,
    F: Future<Output = io::Result<()>>,
    A: FnOnce(),
{
    if let Err(e) = next_interrupt().await {
        tracing::warn!("Cannot listen for Ctrl-C: {}", e);
        return;
    }
    tracing::warn!("Interrupt received, stopping before the next step (Ctrl-C again to abort)");
    flag.stop();

    if next_interrupt().await.is_ok() {
        tracing::error!("Second interrupt, aborting the running step");
        abort();
    }
}

fn cmd_check(settings: &Settings, songbook: &Path) -> Result<ExitCode> {
    let executor = Arc::new(CommandStepExecutor::from_settings(&settings.steps));
    let session = BuildSession::open(songbook, settings.build_options(), executor)
        .with_context(|| format!("checking {}", songbook.display()))?;

    let descriptor = session.context().descriptor();
    println!("{}: ok", songbook.display());
    println!("  output:      {}", session.output_basename());
    println!("  working dir: {}", session.context().working_dir().display());
    println!(
        "  keys:        {}",
        descriptor.keys().collect::<Vec<_>>().join(", ")
    );
    Ok(ExitCode::SUCCESS)
}

fn cmd_steps(settings: &Settings) -> Result<ExitCode> {
    let default_steps: Vec<&str> = settings
        .build
        .default_steps
        .iter()
        .map(StepName::as_str)
        .collect();
    println!("Default sequence: {}", default_steps.join(", "));
    println!();

    for (step, argv) in &settings.steps.commands {
        println!("  {:<8} {}", step, argv.join(" "));
    }
    if !settings.steps.commands.contains_key(CLEAN_STEP) {
        println!(
            "  {:<8} (built in) removes <basename>.{{{}}}",
            CLEAN_STEP,
            settings.steps.clean_extensions.join(",")
        );
    }
    Ok(ExitCode::SUCCESS)
}
