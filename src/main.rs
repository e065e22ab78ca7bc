use clap::{CommandFactory, Parser};
use stentor::cli::{Cli, Commands};
use stentor::config::{Config, config_root};
use stentor::defaults;
use stentor::harvest::Harvester;
use stentor::job::{self, JobOptions};
use stentor::logging;
use stentor::queue::engine::{QueueEngine, QueueFlags};
use stentor::queue::runner::ChildJobRunner;
use stentor::stt::models::parse_model_list;
use std::path::{Path, PathBuf};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return e.exit_code();
        }
    };

    match &cli.command {
        None => {
            // No arguments: print usage, exit cleanly (cron-friendliness).
            let _ = Cli::command().print_help();
            defaults::EXIT_SUCCESS
        }
        Some(Commands::Queue {
            cleanup_wav_files,
            cleanup_run_logs,
            cleanup_original_audio,
            aggressive_cleanup,
            models,
            timeout_multiplier,
        }) => {
            let flags = QueueFlags {
                cleanup_wav_files: *cleanup_wav_files || *aggressive_cleanup,
                cleanup_run_logs: *cleanup_run_logs || *aggressive_cleanup,
                cleanup_original_audio: *cleanup_original_audio || *aggressive_cleanup,
                models: models.as_deref().map(parse_model_list).unwrap_or_default(),
                timeout_multiplier: *timeout_multiplier,
            };
            run_queue(&cli, config, flags).await
        }
        Some(Commands::Process {
            cleanup_temp_audio,
            input,
            models,
            timeout_multiplier,
        }) => {
            let options = JobOptions {
                cleanup_temp_audio: *cleanup_temp_audio,
                models: models.as_deref().map(parse_model_list).unwrap_or_default(),
                timeout_multiplier: *timeout_multiplier,
            };
            run_process(&cli, config, input, options).await
        }
        Some(Commands::Harvest { sources }) => {
            run_harvest(&cli, config, sources.clone()).await
        }
        Some(Commands::Check) => run_check(&cli, &config),
    }
}

/// An explicit `--config` must exist; the default path may be absent.
fn load_config(cli: &Cli) -> stentor::error::Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

async fn run_queue(cli: &Cli, config: Config, flags: QueueFlags) -> i32 {
    let log_file = config.logs_dir().join("queue_engine.log");
    let _guard = match logging::init(cli.quiet, cli.verbose, Some(&log_file)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return e.exit_code();
        }
    };

    let program = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("ERROR: cannot locate own executable: {e}");
            return defaults::EXIT_FAILURE;
        }
    };
    let job_lock_path =
        config_root().join(format!("{}.lock", defaults::LOCK_AUDIO_PROCESSING));
    let runner = ChildJobRunner::new(program, cli.config.clone(), job_lock_path);

    let shutdown = spawn_signal_listener();
    let mut engine = QueueEngine::new(config, flags, runner, shutdown);
    match engine.run().await {
        Ok(_) => defaults::EXIT_SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e}");
            e.exit_code()
        }
    }
}

async fn run_process(cli: &Cli, config: Config, input: &Path, options: JobOptions) -> i32 {
    // No file sink: the parent queue engine captures this process's
    // output into the per-job log.
    let _guard = match logging::init(cli.quiet, cli.verbose, None) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return e.exit_code();
        }
    };

    tokio::select! {
        result = job::run_job(&config, input, &options) => match result {
            Ok(clean_transcript) => {
                // Machine-readable contract: the clean transcript's
                // absolute path is the last stdout line.
                println!("{}", clean_transcript.display());
                defaults::EXIT_SUCCESS
            }
            Err(e) => {
                eprintln!("ERROR: {e}");
                e.exit_code()
            }
        },
        _ = interrupt_or_terminate() => {
            // Dropping the job future runs the lock guard's release.
            eprintln!("ERROR: interrupted by signal");
            defaults::EXIT_FAILURE
        }
    }
}

async fn run_harvest(cli: &Cli, mut config: Config, sources: Option<PathBuf>) -> i32 {
    let log_file = config_root().join("logs").join("harvester.log");
    let _guard = match logging::init(cli.quiet, cli.verbose, Some(&log_file)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return e.exit_code();
        }
    };

    if let Some(path) = sources {
        config.sources_file = path;
    }

    let mut shutdown = spawn_signal_listener();
    let harvester = Harvester::new(config);
    match harvester.run(&mut shutdown).await {
        Ok(summary) => {
            if summary.soft_failures > 0 {
                tracing::warn!(failures = summary.soft_failures, "pass had soft failures");
            }
            defaults::EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            e.exit_code()
        }
    }
}

/// Report each external tool and directory; exit 0 only when all resolve.
fn run_check(cli: &Cli, config: &Config) -> i32 {
    let _guard = logging::init(cli.quiet, cli.verbose, None).ok();

    let tools: [(&str, &Path); 5] = [
        ("ffmpeg", &config.ffmpeg_bin),
        ("ffprobe", &config.ffprobe_bin),
        ("stt", &config.stt_bin),
        ("downloader", &config.downloader_bin),
        ("rsync", &config.rsync_bin),
    ];
    let mut all_ok = true;
    for (name, path) in tools {
        let ok = tool_available(path);
        all_ok &= ok;
        println!(
            "{:<12} {:<40} {}",
            name,
            path.display(),
            if ok { "ok" } else { "MISSING" }
        );
    }
    for (name, dir) in [
        ("harvesting", &config.harvesting_root),
        ("runs", &config.runs_root),
        ("models", &config.models_dir),
    ] {
        let ok = dir.is_dir() || std::fs::create_dir_all(dir).is_ok();
        all_ok &= ok;
        println!(
            "{:<12} {:<40} {}",
            name,
            dir.display(),
            if ok { "ok" } else { "UNWRITABLE" }
        );
    }

    if all_ok {
        defaults::EXIT_SUCCESS
    } else {
        defaults::EXIT_VALIDATION
    }
}

/// Bare tool names resolve through PATH; anything with a separator must
/// be an executable file.
fn tool_available(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let is_executable = |p: &Path| {
        p.is_file()
            && std::fs::metadata(p)
                .map(|m| m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
    };

    if path.components().count() > 1 {
        return is_executable(path);
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(path)))
}

/// Watch channel flipped to true on the first INT/TERM/HUP/QUIT.
///
/// The sender lives inside the listener task for the rest of the process,
/// so receivers never observe a closed channel.
fn spawn_signal_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    async fn wait_for(kind: SignalKind) {
        match signal(kind) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("cannot install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    }

    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for(SignalKind::interrupt()) => {}
            _ = wait_for(SignalKind::terminate()) => {}
            _ = wait_for(SignalKind::hangup()) => {}
            _ = wait_for(SignalKind::quit()) => {}
        }
        tracing::warn!("shutdown signal received");
        let _ = tx.send(true);
        // Keep the sender alive; a closed channel would look like a
        // spurious shutdown to receivers.
        std::future::pending::<()>().await;
    });
    rx
}

/// First INT or TERM, whichever comes.
async fn interrupt_or_terminate() {
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
