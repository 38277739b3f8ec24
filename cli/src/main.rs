use clap::Parser;
use objtask_cli::commands::{cli, delete, upload};
use objtask_core::api as core_api;
use objtask_core::error;
use tracing::Instrument;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, error::CliError> {
    let args = cli::Args::parse();
    let mut cfg = match args.config.as_deref() {
        Some(path) => core_api::load_file(path),
        None => core_api::load_default(),
    }
    .map_err(|e| error::CliError::Config(e.to_string()))?;
    args.apply_overrides(&mut cfg);
    let command = args.command.name();
    init_tracing(&cfg.logging, command).map_err(error::CliError::Config)?;

    tracing::debug!(
        max_concurrent = cfg.tasks.max_concurrent,
        max_retries = cfg.tasks.max_retries,
        chunk_size_mb = cfg.upload.chunk_size_mb,
        "configuration loaded"
    );

    let transport = objtask_plugins::factory::build_transport(&cfg.transport)
        .map_err(|e| error::CliError::Config(format!("{e:#}")))?;
    let manager = objtask_plugins::factory::build_task_manager(&cfg, transport);

    dispatch(args, &cfg, &manager)
        .instrument(tracing::info_span!("run", command))
        .await
}

fn exit_code_for_error(e: &error::CliError) -> i32 {
    // 0: success
    // 3: some tasks failed or were canceled (returned as a normal exit code)
    // 11: config error
    // 20: IO / bad command input
    // 50: internal/uncategorized
    match e {
        error::CliError::Config(_) => 11,
        error::CliError::Io(_) => 20,
        error::CliError::Command(_) => 20,
        error::CliError::Transfer(te) => match te {
            error::TransferError::Io(_) | error::TransferError::InvalidInput(_) => 20,
            _ => 50,
        },
        error::CliError::Manager(_) => 50,
        error::CliError::Anyhow(_) => 50,
    }
}

async fn dispatch(
    args: cli::Args,
    cfg: &core_api::AppConfig,
    manager: &core_api::TaskManager,
) -> Result<i32, error::CliError> {
    let (dry_run, quiet) = (args.dry_run, args.quiet);
    match args.command {
        cli::Commands::Upload(upload_args) => {
            upload::handle_upload(upload_args, &cfg.upload, manager, dry_run, quiet).await
        }
        cli::Commands::Delete(delete_args) => {
            delete::handle_delete(delete_args, manager, dry_run, quiet).await
        }
    }
}

/// `objtask-<command>-<timestamp>-<pid>.log`, so concurrent and repeated runs
/// never share a file.
fn log_file_name(command: &str) -> String {
    format!(
        "objtask-{}-{}-{}.log",
        command,
        chrono::Local::now().format("%Y%m%dT%H%M%S"),
        std::process::id()
    )
}

fn log_dir(logging: &core_api::LoggingConfig) -> std::path::PathBuf {
    match logging
        .directory
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(d) => std::path::PathBuf::from(d),
        None => std::env::temp_dir().join("objtask"),
    }
}

fn init_tracing(logging: &core_api::LoggingConfig, command: &str) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }
    if !logging.console && !logging.file {
        return Err("logging enabled but both console and file output are off".to_string());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(&logging.level)
            .map_err(|e| format!("invalid logging.level '{}': {e}", logging.level))?,
    };

    let file_writer = if logging.file {
        let dir = log_dir(logging);
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("create log dir {} failed: {e}", dir.display()))?;
        let appender = tracing_appender::rolling::never(&dir, log_file_name(command));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        Some(writer)
    } else {
        None
    };

    // Progress bars own the terminal, so console lines stay short.
    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
            .with_target(false)
            .compact()
    });

    // Tasks run concurrently; thread ids help untangle interleaved attempts.
    let file_layer = file_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
            .with_thread_ids(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
