use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{error::ErrorKind, Parser};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::api::{ClientOptions, HttpApi, ReportsApi, DEFAULT_BASE_URL};
use crate::cli::args::{CliArgs, Command, SessionCommand, StatusArgs, SubmitArgs, UploadArgs};
use crate::cli::validation;
use crate::config::{self, ConfigFile};
use crate::dashboard::{self, DEFAULT_CURRENCY_SYMBOL};
use crate::notify::{ConsoleNotifier, Notifier};
use crate::output::{self, OutputFormat};
use crate::report::{self, ReportForm};
use crate::session::{ActiveSession, AdminSession, SessionStore};
use crate::upload::{self, BulkUpload, JobOutcome, UploadJob, DEFAULT_POLL_INTERVAL};
use crate::utils::{self, Month};

#[derive(Clone, Debug)]
struct LogSettings {
    verbose: u8,
    level: String,
    json: bool,
}

#[derive(Debug)]
struct RunConfig {
    command: Command,
    base_url: String,
    timeout: u64,
    proxy: Option<String>,
    header: Option<String>,
    token: Option<String>,
    session_path: Option<PathBuf>,
    poll_interval: Duration,
    no_color: bool,
    output: Option<String>,
    output_format: Option<OutputFormat>,
    currency_symbol: String,
    log: LogSettings,
}

fn build_run_config(args: CliArgs, cfg: ConfigFile) -> Result<RunConfig, String> {
    validation::validate(&args)?;

    let no_color = if args.color {
        false
    } else {
        args.no_color || cfg.no_color.unwrap_or(false)
    };

    let base_url = args
        .base_url
        .or(cfg.base_url)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let timeout = args.timeout.or(cfg.timeout).unwrap_or(30);
    if timeout == 0 {
        return Err("invalid timeout in config, expected positive integer".to_string());
    }

    let proxy = args.proxy.or(cfg.proxy).filter(|p| !p.trim().is_empty());
    let header = args.header.or(cfg.header).filter(|h| !h.trim().is_empty());
    if let Some(raw) = header.as_deref() {
        utils::parse_header_line(raw).map_err(|e| format!("invalid header '{raw}': {e}"))?;
    }
    let token = args.token.or(cfg.token).filter(|t| !t.trim().is_empty());

    let session_path = args
        .session_file
        .or(cfg.session_file)
        .map(|p| config::expand_tilde(&p))
        .or_else(config::default_session_path);

    let subcommand_interval = match &args.command {
        Command::Upload(upload) => upload.poll_interval_ms,
        Command::Status(status) => status.poll_interval_ms,
        _ => None,
    };
    let poll_interval = match subcommand_interval.or(cfg.poll_interval_ms) {
        Some(0) => return Err("invalid poll_interval_ms, expected positive integer".to_string()),
        Some(ms) => Duration::from_millis(ms),
        None => DEFAULT_POLL_INTERVAL,
    };

    let output = args
        .output
        .or(cfg.output)
        .map(|p| config::expand_tilde(&p).to_string_lossy().into_owned());
    let output_format = match args.output_format.or(cfg.output_format) {
        Some(raw) => Some(
            OutputFormat::parse(&raw)
                .ok_or_else(|| format!("invalid output format '{raw}', expected text or json"))?,
        ),
        None => None,
    };

    let currency_symbol = cfg
        .currency_symbol
        .unwrap_or_else(|| DEFAULT_CURRENCY_SYMBOL.to_string());

    let log = LogSettings {
        verbose: args.verbose,
        level: cfg.log_level.unwrap_or_else(|| "warn".to_string()),
        json: args.log_json || cfg.log_json.unwrap_or(false),
    };

    Ok(RunConfig {
        command: args.command,
        base_url,
        timeout,
        proxy,
        header,
        token,
        session_path,
        poll_interval,
        no_color,
        output,
        output_format,
        currency_symbol,
        log,
    })
}

fn log_filter(settings: &LogSettings) -> String {
    let level = match settings.verbose {
        0 => settings.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    format!("warn,ngoreport={level}")
}

fn init_logging(settings: &LogSettings, no_color: bool) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_filter(settings)))
        .map_err(|e| format!("invalid log level '{}': {e}", settings.level))?;

    let layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(!no_color)
            .with_target(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| format!("failed to init logging: {e}"))
}

fn build_api(run: &RunConfig, token: Option<&str>) -> Result<Arc<dyn ReportsApi>, String> {
    let options = ClientOptions {
        base_url: run.base_url.clone(),
        timeout_seconds: run.timeout,
        proxy: run.proxy.clone(),
        header: run.header.clone(),
        token: token.map(str::to_string),
    };
    let api = HttpApi::new(&options).map_err(|e| e.to_string())?;
    debug!(base_url = %api.base_url(), "backend client ready");
    Ok(Arc::new(api))
}

fn session_store(run: &RunConfig) -> Result<SessionStore, String> {
    run.session_path
        .clone()
        .map(SessionStore::new)
        .ok_or_else(|| "no session file location; pass --session-file".to_string())
}

/// An explicit token wins over the stored session.
fn resolve_session(run: &RunConfig) -> Result<ActiveSession, String> {
    if let Some(token) = run.token.as_deref() {
        return ActiveSession::from_token(token).map_err(|e| e.to_string());
    }
    let stored = match run.session_path.as_ref() {
        Some(path) => SessionStore::new(path).load().map_err(|e| e.to_string())?,
        None => None,
    };
    Ok(ActiveSession::new(stored, utils::unix_now()))
}

/// Like [`resolve_session`], but an unreadable session file only costs the
/// stored token. Used by commands the backend may accept without one.
fn optional_session(run: &RunConfig) -> ActiveSession {
    resolve_session(run).unwrap_or_else(|e| {
        warn!(error = %e, "ignoring unreadable session");
        ActiveSession::default()
    })
}

fn resolve_format(explicit: Option<OutputFormat>, path: Option<&str>) -> OutputFormat {
    explicit
        .or_else(|| path.and_then(output::infer_format_from_path))
        .unwrap_or(OutputFormat::Text)
}

/// Prints the result on stdout and mirrors it to `--output` when set.
async fn emit<F>(run: &RunConfig, render: F) -> Result<(), String>
where
    F: Fn(OutputFormat) -> Vec<u8>,
{
    let stdout_format = run.output_format.unwrap_or(OutputFormat::Text);
    print!("{}", String::from_utf8_lossy(&render(stdout_format)));

    if let Some(outfile_path) = run.output.as_deref() {
        let rendered = render(resolve_format(run.output_format, Some(outfile_path)));
        let mut outfile = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(outfile_path)
            .await
            .map_err(|e| format!("failed to open output file: {e}"))?;
        outfile
            .write_all(&rendered)
            .await
            .map_err(|_| "failed to write output file".to_string())?;
        info!(path = outfile_path, "result written");
    }
    Ok(())
}

async fn run_submit(run: &RunConfig, args: &SubmitArgs) -> Result<(), String> {
    let session = optional_session(run);
    let api = build_api(run, session.token())?;
    let mut form = ReportForm {
        ngo_id: args.ngo_id.clone().unwrap_or_default(),
        month: args.month.clone().unwrap_or_default(),
        people_helped: args.people_helped.clone().unwrap_or_default(),
        events_conducted: args.events_conducted.clone().unwrap_or_default(),
        funds_utilized: args.funds_utilized.clone().unwrap_or_default(),
    };
    report::submit_report(api.as_ref(), &ConsoleNotifier, &mut form)
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn job_progress_bar(job_id: &str) -> Result<ProgressBar, String> {
    let pb = ProgressBar::new(100);
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::with_template(
            ":: Job {prefix} :: [{bar:30}] {pos}% :: Duration: [{elapsed_precise}] :: {msg}",
        )
        .map_err(|e| format!("failed to build progress bar style: {e}"))?
        .progress_chars(r#"#>-"#),
    );
    pb.set_prefix(job_id.to_string());
    pb.set_message("waiting for processing to start");
    Ok(pb)
}

fn progress_message(job: &UploadJob) -> String {
    format!(
        "{} :: {}/{} rows :: {} ok, {} failed",
        job.status, job.processed, job.total, job.success, job.failed
    )
}

/// Follows the flow's job until it finishes or the user interrupts.
async fn watch_job(run: &RunConfig, flow: &mut BulkUpload, job_id: &str) -> Result<(), String> {
    let pb = job_progress_bar(job_id)?;

    let finished = tokio::select! {
        outcome = flow.wait_for_outcome(|job| {
            pb.set_position(u64::from(job.progress_percent()));
            pb.set_message(progress_message(job));
        }) => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };

    let Some(outcome) = finished else {
        flow.teardown();
        pb.abandon_with_message("interrupted");
        return Err(format!(
            "stopped following job {job_id}; it keeps running on the backend (resume with `ngoreport status {job_id} --watch`)"
        ));
    };
    pb.finish_and_clear();

    if let Some(job) = flow.job() {
        emit(run, |format| output::render_job(job, format)).await?;
    }

    match outcome {
        Some(JobOutcome::Completed) => Ok(()),
        Some(JobOutcome::Failed) => Err(format!("job {job_id} failed")),
        None => Err(format!("stopped following job {job_id} before it finished")),
    }
}

async fn run_upload(run: &RunConfig, args: &UploadArgs) -> Result<(), String> {
    let session = optional_session(run);
    let api = build_api(run, session.token())?;
    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier);
    let mut flow = BulkUpload::new(api, notifier).with_interval(run.poll_interval);

    let file = upload::read_selected_file(&args.file, args.media_type.clone())
        .await
        .map_err(|e| e.to_string())?;
    flow.select_file(file).map_err(|e| e.to_string())?;
    let job_id = flow.upload().await.map_err(|e| e.to_string())?;
    println!("{} {}", "Job ID:".bold(), job_id);

    if args.no_wait {
        flow.teardown();
        return Ok(());
    }
    watch_job(run, &mut flow, &job_id).await
}

async fn run_status(run: &RunConfig, args: &StatusArgs) -> Result<(), String> {
    let session = optional_session(run);
    let api = build_api(run, session.token())?;
    let job_id = args.job_id.trim().to_string();

    if args.watch {
        let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier);
        let mut flow = BulkUpload::new(api, notifier).with_interval(run.poll_interval);
        flow.follow(job_id.clone());
        return watch_job(run, &mut flow, &job_id).await;
    }

    let response = api.job_status(&job_id).await.map_err(|e| e.to_string())?;
    let job = UploadJob::from_response(&job_id, response);
    emit(run, |format| output::render_job(&job, format)).await
}

async fn run_dashboard(run: &RunConfig, month: Option<&str>) -> Result<(), String> {
    let month = match month {
        Some(raw) => raw.parse::<Month>()?,
        None => Month::current_utc(),
    };
    let session = resolve_session(run)?;
    let api = build_api(run, session.token())?;
    let summary = dashboard::fetch_summary(api.as_ref(), &ConsoleNotifier, &session, month)
        .await
        .map_err(|e| e.to_string())?;
    emit(run, |format| {
        output::render_summary(&summary, &run.currency_symbol, format)
    })
    .await
}

fn run_session(run: &RunConfig, command: &SessionCommand) -> Result<(), String> {
    let store = session_store(run)?;
    match command {
        SessionCommand::Login { token, expires_in } => {
            let session =
                AdminSession::new(token, *expires_in, utils::unix_now()).map_err(|e| e.to_string())?;
            store.save(&session).map_err(|e| e.to_string())?;
            ConsoleNotifier.success(&format!(
                "Admin session stored at {}",
                store.path().display()
            ));
        }
        SessionCommand::Logout => {
            if store.clear().map_err(|e| e.to_string())? {
                ConsoleNotifier.success("Logged out");
            } else {
                ConsoleNotifier.info("No admin session stored");
            }
        }
        SessionCommand::Status => {
            let now = utils::unix_now();
            match store.load().map_err(|e| e.to_string())? {
                None => println!("Admin session: {}", "none".red()),
                Some(session) if session.is_expired(now) => {
                    println!("Admin session: {}", "expired".yellow())
                }
                Some(session) => match session.expires_at {
                    Some(at) => println!(
                        "Admin session: {} (expires in {}s)",
                        "active".green(),
                        at.saturating_sub(now)
                    ),
                    None => println!("Admin session: {}", "active".green()),
                },
            }
            if run.token.is_some() {
                println!("An explicit token (--token or config) overrides the stored session.");
            }
        }
    }
    Ok(())
}

async fn run_async(run: RunConfig) -> Result<(), String> {
    match &run.command {
        Command::Submit(args) => run_submit(&run, args).await,
        Command::Upload(args) => run_upload(&run, args).await,
        Command::Status(args) => run_status(&run, args).await,
        Command::Dashboard(args) => run_dashboard(&run, args.month.as_deref()).await,
        Command::Session(command) => run_session(&run, command),
        Command::Template => {
            print!("{}", output::render_csv_template());
            Ok(())
        }
        Command::InitConfig => Ok(()),
    }
}

fn init_config(args: &CliArgs) -> Result<(), String> {
    let path = match args.config.as_deref() {
        Some(path) => config::expand_tilde(path),
        None => config::default_config_path()
            .ok_or_else(|| "could not determine home directory; pass --config".to_string())?,
    };
    if config::ensure_default_config_file(&path)? {
        println!("Wrote default config to {}", path.display());
    } else {
        println!("Config already exists at {}", path.display());
    }
    Ok(())
}

pub fn run_cli() -> Result<(), String> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{e}");
                return Ok(());
            }
            _ => return Err(e.to_string()),
        },
    };

    if matches!(args.command, Command::InitConfig) {
        return init_config(&args);
    }

    let cfg = match args.config.as_deref() {
        Some(path) => config::load_config(&config::expand_tilde(path), false)?,
        None => match config::default_config_path() {
            Some(path) => config::load_config(&path, true)?,
            None => ConfigFile::default(),
        },
    };

    let run = build_run_config(args, cfg)?;

    if run.no_color {
        colored::control::set_override(false);
    }
    init_logging(&run.log, run.no_color)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;

    rt.block_on(run_async(run))
}
