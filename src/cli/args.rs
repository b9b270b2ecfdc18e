use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ngoreport",
    version,
    about = "client for the NGO monthly-reporting backend",
    long_about = "ngoreport submits NGO monthly reports, bulk-uploads report CSVs and follows their processing jobs, and fetches the monthly admin dashboard.\n\nExamples:\n  ngoreport submit --ngo-id NGO001 --month 2025-01 --people-helped 500 --events-conducted 10 --funds-utilized 250000\n  ngoreport upload ./reports.csv\n  ngoreport status 6f1c2a --watch\n  ngoreport session login <TOKEN>\n  ngoreport dashboard --month 2025-12\n\nTip: Use --config (or `ngoreport init-config`) to persist the backend URL and keep invocations short."
)]
pub struct CliArgs {
    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help_heading = "Output",
        help = "Increase log verbosity (-v info, -vv debug, -vvv trace)."
    )]
    pub verbose: u8,

    #[arg(
        short = 'c',
        long = "color",
        global = true,
        help_heading = "Output",
        help = "Enable colored output (overrides --no-color)."
    )]
    pub color: bool,

    #[arg(
        short = 'n',
        long = "no-color",
        global = true,
        help_heading = "Output",
        help = "Disable colored output."
    )]
    pub no_color: bool,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "FILE",
        global = true,
        help_heading = "Output",
        help = "Also write the final result to a file."
    )]
    pub output: Option<String>,

    #[arg(
        short = 'A',
        long = "output-format",
        visible_alias = "of",
        value_name = "FORMAT",
        global = true,
        help_heading = "Output",
        help = "Result format (text or json)."
    )]
    pub output_format: Option<String>,

    #[arg(
        long = "log-json",
        global = true,
        help_heading = "Output",
        help = "Emit logs as JSON lines on stderr."
    )]
    pub log_json: bool,

    #[arg(
        short = 'C',
        long = "config",
        value_name = "FILE",
        global = true,
        help_heading = "Input",
        help = "Path to config file (defaults to ~/.ngoreport/config.yml)."
    )]
    pub config: Option<String>,

    #[arg(
        short = 'u',
        long = "base-url",
        visible_alias = "url",
        value_name = "URL",
        global = true,
        help_heading = "Backend",
        help = "Backend base URL (e.g. http://localhost:5000)."
    )]
    pub base_url: Option<String>,

    #[arg(
        short = 'T',
        long = "timeout",
        value_name = "SECONDS",
        global = true,
        help_heading = "Backend",
        help = "Per-request timeout in seconds."
    )]
    pub timeout: Option<u64>,

    #[arg(
        short = 'p',
        long = "proxy",
        value_name = "URL",
        global = true,
        help_heading = "Backend",
        help = "HTTP proxy URL (e.g. http://127.0.0.1:8080)."
    )]
    pub proxy: Option<String>,

    #[arg(
        short = 'H',
        long = "header",
        value_name = "HEADER",
        global = true,
        help_heading = "Backend",
        help = "Add a header to all requests (format: 'Key: Value')."
    )]
    pub header: Option<String>,

    #[arg(
        long = "token",
        value_name = "TOKEN",
        global = true,
        help_heading = "Session",
        help = "Admin token for this invocation (overrides the stored session)."
    )]
    pub token: Option<String>,

    #[arg(
        long = "session-file",
        value_name = "FILE",
        global = true,
        help_heading = "Session",
        help = "Where the admin session is stored (defaults to ~/.ngoreport/session.json)."
    )]
    pub session_file: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Submit a single monthly report.
    Submit(SubmitArgs),

    /// Upload a CSV of reports and follow the processing job.
    Upload(UploadArgs),

    /// Show (or watch) the status of an existing upload job.
    Status(StatusArgs),

    /// Fetch the monthly admin dashboard.
    Dashboard(DashboardArgs),

    /// Manage the stored admin session.
    #[command(subcommand)]
    Session(SessionCommand),

    /// Print the expected CSV header with an example row.
    Template,

    /// Write a default config file if none exists.
    InitConfig,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SubmitArgs {
    #[arg(long = "ngo-id", value_name = "ID", help = "NGO identifier.")]
    pub ngo_id: Option<String>,

    #[arg(long = "month", value_name = "YYYY-MM", help = "Reporting month.")]
    pub month: Option<String>,

    #[arg(long = "people-helped", value_name = "N", help = "People helped this month.")]
    pub people_helped: Option<String>,

    #[arg(long = "events-conducted", value_name = "N", help = "Events conducted this month.")]
    pub events_conducted: Option<String>,

    #[arg(long = "funds-utilized", value_name = "AMOUNT", help = "Funds utilized this month.")]
    pub funds_utilized: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    #[arg(value_name = "FILE", help = "CSV file to upload.")]
    pub file: PathBuf,

    #[arg(
        long = "media-type",
        value_name = "TYPE",
        help = "Declared media type (defaults to text/csv for .csv files)."
    )]
    pub media_type: Option<String>,

    #[arg(long = "no-wait", help = "Print the job id and exit without polling.")]
    pub no_wait: bool,

    #[arg(
        long = "poll-interval-ms",
        value_name = "MS",
        help = "Status poll interval in milliseconds (default 1200)."
    )]
    pub poll_interval_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(value_name = "JOB_ID", help = "Job id returned by an upload.")]
    pub job_id: String,

    #[arg(short = 'w', long = "watch", help = "Keep polling until the job finishes.")]
    pub watch: bool,

    #[arg(
        long = "poll-interval-ms",
        value_name = "MS",
        help = "Status poll interval in milliseconds (default 1200)."
    )]
    pub poll_interval_ms: Option<u64>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DashboardArgs {
    #[arg(
        short = 'm',
        long = "month",
        value_name = "YYYY-MM",
        help = "Month to summarize (defaults to the current month, UTC)."
    )]
    pub month: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// Store a backend-issued admin token.
    Login {
        #[arg(value_name = "TOKEN", help = "Admin token issued by the backend.")]
        token: String,

        #[arg(
            long = "expires-in",
            value_name = "SECONDS",
            help = "Forget the token after this many seconds."
        )]
        expires_in: Option<u64>,
    },

    /// Remove the stored admin token.
    Logout,

    /// Show whether an admin session is stored.
    Status,
}
