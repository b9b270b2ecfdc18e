use crate::cli::args::{CliArgs, Command, SessionCommand};
use crate::output::OutputFormat;
use crate::utils::Month;

pub fn validate(args: &CliArgs) -> Result<(), String> {
    if let Some(timeout) = args.timeout {
        if timeout == 0 {
            return Err("invalid timeout, expected positive integer".to_string());
        }
    }
    if let Some(raw) = args.output_format.as_deref() {
        if OutputFormat::parse(raw).is_none() {
            return Err(format!("invalid --output-format '{raw}', expected text or json"));
        }
    }
    if let Some(raw) = args.header.as_deref() {
        crate::utils::parse_header_line(raw).map_err(|e| format!("invalid --header '{raw}': {e}"))?;
    }
    if let Some(token) = args.token.as_deref() {
        if token.trim().is_empty() {
            return Err("invalid --token, expected a non-empty value".to_string());
        }
    }

    match &args.command {
        Command::Upload(upload) => validate_poll_interval(upload.poll_interval_ms)?,
        Command::Status(status) => {
            if status.job_id.trim().is_empty() {
                return Err("invalid job id, expected a non-empty value".to_string());
            }
            validate_poll_interval(status.poll_interval_ms)?;
        }
        Command::Dashboard(dashboard) => {
            if let Some(raw) = dashboard.month.as_deref() {
                raw.parse::<Month>()
                    .map_err(|e| format!("invalid --month '{raw}': {e}"))?;
            }
        }
        Command::Session(SessionCommand::Login { token, expires_in }) => {
            if token.trim().is_empty() {
                return Err("invalid token, expected a non-empty value".to_string());
            }
            if *expires_in == Some(0) {
                return Err("invalid expires-in, expected positive integer".to_string());
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_poll_interval(value: Option<u64>) -> Result<(), String> {
    if value == Some(0) {
        return Err("invalid poll-interval-ms, expected positive integer".to_string());
    }
    Ok(())
}
