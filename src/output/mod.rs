use serde::Serialize;

use crate::dashboard::MonthlySummary;
use crate::upload::{UploadJob, CSV_EXAMPLE_ROW, CSV_HEADER};

const PROGRESS_WIDTH: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "text" | "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn infer_format_from_path(path: &str) -> Option<OutputFormat> {
    let lower = path.trim().to_lowercase();
    if lower.ends_with(".json") {
        return Some(OutputFormat::Json);
    }
    if lower.ends_with(".txt") {
        return Some(OutputFormat::Text);
    }
    None
}

#[derive(Serialize)]
struct JobView<'a> {
    #[serde(flatten)]
    job: &'a UploadJob,
    progress_percent: u8,
}

pub fn render_job(job: &UploadJob, format: OutputFormat) -> Vec<u8> {
    match format {
        OutputFormat::Text => render_job_text(job).into_bytes(),
        OutputFormat::Json => {
            let view = JobView {
                job,
                progress_percent: job.progress_percent(),
            };
            let mut out = serde_json::to_vec_pretty(&view).unwrap_or_else(|_| b"{}".to_vec());
            out.push(b'\n');
            out
        }
    }
}

pub fn progress_bar(pct: u8) -> String {
    let filled = (pct as usize * PROGRESS_WIDTH) / 100;
    format!(
        "[{}{}]",
        "#".repeat(filled),
        "-".repeat(PROGRESS_WIDTH - filled)
    )
}

pub fn render_job_text(job: &UploadJob) -> String {
    let pct = job.progress_percent();
    let mut out = String::new();
    out.push_str(&format!("Job ID: {}\n", job.job_id));
    out.push_str(&format!("Status: {}\n", job.status.as_str().to_uppercase()));
    if job.total > 0 {
        out.push_str(&format!(
            "{} Processed {} of {} rows ({}%)\n",
            progress_bar(pct),
            job.processed,
            job.total,
            pct
        ));
    } else {
        out.push_str("Waiting for processing to start...\n");
    }
    out.push('\n');
    out.push_str(&format!(
        "{:<12}{:<12}{:<12}{:<12}\n",
        "Total Rows", "Processed", "Success", "Failed"
    ));
    out.push_str(&format!(
        "{:<12}{:<12}{:<12}{:<12}\n",
        job.total, job.processed, job.success, job.failed
    ));

    if !job.errors.is_empty() {
        out.push('\n');
        out.push_str("Failed Records\n");
        let width = job.errors.len().to_string().len().max(1);
        out.push_str(&format!("{:>width$}  Error\n", "#"));
        for (n, err) in job.error_rows() {
            out.push_str(&format!("{n:>width$}  {err}\n"));
        }
    }
    out
}

pub fn render_summary(summary: &MonthlySummary, currency_symbol: &str, format: OutputFormat) -> Vec<u8> {
    match format {
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str(&format!("Showing data for {}\n\n", summary.month.label()));
            for card in summary.cards(currency_symbol) {
                out.push_str(&format!("{:<26}{}\n", card.title, card.value));
            }
            out.into_bytes()
        }
        OutputFormat::Json => {
            let mut out = serde_json::to_vec_pretty(summary).unwrap_or_else(|_| b"{}".to_vec());
            out.push(b'\n');
            out
        }
    }
}

pub fn render_csv_template() -> String {
    format!("{CSV_HEADER}\n{CSV_EXAMPLE_ROW}\n")
}
