pub mod poller;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

pub use poller::{into_stream, JobPoller, DEFAULT_POLL_INTERVAL};

use crate::api::{ApiError, JobStatusResponse, ReportsApi, RowError, SelectedFile};
use crate::notify::Notifier;

pub const INVALID_FILE_MESSAGE: &str = "Please upload a valid CSV file (.csv)";
pub const EMPTY_FILE_MESSAGE: &str = "Selected file is empty";
pub const NO_FILE_MESSAGE: &str = "Please select a CSV file first";
pub const BUSY_MESSAGE: &str = "An upload is already in progress";
pub const MISSING_JOB_ID_MESSAGE: &str = "Upload succeeded but job_id not returned";
pub const UPLOADED_MESSAGE: &str = "CSV uploaded. Processing started.";
pub const COMPLETED_MESSAGE: &str = "CSV processed successfully!";
pub const FAILED_MESSAGE: &str = "CSV processing failed!";

pub const CSV_HEADER: &str = "ngo_id,month,people_helped,events_conducted,funds_utilized";
pub const CSV_EXAMPLE_ROW: &str = "NGO001,2025-01,500,10,250000";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("'{file_name}' is not a CSV file")]
    NotCsv { file_name: String },

    #[error("'{file_name}' is empty")]
    EmptyFile { file_name: String },

    #[error("no CSV file selected")]
    NoFile,

    #[error("an upload is already {phase}")]
    Busy { phase: &'static str },

    #[error("upload succeeded but the backend returned no job id")]
    MissingJobId,

    #[error("upload failed: {source}")]
    Api {
        #[source]
        source: ApiError,
    },

    #[error("failed to read {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Unknown(String),
}

impl JobStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Unknown(raw.trim().to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown(raw) => raw.as_str(),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Latest snapshot of a server-side upload job.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UploadJob {
    pub job_id: String,
    pub status: JobStatus,
    pub total: u64,
    pub processed: u64,
    pub success: u64,
    pub failed: u64,
    pub errors: Vec<RowError>,
}

impl UploadJob {
    /// The client-side record created when the backend accepts an upload.
    pub fn placeholder(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Pending,
            total: 0,
            processed: 0,
            success: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn from_response(job_id: &str, response: JobStatusResponse) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::parse(response.status.as_deref().unwrap_or_default()),
            total: response.total,
            processed: response.processed,
            success: response.success,
            failed: response.failed,
            errors: response.errors,
        }
    }

    pub fn progress_percent(&self) -> u8 {
        progress_percent(self.processed, self.total)
    }

    /// Failed rows numbered from 1, in backend order.
    pub fn error_rows(&self) -> impl Iterator<Item = (usize, &RowError)> {
        self.errors.iter().enumerate().map(|(idx, e)| (idx + 1, e))
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        match self.status {
            JobStatus::Completed => Some(JobOutcome::Completed),
            JobStatus::Failed => Some(JobOutcome::Failed),
            _ => None,
        }
    }
}

pub fn progress_percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (processed as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    Uploading,
    Polling { job_id: String },
    Terminal(JobOutcome),
}

fn media_type_is_csv(media_type: &str) -> bool {
    let essence = media_type.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case("text/csv")
}

pub fn is_csv(file: &SelectedFile) -> bool {
    let by_name = file.file_name.to_lowercase().ends_with(".csv");
    let by_type = file.media_type.as_deref().map(media_type_is_csv).unwrap_or(false);
    by_name || by_type
}

pub fn check_csv_file(file: &SelectedFile) -> Result<(), UploadError> {
    if !is_csv(file) {
        return Err(UploadError::NotCsv {
            file_name: file.file_name.clone(),
        });
    }
    if file.is_empty() {
        return Err(UploadError::EmptyFile {
            file_name: file.file_name.clone(),
        });
    }
    Ok(())
}

/// Reads a file from disk as an upload candidate.
pub async fn read_selected_file(
    path: &Path,
    media_type: Option<String>,
) -> Result<SelectedFile, UploadError> {
    let contents = tokio::fs::read(path)
        .await
        .map_err(|e| UploadError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let media_type = media_type.or_else(|| {
        if file_name.to_lowercase().ends_with(".csv") {
            Some("text/csv".to_string())
        } else {
            None
        }
    });
    Ok(SelectedFile::new(file_name, media_type, contents))
}

fn upload_failure_message(err: &ApiError) -> String {
    err.backend_message().unwrap_or_else(|| err.to_string())
}

/// The bulk upload flow: pick a CSV, upload it, follow the job to a
/// terminal status.
pub struct BulkUpload {
    api: Arc<dyn ReportsApi>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    file: Option<SelectedFile>,
    phase: UploadPhase,
    job: Option<UploadJob>,
    poller: Option<JobPoller>,
    updates: Option<watch::Receiver<UploadJob>>,
}

impl BulkUpload {
    pub fn new(api: Arc<dyn ReportsApi>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            api,
            notifier,
            interval: DEFAULT_POLL_INTERVAL,
            file: None,
            phase: UploadPhase::Idle,
            job: None,
            poller: None,
            updates: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn phase(&self) -> &UploadPhase {
        &self.phase
    }

    pub fn job(&self) -> Option<&UploadJob> {
        self.job.as_ref()
    }

    pub fn selected_file(&self) -> Option<&SelectedFile> {
        self.file.as_ref()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    fn busy_phase(&self) -> Option<&'static str> {
        match self.phase {
            UploadPhase::Uploading => Some("uploading"),
            UploadPhase::Polling { .. } => Some("processing"),
            _ => None,
        }
    }

    pub fn can_upload(&self) -> bool {
        self.file.is_some() && self.busy_phase().is_none()
    }

    /// Accepts `file` as the next upload if it looks like a non-empty CSV.
    /// A rejected file leaves the previous selection in place.
    pub fn select_file(&mut self, file: SelectedFile) -> Result<(), UploadError> {
        if let Some(phase) = self.busy_phase() {
            self.notifier.error(BUSY_MESSAGE);
            return Err(UploadError::Busy { phase });
        }
        if let Err(err) = check_csv_file(&file) {
            match err {
                UploadError::EmptyFile { .. } => self.notifier.error(EMPTY_FILE_MESSAGE),
                _ => self.notifier.error(INVALID_FILE_MESSAGE),
            }
            return Err(err);
        }
        self.file = Some(file);
        self.job = None;
        self.phase = UploadPhase::Idle;
        Ok(())
    }

    /// Uploads the selected file and starts polling the returned job.
    pub async fn upload(&mut self) -> Result<String, UploadError> {
        if let Some(phase) = self.busy_phase() {
            self.notifier.error(BUSY_MESSAGE);
            return Err(UploadError::Busy { phase });
        }
        let Some(file) = self.file.clone() else {
            self.notifier.error(NO_FILE_MESSAGE);
            return Err(UploadError::NoFile);
        };

        self.phase = UploadPhase::Uploading;
        info!(file = %file.file_name, bytes = file.len(), "uploading reports");
        let api = Arc::clone(&self.api);
        let response = match api.upload_reports(&file).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "upload failed");
                self.phase = UploadPhase::Idle;
                self.notifier.error(&upload_failure_message(&err));
                return Err(UploadError::Api { source: err });
            }
        };

        let Some(job_id) = response.job_id() else {
            warn!("upload response carried no job id");
            self.phase = UploadPhase::Idle;
            self.notifier.error(MISSING_JOB_ID_MESSAGE);
            return Err(UploadError::MissingJobId);
        };

        info!(job_id = %job_id, "upload accepted");
        self.notifier.success(UPLOADED_MESSAGE);
        self.follow(job_id.clone());
        Ok(job_id)
    }

    /// Starts following an existing job without uploading anything.
    pub fn follow(&mut self, job_id: String) {
        self.job = Some(UploadJob::placeholder(&job_id));
        self.start_polling(&job_id);
        self.phase = UploadPhase::Polling { job_id };
    }

    fn start_polling(&mut self, job_id: &str) {
        self.stop_polling();
        let (poller, updates) = JobPoller::start(
            Arc::clone(&self.api),
            Arc::clone(&self.notifier),
            job_id,
            self.interval,
        );
        self.poller = Some(poller);
        self.updates = Some(updates);
    }

    /// Cancels the active poller, if any. Safe to call repeatedly.
    pub fn stop_polling(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
        self.updates = None;
    }

    /// Tears the component down: no status fetch happens afterwards.
    pub fn teardown(&mut self) {
        self.stop_polling();
        if matches!(self.phase, UploadPhase::Polling { .. }) {
            self.phase = UploadPhase::Idle;
        }
    }

    /// Waits for the next snapshot and applies it. Returns `None` once
    /// polling is over.
    pub async fn next_update(&mut self) -> Option<&UploadJob> {
        let updates = self.updates.as_mut()?;
        let received = match updates.changed().await {
            Ok(()) => Some(updates.borrow_and_update().clone()),
            Err(_) => None,
        };
        match received {
            Some(snapshot) => {
                self.apply(snapshot);
                self.job.as_ref()
            }
            None => {
                self.stop_polling();
                if matches!(self.phase, UploadPhase::Polling { .. }) {
                    warn!("poller ended before the job finished");
                    self.phase = UploadPhase::Idle;
                }
                None
            }
        }
    }

    /// Drives polling until a terminal status, calling `on_update` for every
    /// snapshot.
    pub async fn wait_for_outcome<F>(&mut self, mut on_update: F) -> Option<JobOutcome>
    where
        F: FnMut(&UploadJob),
    {
        while let Some(job) = self.next_update().await {
            on_update(job);
        }
        match self.phase {
            UploadPhase::Terminal(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Records a snapshot. The poller has already notified the terminal
    /// outcome; this only moves the phase.
    fn apply(&mut self, snapshot: UploadJob) {
        let outcome = snapshot.outcome();
        self.job = Some(snapshot);

        let Some(outcome) = outcome else {
            return;
        };
        if !matches!(self.phase, UploadPhase::Polling { .. }) {
            return;
        }
        self.stop_polling();
        self.phase = UploadPhase::Terminal(outcome);
    }
}
