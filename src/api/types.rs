use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::utils::Month;

/// Body of `POST /insertreport`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportPayload {
    pub ngo_id: String,
    pub month: Month,
    pub people_helped: u64,
    pub events_conducted: u64,
    pub funds_utilized: f64,
}

/// A file picked for upload, before any CSV checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedFile {
    pub file_name: String,
    pub media_type: Option<String>,
    pub contents: Vec<u8>,
}

impl SelectedFile {
    pub fn new(file_name: impl Into<String>, media_type: Option<String>, contents: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            media_type,
            contents,
        }
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UploadResponse {
    #[serde(default, alias = "jobId")]
    job_id: Option<Value>,
}

impl UploadResponse {
    pub fn with_job_id(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(Value::String(job_id.into())),
        }
    }

    /// The job identifier, if the backend sent a usable one.
    pub fn job_id(&self) -> Option<String> {
        let id = match self.job_id.as_ref()? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct JobStatusResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub processed: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub success: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub failed: u64,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub errors: Vec<RowError>,
}

/// Monthly aggregates returned by `GET /dashboard`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct DashboardSummary {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub ngos: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub people: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub events: u64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub funds: f64,
}

/// One failed CSV row as reported by the backend.
///
/// Older backends send plain strings such as `"row 7: bad date"`; those are
/// split into `row` and `message`. Structured objects are taken as-is.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row: Option<u64>,
    pub ngo_id: Option<String>,
    pub month: Option<String>,
    pub message: String,
}

fn row_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^\s*row\s*#?\s*(\d+)\s*[:\-]\s*(.*)$").expect("row prefix regex")
    })
}

impl RowError {
    pub fn from_text(text: &str) -> Self {
        if let Some(caps) = row_prefix_regex().captures(text) {
            if let Ok(row) = caps[1].parse::<u64>() {
                return Self {
                    row: Some(row),
                    message: caps[2].trim().to_string(),
                    ..Default::default()
                };
            }
        }
        Self {
            message: text.to_string(),
            ..Default::default()
        }
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "row {row}: {}", self.message)?,
            None => write!(f, "{}", self.message)?,
        }
        let context: Vec<&str> = [self.ngo_id.as_deref(), self.month.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if !context.is_empty() {
            write!(f, " [{}]", context.join(" "))?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRowError {
    Text(String),
    Structured {
        #[serde(default, deserialize_with = "lenient_opt_u64")]
        row: Option<u64>,
        #[serde(default)]
        ngo_id: Option<String>,
        #[serde(default)]
        month: Option<String>,
        #[serde(default, alias = "error")]
        message: Option<String>,
    },
    Other(Value),
}

impl<'de> Deserialize<'de> for RowError {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawRowError::deserialize(deserializer)? {
            RawRowError::Text(text) => RowError::from_text(&text),
            RawRowError::Structured {
                row,
                ngo_id,
                month,
                message,
            } => RowError {
                row,
                ngo_id,
                month,
                message: message.unwrap_or_default(),
            },
            RawRowError::Other(value) => RowError::from_text(&value.to_string()),
        })
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f.round() as u64),
        _ => None,
    }
}

// Aggregates may come back as numeric strings depending on the backend's database driver.
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_u64(&value).unwrap_or(0))
}

fn lenient_opt_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_u64(&value))
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(parsed.filter(|f| f.is_finite()).unwrap_or(0.0))
}

fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
