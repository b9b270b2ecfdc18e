pub mod types;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::utils::Month;

pub use types::{
    DashboardSummary, JobStatusResponse, ReportPayload, RowError, SelectedFile, UploadResponse,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid base URL: {url}")]
    InvalidBaseUrl { url: String },

    #[error("invalid header '{header}': {message}")]
    InvalidHeader { header: String, message: String },

    #[error("failed to setup proxy: {proxy}: {source}")]
    ProxySetup {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl ApiError {
    /// The message the backend put in an error response, if it sent a usable one.
    pub fn backend_message(&self) -> Option<String> {
        match self {
            ApiError::Status { body, .. } => extract_message(body),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

/// Pulls a human message out of a response body: a JSON string, the `error`
/// or `message` field of a JSON object, or the raw text.
pub fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::String(s)) => non_empty(s),
        Ok(Value::Object(map)) => ["error", "message"]
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(|v| match v {
                Value::String(s) => non_empty(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .or_else(|| Some(trimmed.to_string())),
        _ => Some(trimmed.to_string()),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// The backend endpoints this client consumes.
pub trait ReportsApi: Send + Sync {
    /// `POST /insertreport`; resolves to the backend's confirmation text.
    fn insert_report<'a>(&'a self, report: &'a ReportPayload) -> ApiFuture<'a, String>;

    /// `POST /uploadreports` as multipart with a single `file` field.
    fn upload_reports<'a>(&'a self, file: &'a SelectedFile) -> ApiFuture<'a, UploadResponse>;

    /// `GET /job-status/{job_id}`.
    fn job_status<'a>(&'a self, job_id: &'a str) -> ApiFuture<'a, JobStatusResponse>;

    /// `GET /dashboard?month=YYYY-MM`.
    fn dashboard(&self, month: Month) -> ApiFuture<'_, DashboardSummary>;
}

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub proxy: Option<String>,
    pub header: Option<String>,
    pub token: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_seconds: 30,
            proxy: None,
            header: None,
            token: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpApi {
    pub fn new(options: &ClientOptions) -> Result<Self, ApiError> {
        let base_url = parse_base_url(&options.base_url)?;
        let client = build_client(options)?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &reqwest::Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, ApiError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ApiError::InvalidBaseUrl {
                    url: self.base_url.to_string(),
                })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder, endpoint: &str) -> Result<String, ApiError> {
        debug!(endpoint, "sending request");
        let response = request.send().await.map_err(|e| ApiError::Transport {
            endpoint: endpoint.to_string(),
            source: e,
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| ApiError::Transport {
            endpoint: endpoint.to_string(),
            source: e,
        })?;
        debug!(endpoint, status = status.as_u16(), bytes = body.len(), "response received");
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::Decode {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}

impl ReportsApi for HttpApi {
    fn insert_report<'a>(&'a self, report: &'a ReportPayload) -> ApiFuture<'a, String> {
        Box::pin(async move {
            let url = self.endpoint(&["insertreport"])?;
            let body = self
                .send(self.client.post(url).json(report), "/insertreport")
                .await?;
            Ok(extract_message(&body).unwrap_or_default())
        })
    }

    fn upload_reports<'a>(&'a self, file: &'a SelectedFile) -> ApiFuture<'a, UploadResponse> {
        Box::pin(async move {
            let url = self.endpoint(&["uploadreports"])?;
            let mime = file.media_type.as_deref().unwrap_or("text/csv");
            let part = reqwest::multipart::Part::bytes(file.contents.clone())
                .file_name(file.file_name.clone())
                .mime_str(mime)
                .map_err(|e| ApiError::Transport {
                    endpoint: "/uploadreports".to_string(),
                    source: e,
                })?;
            let form = reqwest::multipart::Form::new().part("file", part);
            let body = self
                .send(self.client.post(url).multipart(form), "/uploadreports")
                .await?;
            // any accepted upload counts; a reply without a job object has no job id
            Ok(serde_json::from_str(&body).unwrap_or_else(|e| {
                debug!(error = %e, "upload reply is not a job object");
                UploadResponse::default()
            }))
        })
    }

    fn job_status<'a>(&'a self, job_id: &'a str) -> ApiFuture<'a, JobStatusResponse> {
        Box::pin(async move {
            let url = self.endpoint(&["job-status", job_id])?;
            let body = self.send(self.client.get(url), "/job-status").await?;
            decode("/job-status", &body)
        })
    }

    fn dashboard(&self, month: Month) -> ApiFuture<'_, DashboardSummary> {
        Box::pin(async move {
            let mut url = self.endpoint(&["dashboard"])?;
            url.query_pairs_mut()
                .append_pair("month", &month.to_string());
            let body = self.send(self.client.get(url), "/dashboard").await?;
            decode("/dashboard", &body)
        })
    }
}

fn parse_base_url(raw: &str) -> Result<reqwest::Url, ApiError> {
    let url = reqwest::Url::parse(raw.trim()).map_err(|_| ApiError::InvalidBaseUrl {
        url: raw.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ApiError::InvalidBaseUrl {
            url: raw.to_string(),
        });
    }
    Ok(url)
}

fn build_client(options: &ClientOptions) -> Result<reqwest::Client, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::USER_AGENT,
        HeaderValue::from_static(concat!("ngoreport/", env!("CARGO_PKG_VERSION"))),
    );

    if let Some(raw) = options.header.as_deref().filter(|h| !h.trim().is_empty()) {
        let (name, value) = crate::utils::parse_header_line(raw).map_err(|message| {
            ApiError::InvalidHeader {
                header: raw.to_string(),
                message,
            }
        })?;
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ApiError::InvalidHeader {
            header: raw.to_string(),
            message: e.to_string(),
        })?;
        let value = HeaderValue::from_str(&value).map_err(|e| ApiError::InvalidHeader {
            header: raw.to_string(),
            message: e.to_string(),
        })?;
        headers.insert(name, value);
    }

    if let Some(token) = options.token.as_deref().filter(|t| !t.trim().is_empty()) {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim())).map_err(|e| {
            ApiError::InvalidHeader {
                header: "Authorization".to_string(),
                message: e.to_string(),
            }
        })?;
        value.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, value);
    }

    let mut builder = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(options.timeout_seconds.max(1)));

    if let Some(proxy) = options.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
        let proxy = reqwest::Proxy::all(proxy).map_err(|e| ApiError::ProxySetup {
            proxy: proxy.to_string(),
            source: e,
        })?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| ApiError::ClientBuild { source: e })
}
