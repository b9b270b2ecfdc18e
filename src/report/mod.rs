use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ApiError, ReportPayload, ReportsApi};
use crate::notify::Notifier;
use crate::utils::{self, Month};

pub const MISSING_FIELDS_MESSAGE: &str = "Please fill all required fields";
pub const SUBMITTED_MESSAGE: &str = "Report submitted successfully!";
pub const SERVER_ERROR_MESSAGE: &str = "Server error. Please try again.";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("missing required fields: {}", .fields.join(", "))]
    MissingFields { fields: Vec<&'static str> },

    #[error("invalid {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("report submission failed: {source}")]
    Api {
        #[source]
        source: ApiError,
    },
}

/// Raw form input, exactly as typed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportForm {
    pub ngo_id: String,
    pub month: String,
    pub people_helped: String,
    pub events_conducted: String,
    pub funds_utilized: String,
}

impl ReportForm {
    fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("ngo_id", self.ngo_id.as_str()),
            ("month", self.month.as_str()),
            ("people_helped", self.people_helped.as_str()),
            ("events_conducted", self.events_conducted.as_str()),
            ("funds_utilized", self.funds_utilized.as_str()),
        ]
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        self.fields()
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Checks presence first, then parses the typed fields.
    pub fn validate(&self) -> Result<ReportPayload, ReportError> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(ReportError::MissingFields { fields: missing });
        }

        let month: Month = self
            .month
            .parse()
            .map_err(|message| ReportError::InvalidField {
                field: "month",
                message,
            })?;
        let people_helped = utils::parse_non_negative_int(&self.people_helped).map_err(|message| {
            ReportError::InvalidField {
                field: "people_helped",
                message,
            }
        })?;
        let events_conducted =
            utils::parse_non_negative_int(&self.events_conducted).map_err(|message| {
                ReportError::InvalidField {
                    field: "events_conducted",
                    message,
                }
            })?;
        let funds_utilized =
            utils::parse_non_negative_decimal(&self.funds_utilized).map_err(|message| {
                ReportError::InvalidField {
                    field: "funds_utilized",
                    message,
                }
            })?;

        Ok(ReportPayload {
            ngo_id: self.ngo_id.trim().to_string(),
            month,
            people_helped,
            events_conducted,
            funds_utilized,
        })
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Validates and posts one report. On success the form is reset; on any
/// failure it is left as entered so the user can correct and retry.
pub async fn submit_report(
    api: &dyn ReportsApi,
    notifier: &dyn Notifier,
    form: &mut ReportForm,
) -> Result<String, ReportError> {
    let payload = match form.validate() {
        Ok(payload) => payload,
        Err(err) => {
            match &err {
                ReportError::MissingFields { .. } => notifier.error(MISSING_FIELDS_MESSAGE),
                other => notifier.error(&other.to_string()),
            }
            return Err(err);
        }
    };

    info!(ngo_id = %payload.ngo_id, month = %payload.month, "submitting report");
    match api.insert_report(&payload).await {
        Ok(message) => {
            let message = if message.trim().is_empty() {
                SUBMITTED_MESSAGE.to_string()
            } else {
                message
            };
            notifier.success(&message);
            form.clear();
            Ok(message)
        }
        Err(err) => {
            warn!(error = %err, "report submission failed");
            let message = err
                .backend_message()
                .unwrap_or_else(|| SERVER_ERROR_MESSAGE.to_string());
            notifier.error(&message);
            Err(ReportError::Api { source: err })
        }
    }
}
