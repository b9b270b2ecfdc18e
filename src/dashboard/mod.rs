use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::api::{ApiError, DashboardSummary, ReportsApi};
use crate::notify::Notifier;
use crate::session::{SessionError, SessionGate};
use crate::utils::{self, Month};

pub const DEFAULT_CURRENCY_SYMBOL: &str = "₹";
pub const LOADED_MESSAGE: &str = "Dashboard data loaded";
pub const FETCH_FAILED_MESSAGE: &str = "Failed to fetch dashboard data";
pub const REJECTED_MESSAGE: &str = "Admin session rejected by backend";

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("dashboard fetch failed: {source}")]
    Api {
        #[source]
        source: ApiError,
    },
}

/// Aggregates for one month, ready for display.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MonthlySummary {
    pub month: Month,
    #[serde(flatten)]
    pub totals: DashboardSummary,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SummaryCard {
    pub title: &'static str,
    pub value: String,
}

impl MonthlySummary {
    pub fn cards(&self, currency_symbol: &str) -> [SummaryCard; 4] {
        [
            SummaryCard {
                title: "Total NGOs Reporting",
                value: utils::format_grouped(self.totals.ngos),
            },
            SummaryCard {
                title: "Total People Helped",
                value: utils::format_grouped(self.totals.people),
            },
            SummaryCard {
                title: "Total Events Conducted",
                value: utils::format_grouped(self.totals.events),
            },
            SummaryCard {
                title: "Total Funds Utilized",
                value: format_currency(self.totals.funds, currency_symbol),
            },
        ]
    }
}

pub fn format_currency(amount: f64, symbol: &str) -> String {
    format!("{symbol}{}", utils::format_grouped_decimal(amount))
}

/// Fetches the admin summary for `month`.
///
/// The session gate is checked first and only decides whether a request is
/// worth sending; the backend stays the authority on access.
pub async fn fetch_summary(
    api: &dyn ReportsApi,
    notifier: &dyn Notifier,
    gate: &dyn SessionGate,
    month: Month,
) -> Result<MonthlySummary, DashboardError> {
    if let Err(err) = gate.check() {
        notifier.error(&err.to_string());
        return Err(err.into());
    }

    info!(month = %month, "fetching dashboard");
    match api.dashboard(month).await {
        Ok(totals) => {
            notifier.success(LOADED_MESSAGE);
            Ok(MonthlySummary { month, totals })
        }
        Err(err) => {
            error!(error = %err, month = %month, "dashboard fetch failed");
            if err.is_unauthorized() {
                notifier.error(REJECTED_MESSAGE);
            } else {
                notifier.error(FETCH_FAILED_MESSAGE);
            }
            Err(DashboardError::Api { source: err })
        }
    }
}
