use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;

use crate::api::{
    ApiError, ApiFuture, DashboardSummary, JobStatusResponse, ReportPayload, ReportsApi,
    RowError, SelectedFile, UploadResponse,
};
use crate::dashboard::{self, DashboardError};
use crate::notify::{Level, MemoryNotifier, Notifier};
use crate::report::{self, ReportError, ReportForm};
use crate::session::{ActiveSession, AdminSession};
use crate::upload::{
    self, BulkUpload, JobOutcome, JobPoller, JobStatus, UploadError, UploadPhase,
    DEFAULT_POLL_INTERVAL,
};
use crate::utils::Month;

/// Scripted backend. Status replies are served in order; `None` stands for
/// a transient failure and an empty script keeps answering "processing".
#[derive(Default)]
struct FakeApi {
    insert_reply: Mutex<Option<(u16, String)>>,
    upload_job_id: Mutex<Option<String>>,
    upload_error: Mutex<Option<(u16, String)>>,
    statuses: Mutex<VecDeque<Option<JobStatusResponse>>>,
    dashboard_reply: Mutex<Option<(u16, String)>>,
    last_report: Mutex<Option<ReportPayload>>,
    last_month: Mutex<Option<Month>>,
    status_times: Mutex<Vec<Instant>>,
    insert_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    status_calls: AtomicUsize,
    dashboard_calls: AtomicUsize,
}

impl FakeApi {
    fn with_job(job_id: &str) -> Self {
        let api = Self::default();
        *api.upload_job_id.lock().unwrap() = Some(job_id.to_string());
        api
    }

    fn script(self, statuses: Vec<Option<JobStatusResponse>>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn status_times(&self) -> Vec<Instant> {
        self.status_times.lock().unwrap().clone()
    }
}

fn status_error(endpoint: &str, status: u16, body: &str) -> ApiError {
    ApiError::Status {
        endpoint: endpoint.to_string(),
        status,
        body: body.to_string(),
    }
}

fn snapshot(status: &str, total: u64, processed: u64, failed: u64) -> Option<JobStatusResponse> {
    Some(JobStatusResponse {
        status: Some(status.to_string()),
        total,
        processed,
        success: processed - failed,
        failed,
        errors: Vec::new(),
    })
}

impl ReportsApi for FakeApi {
    fn insert_report<'a>(&'a self, report: &'a ReportPayload) -> ApiFuture<'a, String> {
        Box::pin(async move {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_report.lock().unwrap() = Some(report.clone());
            match self.insert_reply.lock().unwrap().clone() {
                None => Ok(String::new()),
                Some((200, message)) => Ok(message),
                Some((status, body)) => Err(status_error("/insertreport", status, &body)),
            }
        })
    }

    fn upload_reports<'a>(&'a self, _file: &'a SelectedFile) -> ApiFuture<'a, UploadResponse> {
        Box::pin(async move {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            if let Some((status, body)) = self.upload_error.lock().unwrap().clone() {
                return Err(status_error("/uploadreports", status, &body));
            }
            match self.upload_job_id.lock().unwrap().clone() {
                Some(id) => Ok(UploadResponse::with_job_id(id)),
                None => Ok(UploadResponse::default()),
            }
        })
    }

    fn job_status<'a>(&'a self, _job_id: &'a str) -> ApiFuture<'a, JobStatusResponse> {
        Box::pin(async move {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            self.status_times.lock().unwrap().push(Instant::now());
            let next = self.statuses.lock().unwrap().pop_front();
            match next {
                Some(Some(response)) => Ok(response),
                Some(None) => Err(status_error("/job-status", 503, "busy")),
                None => Ok(snapshot("processing", 10, 1, 0).unwrap_or_default()),
            }
        })
    }

    fn dashboard(&self, month: Month) -> ApiFuture<'_, DashboardSummary> {
        Box::pin(async move {
            self.dashboard_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_month.lock().unwrap() = Some(month);
            match self.dashboard_reply.lock().unwrap().clone() {
                None => Ok(DashboardSummary {
                    ngos: 4,
                    people: 1_500,
                    events: 12,
                    funds: 82_000.0,
                }),
                Some((status, body)) => Err(status_error("/dashboard", status, &body)),
            }
        })
    }
}

fn csv(name: &str) -> SelectedFile {
    SelectedFile::new(
        name,
        Some("text/csv".to_string()),
        format!("{}\n{}\n", upload::CSV_HEADER, upload::CSV_EXAMPLE_ROW).into_bytes(),
    )
}

fn flow(api: &Arc<FakeApi>, notifier: &Arc<MemoryNotifier>) -> BulkUpload {
    BulkUpload::new(
        Arc::clone(api) as Arc<dyn ReportsApi>,
        Arc::clone(notifier) as Arc<dyn Notifier>,
    )
}

fn messages(notifier: &MemoryNotifier, level: Level) -> Vec<String> {
    notifier
        .notifications()
        .into_iter()
        .filter(|n| n.level == level)
        .map(|n| n.message)
        .collect()
}

fn filled_form() -> ReportForm {
    ReportForm {
        ngo_id: "NGO001".to_string(),
        month: "2025-01".to_string(),
        people_helped: "500".to_string(),
        events_conducted: "10".to_string(),
        funds_utilized: "250000".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn non_csv_selection_stays_idle() {
    let api = Arc::new(FakeApi::with_job("J1"));
    let notifier = Arc::new(MemoryNotifier::new());
    let mut bulk = flow(&api, &notifier);

    let xlsx = SelectedFile::new("reports.xlsx", None, b"PK".to_vec());
    assert!(matches!(
        bulk.select_file(xlsx),
        Err(UploadError::NotCsv { .. })
    ));
    assert!(matches!(bulk.phase(), UploadPhase::Idle));
    assert!(!bulk.can_upload());
    assert_eq!(
        messages(&notifier, Level::Error),
        vec![upload::INVALID_FILE_MESSAGE]
    );

    assert!(matches!(bulk.upload().await, Err(UploadError::NoFile)));
    assert_eq!(api.upload_calls.load(Ordering::SeqCst), 0);
    assert_eq!(api.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn first_fetch_is_immediate_then_on_interval() {
    let api = Arc::new(FakeApi::with_job("J1"));
    let notifier = Arc::new(MemoryNotifier::new());
    let mut bulk = flow(&api, &notifier);
    bulk.select_file(csv("reports.csv")).unwrap();

    let started = Instant::now();
    assert_eq!(bulk.upload().await.unwrap(), "J1");
    assert!(matches!(bulk.phase(), UploadPhase::Polling { job_id } if job_id == "J1"));
    assert_eq!(bulk.job().map(|j| j.status.clone()), Some(JobStatus::Pending));

    bulk.next_update().await.unwrap();
    bulk.next_update().await.unwrap();

    let times = api.status_times();
    assert_eq!(times.len(), 2);
    assert_eq!(times[0] - started, Duration::ZERO);
    assert_eq!(times[1] - times[0], DEFAULT_POLL_INTERVAL);
    bulk.teardown();
}

#[tokio::test(start_paused = true)]
async fn completed_job_stops_polling_and_notifies_once() {
    let mut done = snapshot("completed", 10, 10, 1);
    if let Some(response) = done.as_mut() {
        response.errors = vec![RowError::from_text("row 7: bad date")];
    }
    let api = Arc::new(FakeApi::with_job("J1").script(vec![
        snapshot("processing", 10, 4, 0),
        snapshot("processing", 10, 8, 1),
        done,
    ]));
    let notifier = Arc::new(MemoryNotifier::new());
    let mut bulk = flow(&api, &notifier);
    bulk.select_file(csv("reports.csv")).unwrap();
    bulk.upload().await.unwrap();

    let mut seen = Vec::new();
    let outcome = bulk
        .wait_for_outcome(|job| seen.push(job.progress_percent()))
        .await;

    assert_eq!(outcome, Some(JobOutcome::Completed));
    assert_eq!(seen, vec![40, 80, 100]);
    let job = bulk.job().unwrap();
    assert_eq!((job.success, job.failed), (9, 1));
    assert_eq!(job.errors[0].row, Some(7));
    assert!(matches!(
        bulk.phase(),
        UploadPhase::Terminal(JobOutcome::Completed)
    ));
    assert!(!bulk.is_polling());
    assert_eq!(
        messages(&notifier, Level::Success),
        vec![upload::UPLOADED_MESSAGE, upload::COMPLETED_MESSAGE]
    );

    tokio::time::sleep(DEFAULT_POLL_INTERVAL * 10).await;
    assert_eq!(api.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_job_notifies_error_once() {
    let api = Arc::new(FakeApi::default().script(vec![
        snapshot("processing", 3, 1, 1),
        snapshot("FAILED", 3, 3, 3),
    ]));
    let notifier = Arc::new(MemoryNotifier::new());
    let mut bulk = flow(&api, &notifier);
    bulk.follow("J7".to_string());

    assert_eq!(bulk.wait_for_outcome(|_| {}).await, Some(JobOutcome::Failed));
    assert_eq!(messages(&notifier, Level::Error), vec![upload::FAILED_MESSAGE]);
    assert_eq!(notifier.count(Level::Success), 0);

    tokio::time::sleep(DEFAULT_POLL_INTERVAL * 5).await;
    assert_eq!(api.status_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn teardown_stops_further_fetches() {
    let api = Arc::new(FakeApi::default());
    let notifier = Arc::new(MemoryNotifier::new());
    let mut bulk = flow(&api, &notifier);
    bulk.follow("J1".to_string());
    bulk.next_update().await.unwrap();
    assert_eq!(api.status_calls(), 1);

    bulk.teardown();
    assert!(!bulk.is_polling());
    assert!(matches!(bulk.phase(), UploadPhase::Idle));

    tokio::time::sleep(DEFAULT_POLL_INTERVAL * 10).await;
    assert_eq!(api.status_calls(), 1);
    assert!(bulk.next_update().await.is_none());
    assert_eq!(notifier.notifications().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_flow_stops_polling() {
    let api = Arc::new(FakeApi::default());
    let notifier = Arc::new(MemoryNotifier::new());
    let mut bulk = flow(&api, &notifier);
    bulk.follow("J1".to_string());
    bulk.next_update().await.unwrap();
    drop(bulk);

    tokio::time::sleep(DEFAULT_POLL_INTERVAL * 10).await;
    assert_eq!(api.status_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_status_errors_keep_polling() {
    let api = Arc::new(FakeApi::default().script(vec![
        None,
        snapshot("processing", 2, 1, 0),
        None,
        snapshot("completed", 2, 2, 0),
    ]));
    let notifier = Arc::new(MemoryNotifier::new());
    let mut bulk = flow(&api, &notifier);
    bulk.follow("J1".to_string());

    let mut updates = 0;
    let outcome = bulk.wait_for_outcome(|_| updates += 1).await;
    assert_eq!(outcome, Some(JobOutcome::Completed));
    assert_eq!(updates, 2);
    assert_eq!(api.status_calls(), 4);
    assert_eq!(notifier.count(Level::Error), 0);
}

#[tokio::test(start_paused = true)]
async fn upload_without_job_id_returns_to_idle() {
    let api = Arc::new(FakeApi::default());
    let notifier = Arc::new(MemoryNotifier::new());
    let mut bulk = flow(&api, &notifier);
    bulk.select_file(csv("reports.csv")).unwrap();

    assert!(matches!(bulk.upload().await, Err(UploadError::MissingJobId)));
    assert!(matches!(bulk.phase(), UploadPhase::Idle));
    assert!(bulk.can_upload());
    assert_eq!(
        messages(&notifier, Level::Error),
        vec![upload::MISSING_JOB_ID_MESSAGE]
    );

    tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3).await;
    assert_eq!(api.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn selection_is_refused_while_processing() {
    let api = Arc::new(FakeApi::with_job("J1"));
    let notifier = Arc::new(MemoryNotifier::new());
    let mut bulk = flow(&api, &notifier);
    bulk.select_file(csv("first.csv")).unwrap();
    bulk.upload().await.unwrap();

    assert!(matches!(
        bulk.select_file(csv("second.csv")),
        Err(UploadError::Busy { .. })
    ));
    assert_eq!(
        bulk.selected_file().map(|f| f.file_name.as_str()),
        Some("first.csv")
    );
    bulk.teardown();
}

#[tokio::test(start_paused = true)]
async fn poller_stream_ends_after_terminal_snapshot() {
    let api = Arc::new(FakeApi::default().script(vec![
        snapshot("pending", 0, 0, 0),
        snapshot("completed", 5, 5, 0),
    ]));
    let notifier = Arc::new(MemoryNotifier::new());
    let (poller, rx) = JobPoller::start(
        Arc::clone(&api) as Arc<dyn ReportsApi>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        "J3",
        Duration::from_millis(500),
    );
    assert_eq!(poller.job_id(), "J3");

    let statuses: Vec<JobStatus> = upload::into_stream(rx).map(|job| job.status).collect().await;
    assert_eq!(statuses, vec![JobStatus::Pending, JobStatus::Completed]);
    poller.finished().await;
    assert_eq!(api.status_calls(), 2);
    assert_eq!(
        messages(&notifier, Level::Success),
        vec![upload::COMPLETED_MESSAGE]
    );
}

#[tokio::test(start_paused = true)]
async fn polling_does_not_wait_for_a_reader() {
    let mut script = vec![snapshot("processing", 30, 1, 0); 25];
    script.push(snapshot("completed", 30, 30, 0));
    let api = Arc::new(FakeApi::default().script(script));
    let notifier = Arc::new(MemoryNotifier::new());
    let mut bulk = flow(&api, &notifier);
    bulk.follow("J1".to_string());

    tokio::time::sleep(DEFAULT_POLL_INTERVAL * 40).await;
    assert_eq!(api.status_calls(), 26);
    assert_eq!(
        messages(&notifier, Level::Success),
        vec![upload::COMPLETED_MESSAGE]
    );

    let latest = bulk.next_update().await.map(|job| job.status.clone());
    assert_eq!(latest, Some(JobStatus::Completed));
    assert!(matches!(
        bulk.phase(),
        UploadPhase::Terminal(JobOutcome::Completed)
    ));
    assert!(bulk.next_update().await.is_none());
    assert_eq!(notifier.count(Level::Success), 1);
}

#[tokio::test]
async fn plain_text_upload_reply_takes_the_missing_job_id_path() {
    let (base, server) =
        crate::api::tests::one_shot_server("200 OK", "text/plain", "File received").await;
    let api = Arc::new(crate::api::tests::local_api(base));
    let notifier = Arc::new(MemoryNotifier::new());
    let mut bulk = BulkUpload::new(
        api as Arc<dyn ReportsApi>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    );
    bulk.select_file(csv("reports.csv")).unwrap();

    assert!(matches!(bulk.upload().await, Err(UploadError::MissingJobId)));
    assert!(matches!(bulk.phase(), UploadPhase::Idle));
    assert!(!bulk.is_polling());
    assert_eq!(
        messages(&notifier, Level::Error),
        vec![upload::MISSING_JOB_ID_MESSAGE]
    );
    server.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_upload_returns_to_idle_and_allows_retry() {
    let api = Arc::new(FakeApi::with_job("J2"));
    *api.upload_error.lock().unwrap() =
        Some((400, r#"{"error":"Missing column funds_utilized"}"#.to_string()));
    let notifier = Arc::new(MemoryNotifier::new());
    let mut bulk = flow(&api, &notifier);
    bulk.select_file(csv("reports.csv")).unwrap();

    assert!(matches!(bulk.upload().await, Err(UploadError::Api { .. })));
    assert!(matches!(bulk.phase(), UploadPhase::Idle));
    assert!(bulk.can_upload());
    assert_eq!(
        messages(&notifier, Level::Error),
        vec!["Missing column funds_utilized"]
    );
    assert_eq!(api.status_calls(), 0);

    *api.upload_error.lock().unwrap() = None;
    assert_eq!(bulk.upload().await.unwrap(), "J2");
    assert_eq!(api.upload_calls.load(Ordering::SeqCst), 2);
    bulk.teardown();
}

#[tokio::test]
async fn empty_field_blocks_submission() {
    let api = FakeApi::default();
    let notifier = MemoryNotifier::new();
    let mut form = ReportForm {
        events_conducted: "   ".to_string(),
        ..filled_form()
    };

    let err = report::submit_report(&api, &notifier, &mut form)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReportError::MissingFields { ref fields } if fields == &vec!["events_conducted"]
    ));
    assert_eq!(api.insert_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        messages(&notifier, Level::Error),
        vec![report::MISSING_FIELDS_MESSAGE]
    );
    assert_eq!(form.ngo_id, "NGO001");
}

#[tokio::test]
async fn successful_submission_clears_form() {
    let api = FakeApi::default();
    *api.insert_reply.lock().unwrap() = Some((200, "Report saved".to_string()));
    let notifier = MemoryNotifier::new();
    let mut form = filled_form();

    let message = report::submit_report(&api, &notifier, &mut form).await.unwrap();
    assert_eq!(message, "Report saved");
    assert_eq!(form, ReportForm::default());
    assert_eq!(messages(&notifier, Level::Success), vec!["Report saved"]);

    let sent = api.last_report.lock().unwrap().clone().unwrap();
    assert_eq!(sent.month.to_string(), "2025-01");
    assert_eq!(sent.people_helped, 500);
    assert_eq!(sent.funds_utilized, 250_000.0);
}

#[tokio::test]
async fn backend_rejection_is_shown_verbatim() {
    let api = FakeApi::default();
    *api.insert_reply.lock().unwrap() = Some((
        409,
        r#"{"error":"Report for NGO001 2025-01 already exists"}"#.to_string(),
    ));
    let notifier = MemoryNotifier::new();
    let mut form = filled_form();

    assert!(report::submit_report(&api, &notifier, &mut form).await.is_err());
    assert_eq!(
        messages(&notifier, Level::Error),
        vec!["Report for NGO001 2025-01 already exists"]
    );
    assert_eq!(form, filled_form());
}

#[tokio::test]
async fn bodiless_failure_falls_back_to_generic_message() {
    let api = FakeApi::default();
    *api.insert_reply.lock().unwrap() = Some((500, String::new()));
    let notifier = MemoryNotifier::new();

    assert!(report::submit_report(&api, &notifier, &mut filled_form())
        .await
        .is_err());
    assert_eq!(
        messages(&notifier, Level::Error),
        vec![report::SERVER_ERROR_MESSAGE]
    );
}

#[tokio::test]
async fn dashboard_without_session_makes_no_request() {
    let api = FakeApi::default();
    let notifier = MemoryNotifier::new();
    let month: Month = "2025-12".parse().unwrap();

    let err = dashboard::fetch_summary(&api, &notifier, &ActiveSession::default(), month)
        .await
        .unwrap_err();
    assert!(matches!(err, DashboardError::Session(_)));
    assert_eq!(api.dashboard_calls.load(Ordering::SeqCst), 0);
    assert_eq!(notifier.count(Level::Error), 1);
}

#[tokio::test]
async fn dashboard_loads_requested_month() {
    let api = FakeApi::default();
    let notifier = MemoryNotifier::new();
    let session = ActiveSession::from_token("admin-token").unwrap();
    let month: Month = "2025-12".parse().unwrap();

    let summary = dashboard::fetch_summary(&api, &notifier, &session, month)
        .await
        .unwrap();
    assert_eq!(summary.month, month);
    assert_eq!(summary.totals.people, 1_500);
    assert_eq!(*api.last_month.lock().unwrap(), Some(month));
    assert_eq!(
        messages(&notifier, Level::Success),
        vec![dashboard::LOADED_MESSAGE]
    );
}

#[tokio::test]
async fn dashboard_reports_rejected_session() {
    let api = FakeApi::default();
    *api.dashboard_reply.lock().unwrap() = Some((401, "unauthorized".to_string()));
    let notifier = MemoryNotifier::new();
    let session = ActiveSession::from_token("stale").unwrap();

    let err = dashboard::fetch_summary(&api, &notifier, &session, "2025-06".parse().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, DashboardError::Api { .. }));
    assert_eq!(
        messages(&notifier, Level::Error),
        vec![dashboard::REJECTED_MESSAGE]
    );
}

#[tokio::test]
async fn dashboard_server_error_is_generic() {
    let api = FakeApi::default();
    *api.dashboard_reply.lock().unwrap() = Some((500, String::new()));
    let notifier = MemoryNotifier::new();
    let month: Month = "2025-06".parse().unwrap();
    let expired = ActiveSession::new(Some(AdminSession::new("t", Some(10), 0).unwrap()), 100);
    let live = ActiveSession::from_token("t").unwrap();

    assert!(dashboard::fetch_summary(&api, &notifier, &expired, month)
        .await
        .is_err());
    assert_eq!(api.dashboard_calls.load(Ordering::SeqCst), 0);

    assert!(dashboard::fetch_summary(&api, &notifier, &live, month)
        .await
        .is_err());
    assert_eq!(api.dashboard_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        notifier.notifications().last().map(|n| n.message.clone()),
        Some(dashboard::FETCH_FAILED_MESSAGE.to_string())
    );
}
