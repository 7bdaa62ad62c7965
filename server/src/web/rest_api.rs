use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::cleanup::archive::archive_inactive_channels;
use crate::cleanup::roles::cleanup_empty_roles;
use crate::cleanup::{
    ArchiveAction, ArchiveReport, ArchiveRequest, CleanupError, Confirmation, ConfirmError,
    KickJob,
};
use crate::engine::scanner::inactivity_cutoff;
use crate::engine::{ScanError, ScanPlan, ScanReport, ScanSlot, Scanner};
use crate::storage::{CsvError, load_ignored_ids};

use super::app_state::AppState;

pub const NOT_READY: &str = "Discord client is not ready yet. Try again shortly.";
const DEFAULT_ARCHIVE_DAYS: i64 = 90;
const DRY_RUN_COMPLETE: &str = "Dry run complete. Empty CSV generated.";

/// `{"message": …}`, the body of every non-data response.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, Json(MessageBody { message: text.into() })).into_response()
}

/// Non-standard "client closed request", used for user cancellations.
fn cancelled_status() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn scan_error_response(e: ScanError) -> Response {
    if e.is_cancelled() {
        message(cancelled_status(), e.to_string())
    } else {
        message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

fn cleanup_error_response(e: CleanupError) -> Response {
    let status = match e {
        CleanupError::Cancelled => cancelled_status(),
        CleanupError::NoFilenames
        | CleanupError::InvalidDays
        | CleanupError::NoChannelsSelected
        | CleanupError::Csv(CsvError::InvalidFilename | CsvError::NotFound(_)) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    message(status, e.to_string())
}

fn confirm_error_response(e: ConfirmError) -> Response {
    let status = match e {
        ConfirmError::Expired => StatusCode::GONE,
        ConfirmError::Mismatch | ConfirmError::Unknown => StatusCode::BAD_REQUEST,
    };
    message(status, e.to_string())
}

/// Run a job on its own task so a dropped connection cannot abandon it
/// halfway through.
async fn run_detached<T, F>(job: F) -> Result<T, Response>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(job).await.map_err(|e| {
        error!(error = %e, "job task ended abnormally");
        message(StatusCode::INTERNAL_SERVER_ERROR, "Job terminated unexpectedly.")
    })
}

// ── Request bodies ──────────────────────────────────────────

/// An empty body reads as `{}`.
fn parse_body(body: &Bytes) -> Result<Value, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body)
        .map_err(|_| message(StatusCode::BAD_REQUEST, "Request body must be valid JSON."))
}

fn parse_request<T: DeserializeOwned>(value: Value) -> Result<T, Response> {
    serde_json::from_value(value)
        .map_err(|e| message(StatusCode::BAD_REQUEST, format!("Invalid request: {e}")))
}

/// Split off `confirmationId` and fingerprint what remains. Object keys are
/// sorted, so the fingerprint ignores key order.
fn take_confirmation(endpoint: &str, value: &mut Value) -> (Option<String>, String) {
    let id = value
        .as_object_mut()
        .and_then(|o| o.remove("confirmationId"))
        .and_then(|v| v.as_str().map(str::to_string));
    (id, format!("{endpoint}:{value}"))
}

/// A list given either as a JSON array or as a delimited string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NameList {
    List(Vec<String>),
    Text(String),
}

impl NameList {
    pub fn into_names(self) -> Vec<String> {
        let raw: Vec<String> = match self {
            NameList::List(items) => items,
            NameList::Text(text) => text.split([',', '\n']).map(str::to_string).collect(),
        };
        raw.into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// A whole number given as a JSON number or a numeric string.
fn whole_days(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZeroScanRequest {
    pub channel_names: Option<NameList>,
    pub dry_run: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InactiveScanRequest {
    pub days: Option<Value>,
    pub excluded_categories: Option<NameList>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KickRequest {
    pub filenames: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleCleanupRequest {
    pub dry_run: bool,
}

impl Default for RoleCleanupRequest {
    fn default() -> Self {
        Self { dry_run: true }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArchiveChannelsRequest {
    pub days: Option<Value>,
    pub dry_run: bool,
    pub channel_ids: Vec<String>,
    pub action: Option<String>,
}

impl Default for ArchiveChannelsRequest {
    fn default() -> Self {
        Self {
            days: None,
            dry_run: true,
            channel_ids: Vec::new(),
            action: None,
        }
    }
}

// ── Response bodies ─────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub guild_name: String,
    pub csv_path: String,
    pub total_members_checked: usize,
    pub total_messages_scanned: u64,
    pub skipped_channels: Vec<String>,
    pub processed_channels: Vec<String>,
    pub preview_names: Vec<String>,
    pub more_count: usize,
    pub skipped_preview: String,
}

impl From<ScanReport> for ScanSummary {
    fn from(report: ScanReport) -> Self {
        Self {
            guild_name: report.guild_name,
            csv_path: report.csv_path.display().to_string(),
            total_members_checked: report.total_members_checked,
            total_messages_scanned: report.total_messages_scanned,
            skipped_channels: report.skipped_channels,
            processed_channels: report.processed_channels,
            preview_names: report.preview_names,
            more_count: report.more_count,
            skipped_preview: report.skipped_preview,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ZeroScanData {
    zero_message_count: usize,
    #[serde(flatten)]
    summary: ScanSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InactiveScanData {
    inactive_count: usize,
    cutoff_iso: Option<String>,
    #[serde(flatten)]
    summary: ScanSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveData {
    #[serde(flatten)]
    report: ArchiveReport,
    days: i64,
}

// ── Read-only endpoints ─────────────────────────────────────

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "discordReady": state.is_ready(),
    }))
}

pub async fn default_channels(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "channels": state.defaults.target_channels() }))
}

pub async fn inactive_defaults(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "categories": state.default_excluded_categories() }))
}

pub async fn scan_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.zero_scan.snapshot())
}

pub async fn inactive_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.inactive_scan.snapshot())
}

pub async fn csv_files(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list().await {
        Ok(files) => Json(serde_json::json!({ "files": files })).into_response(),
        Err(e) => {
            error!(error = %e, "failed to list CSV files");
            message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ── Cancellation ────────────────────────────────────────────

fn cancel_scan(slot: &ScanSlot) -> Response {
    if slot.cancel() {
        info!(note = slot.kind().cancelling, "scan cancellation requested");
        message(StatusCode::OK, "Cancellation requested.")
    } else {
        message(StatusCode::CONFLICT, slot.kind().idle)
    }
}

pub async fn cancel_zero_scan(State(state): State<Arc<AppState>>) -> Response {
    cancel_scan(&state.zero_scan)
}

pub async fn cancel_inactive_scan(State(state): State<Arc<AppState>>) -> Response {
    cancel_scan(&state.inactive_scan)
}

pub async fn cancel_kick(State(state): State<Arc<AppState>>) -> Response {
    if state.kick.cancel() {
        info!("kick cancellation requested");
        message(StatusCode::OK, "Cancellation requested.")
    } else {
        message(StatusCode::CONFLICT, "No kick job is currently running.")
    }
}

// ── Scans ───────────────────────────────────────────────────

pub async fn start_zero_scan(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    if !state.is_ready() {
        return message(StatusCode::SERVICE_UNAVAILABLE, NOT_READY);
    }
    let request: ZeroScanRequest = match parse_body(&body).and_then(parse_request) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let mut channels = request
        .channel_names
        .map(NameList::into_names)
        .unwrap_or_default();
    if channels.is_empty() {
        channels = state.defaults.target_channels().to_vec();
    }

    let kind = state.zero_scan.kind();
    let preparing = if channels.is_empty() {
        "No target channels configured."
    } else {
        kind.preparing
    };
    let Some(run) = state.zero_scan.begin(channels.len(), preparing) else {
        return message(StatusCode::CONFLICT, kind.busy);
    };

    let dry_run = request.dry_run;
    let plan = ScanPlan::zero_messages(channels.clone(), state.config.scan.zero_limits());
    info!(channels = channels.len(), dry_run, "zero-message scan requested");

    let job_state = Arc::clone(&state);
    let outcome = run_detached(async move {
        let scanner = Scanner {
            client: job_state.client.as_ref(),
            guild_id: &job_state.guild_id,
            store: &job_state.store,
        };
        let result = if dry_run {
            scanner.dry_run(&plan, run.token()).await
        } else {
            scanner.run(&plan, run.token(), &run).await
        };
        match result {
            Ok(report) if dry_run => {
                // Nothing was walked, so the counters stay at zero.
                run.complete(DRY_RUN_COMPLETE.to_string(), |_| {});
                Ok(report)
            }
            Ok(report) => {
                let found = report.members.len();
                run.complete(format!("Scan complete. Found {found} users."), |s| {
                    s.processed_channels = s.total_channels;
                    s.processed_members = s.total_members;
                });
                Ok(report)
            }
            Err(e) if e.is_cancelled() => {
                run.cancelled();
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "zero-message scan failed");
                run.failed(e.to_string());
                Err(e)
            }
        }
    })
    .await;

    let report = match outcome {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => return scan_error_response(e),
        Err(resp) => return resp,
    };

    let found = report.members.len();
    let text = if dry_run {
        DRY_RUN_COMPLETE.to_string()
    } else {
        format!("Scan complete. Found {found} users with zero messages.")
    };
    let data = ZeroScanData {
        zero_message_count: found,
        summary: report.into(),
    };
    Json(serde_json::json!({
        "message": text,
        "channels": channels,
        "data": data,
    }))
    .into_response()
}

pub async fn start_inactive_scan(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    if !state.is_ready() {
        return message(StatusCode::SERVICE_UNAVAILABLE, NOT_READY);
    }
    let request: InactiveScanRequest = match parse_body(&body).and_then(parse_request) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let days = request
        .days
        .as_ref()
        .and_then(whole_days)
        .unwrap_or(state.config.scan.default_inactive_days)
        .max(1);
    if inactivity_cutoff(Utc::now(), days).is_none() {
        return message(StatusCode::BAD_REQUEST, "Number of days is out of range.");
    }
    let extra = request
        .excluded_categories
        .map(NameList::into_names)
        .unwrap_or_default();
    let excluded = state.excluded_categories(extra);

    let kind = state.inactive_scan.kind();
    let Some(run) = state.inactive_scan.begin(0, kind.preparing) else {
        return message(StatusCode::CONFLICT, kind.busy);
    };
    info!(days, excluded = excluded.len(), "inactive scan requested");

    let job_state = Arc::clone(&state);
    let outcome = run_detached(async move {
        let ignored = load_ignored_ids(&job_state.ignore_dir).await;
        let plan = ScanPlan::inactive(
            days,
            excluded,
            ignored,
            job_state.config.scan.include_threads,
            job_state.config.scan.inactive_limits(),
        );
        let scanner = Scanner {
            client: job_state.client.as_ref(),
            guild_id: &job_state.guild_id,
            store: &job_state.store,
        };
        match scanner.run(&plan, run.token(), &run).await {
            Ok(report) => {
                let found = report.members.len();
                let processed = report.processed_channels.len();
                let total = processed + report.skipped_channels.len();
                let messages = report.total_messages_scanned;
                run.complete(
                    format!("Inactive scan complete. Found {found} users."),
                    |s| {
                        s.processed_channels = processed;
                        s.total_channels = total;
                        s.total_messages = messages;
                    },
                );
                Ok(report)
            }
            Err(e) if e.is_cancelled() => {
                run.cancelled();
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "inactive scan failed");
                run.failed(e.to_string());
                Err(e)
            }
        }
    })
    .await;

    let report = match outcome {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => return scan_error_response(e),
        Err(resp) => return resp,
    };

    let found = report.members.len();
    let cutoff_iso = report.cutoff.map(|c| c.to_rfc3339());
    let data = InactiveScanData {
        inactive_count: found,
        cutoff_iso,
        summary: report.into(),
    };
    Json(serde_json::json!({
        "message": format!("Inactive scan complete. Found {found} inactive users."),
        "data": data,
    }))
    .into_response()
}

// ── Cleanup jobs ────────────────────────────────────────────

const CONFIRM_HINT: &str =
    "Repeat the request with this confirmationId within 30 seconds to proceed.";

pub async fn kick_from_csv(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    if !state.is_ready() {
        return message(StatusCode::SERVICE_UNAVAILABLE, NOT_READY);
    }
    let mut value = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (confirmation_id, fingerprint) = take_confirmation("kick-from-csv", &mut value);
    let request: KickRequest = match parse_request(value) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let filenames: Vec<String> = request
        .filenames
        .into_iter()
        .filter(|f| !f.trim().is_empty())
        .collect();
    if filenames.is_empty() {
        return message(StatusCode::BAD_REQUEST, "Provide at least one CSV filename.");
    }

    let Some(guard) = state.kick.try_begin() else {
        return message(StatusCode::CONFLICT, "A kick job is already running.");
    };

    let dry_run = request.dry_run;
    if !dry_run {
        let prompt = || {
            format!(
                "Kicking members listed in {} file(s) cannot be undone. {CONFIRM_HINT}",
                filenames.len()
            )
        };
        match state
            .confirmations
            .check(&fingerprint, confirmation_id.as_deref(), prompt)
        {
            Ok(Confirmation::Confirmed) => {}
            Ok(Confirmation::Required(ticket)) => {
                return (StatusCode::ACCEPTED, Json(ticket)).into_response();
            }
            Err(e) => return confirm_error_response(e),
        }
    }

    info!(files = filenames.len(), dry_run, "kick job started");
    let job_state = Arc::clone(&state);
    let file_count = filenames.len();
    let outcome = run_detached(async move {
        let job = KickJob {
            client: job_state.client.as_ref(),
            guild_id: &job_state.guild_id,
            store: &job_state.store,
            ignore_dir: &job_state.ignore_dir,
            delay: job_state.kick_delay,
        };
        let result = job.run(&filenames, dry_run, guard.token()).await;
        drop(guard);
        result
    })
    .await;

    match outcome {
        Ok(Ok(results)) => {
            let text = if dry_run {
                format!("Dry run complete. {} file(s) processed.", results.len())
            } else {
                format!("Kick job finished for {} file(s).", results.len())
            };
            Json(serde_json::json!({ "message": text, "results": results })).into_response()
        }
        Ok(Err(e)) => {
            warn!(files = file_count, error = %e, "kick job stopped");
            cleanup_error_response(e)
        }
        Err(resp) => resp,
    }
}

pub async fn cleanup_roles(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    if !state.is_ready() {
        return message(StatusCode::SERVICE_UNAVAILABLE, NOT_READY);
    }
    let mut value = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (confirmation_id, fingerprint) = take_confirmation("cleanup-roles", &mut value);
    let request: RoleCleanupRequest = match parse_request(value) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let Some(guard) = state.roles.try_begin() else {
        return message(StatusCode::CONFLICT, "A role cleanup is already running.");
    };

    let dry_run = request.dry_run;
    if !dry_run {
        let prompt = || format!("Deleting empty roles cannot be undone. {CONFIRM_HINT}");
        match state
            .confirmations
            .check(&fingerprint, confirmation_id.as_deref(), prompt)
        {
            Ok(Confirmation::Confirmed) => {}
            Ok(Confirmation::Required(ticket)) => {
                return (StatusCode::ACCEPTED, Json(ticket)).into_response();
            }
            Err(e) => return confirm_error_response(e),
        }
    }

    let job_state = Arc::clone(&state);
    let outcome = run_detached(async move {
        let result =
            cleanup_empty_roles(job_state.client.as_ref(), &job_state.guild_id, dry_run).await;
        drop(guard);
        result
    })
    .await;

    match outcome {
        Ok(Ok(report)) => {
            let text = if report.deletable_role_count == 0 {
                "No empty roles found.".to_string()
            } else if dry_run {
                format!(
                    "Found {} empty role(s) ready for deletion.",
                    report.deletable_role_count
                )
            } else {
                format!("Deleted {} empty role(s).", report.deleted_role_count)
            };
            Json(serde_json::json!({ "message": text, "data": report })).into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "role cleanup failed");
            cleanup_error_response(e)
        }
        Err(resp) => resp,
    }
}

pub async fn inactive_channels(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    if !state.is_ready() {
        return message(StatusCode::SERVICE_UNAVAILABLE, NOT_READY);
    }
    let mut value = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (confirmation_id, fingerprint) = take_confirmation("inactive-channels", &mut value);
    let request: ArchiveChannelsRequest = match parse_request(value) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let Some(guard) = state.archive.try_begin() else {
        return message(StatusCode::CONFLICT, "An archive job is already running.");
    };

    let days = match &request.days {
        None => DEFAULT_ARCHIVE_DAYS,
        Some(v) => match whole_days(v) {
            Some(d) if d > 0 && inactivity_cutoff(Utc::now(), d).is_some() => d,
            _ => return cleanup_error_response(CleanupError::InvalidDays),
        },
    };
    let action = match request.action.as_deref() {
        Some("delete") => ArchiveAction::Delete,
        _ => ArchiveAction::Archive,
    };
    let dry_run = request.dry_run;
    let channel_ids: Vec<String> = if dry_run {
        Vec::new()
    } else {
        request
            .channel_ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect()
    };
    if !dry_run && channel_ids.is_empty() {
        return cleanup_error_response(CleanupError::NoChannelsSelected);
    }

    if !dry_run {
        let verb = match action {
            ArchiveAction::Archive => "Archiving",
            ArchiveAction::Delete => "Deleting",
        };
        let prompt = || format!("{verb} {} channel(s). {CONFIRM_HINT}", channel_ids.len());
        match state
            .confirmations
            .check(&fingerprint, confirmation_id.as_deref(), prompt)
        {
            Ok(Confirmation::Confirmed) => {}
            Ok(Confirmation::Required(ticket)) => {
                return (StatusCode::ACCEPTED, Json(ticket)).into_response();
            }
            Err(e) => return confirm_error_response(e),
        }
    }

    let archive_request = ArchiveRequest {
        days,
        dry_run,
        channel_ids,
        action,
        excluded_categories: state.default_excluded_categories(),
    };
    let job_state = Arc::clone(&state);
    let outcome = run_detached(async move {
        let result = archive_inactive_channels(
            job_state.client.as_ref(),
            &job_state.guild_id,
            &archive_request,
        )
        .await;
        drop(guard);
        result
    })
    .await;

    match outcome {
        Ok(Ok(report)) => {
            let text = match (dry_run, action) {
                (true, _) if report.inactive_channels.is_empty() => {
                    "No inactive channels found.".to_string()
                }
                (true, _) => format!(
                    "Found {} inactive channel(s).",
                    report.inactive_channels.len()
                ),
                (false, ArchiveAction::Archive) => {
                    format!("Archived {} channel(s).", report.processed_count)
                }
                (false, ArchiveAction::Delete) => {
                    format!("Deleted {} channel(s).", report.processed_count)
                }
            };
            let data = ArchiveData { report, days };
            Json(serde_json::json!({ "message": text, "data": data })).into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "channel archive failed");
            cleanup_error_response(e)
        }
        Err(resp) => resp,
    }
}
