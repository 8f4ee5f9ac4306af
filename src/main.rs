//! # Puter Console
//!
//! A local HTTP server that drives the Puter cloud platform through its
//! existing `puter` CLI, plus a direct API client for the one capability
//! (workers) the CLI does not expose.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────────┐
//! │  Frontend   │────▶│  Axum HTTP   │────▶│  CommandBridge  │──▶ puter CLI
//! │  (static/)  │     │  Server      │     │  (bridge.rs)    │    subprocess
//! └─────────────┘     └──────────────┘     └─────────────────┘
//!                            │
//!                            ▼
//!                     ┌──────────────┐
//!                     │  PuterClient │──▶ api.puter.com (workers)
//!                     │  (workers.rs)│
//!                     └──────────────┘
//! ```
//!
//! Every CLI-backed endpoint maps to exactly one bridge invocation and wraps
//! the result in a uniform `{success, output|error, ...}` JSON envelope.
//! Handlers hold no state between calls; the only process-wide state is the
//! Puter API client built once at startup from the puter-cli config file.

mod bridge;
mod config;
mod normalize;
mod validate;
mod workers;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, services::ServeDir};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bridge::{BridgeError, CommandBridge, ExecMode, ExecOutput};
use crate::workers::{PuterClient, Worker};

// ============================================================================
// Timeouts - per-invocation, enforced by the bridge killing the subprocess
// ============================================================================

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(60);
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);
const EXECUTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Advisory returned instead of running file operations where the puter
/// interactive shell is known broken.
const FILE_OPS_ADVISORY: &str = "File operations via the puter CLI are not supported on Windows \
     due to a known bug in its interactive shell. Use https://puter.com for file management.";

// ============================================================================
// Response Envelope
// ============================================================================

/// Uniform envelope for CLI-backed endpoints. `success` is always present;
/// failures always carry `error`; timeouts and disabled capabilities carry a
/// machine-readable `code`.
#[derive(Debug, Serialize)]
struct CommandResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl CommandResponse {
    fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            warning: None,
            stderr: None,
            code: None,
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            warning: None,
            stderr: None,
            code: None,
        }
    }

    fn fail_code(error: impl Into<String>, code: &str) -> Self {
        Self {
            code: Some(code.to_string()),
            ..Self::fail(error)
        }
    }

    /// Wrap a finished invocation, substituting `fallback` when the CLI
    /// printed nothing.
    fn from_exec(out: ExecOutput, fallback: &str) -> Self {
        Self {
            success: true,
            output: Some(if out.stdout.is_empty() {
                fallback.to_string()
            } else {
                out.stdout
            }),
            error: None,
            warning: out.warning,
            stderr: (!out.stderr.is_empty()).then_some(out.stderr),
            code: None,
        }
    }

    fn from_bridge_error(err: BridgeError) -> Self {
        let code = err.code().map(String::from);
        let stderr = match &err {
            BridgeError::Failed { stderr, .. } => Some(stderr.clone()),
            _ => None,
        };
        Self {
            success: false,
            output: None,
            error: Some(err.to_string()),
            warning: None,
            stderr,
            code,
        }
    }

    fn file_ops_unavailable() -> Self {
        Self::fail_code(FILE_OPS_ADVISORY, "FILE_OPS_UNAVAILABLE")
    }
}

// ============================================================================
// App State - shared across all request handlers
// ============================================================================

struct AppState {
    start_time: Instant,
    bridge: CommandBridge,
    /// Puter API client for worker endpoints. `None` until a credential
    /// token has been loaded; worker calls then report NOT_INITIALIZED.
    puter: Option<PuterClient>,
    /// False on platforms where the puter interactive shell is broken.
    file_ops_enabled: bool,
    uploads_dir: PathBuf,
    /// Username recorded in the puter-cli config, if the selected profile
    /// carries one. Used when command output has no prompt residue.
    config_username: Option<String>,
}

/// Run one command through the bridge and wrap it in the envelope.
async fn run_command(
    state: &AppState,
    command: &str,
    timeout: Duration,
    fallback: &str,
) -> CommandResponse {
    match state.bridge.execute(command, timeout).await {
        Ok(out) => CommandResponse::from_exec(out, fallback),
        Err(e) => CommandResponse::from_bridge_error(e),
    }
}

/// Axum rejects a malformed body or query string before the handler runs,
/// with a plain-text response. Routing the rejection through these keeps
/// parse failures inside the JSON envelope.
fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, CommandResponse> {
    match body {
        Ok(Json(req)) => Ok(req),
        Err(e) => Err(CommandResponse::fail(format!("Invalid request body: {e}"))),
    }
}

fn parse_query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, CommandResponse> {
    match query {
        Ok(Query(q)) => Ok(q),
        Err(e) => Err(CommandResponse::fail(format!("Invalid query string: {e}"))),
    }
}

// ============================================================================
// Auth Endpoints
// ============================================================================

#[derive(Deserialize, Default)]
struct LoginRequest {
    #[serde(default)]
    save: bool,
}

async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    let req = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp),
    };
    let cmd = if req.save { "login --save" } else { "login" };
    Json(run_command(&state, cmd, LOGIN_TIMEOUT, "Login successful").await)
}

async fn logout(State(state): State<Arc<AppState>>) -> Json<CommandResponse> {
    Json(run_command(&state, "logout", LOGOUT_TIMEOUT, "Logged out successfully").await)
}

#[derive(Serialize)]
struct WhoamiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(rename = "isLoggedIn")]
    is_logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

/// The CLI has no cheap login probe, so this lists apps with a short timeout
/// and reads the username out of prompt residue in the output.
async fn whoami(State(state): State<Arc<AppState>>) -> Json<WhoamiResponse> {
    match state.bridge.execute("apps", PROBE_TIMEOUT).await {
        Ok(out) if !out.stdout.is_empty() && !out.stdout.to_lowercase().contains("error") => {
            let username = normalize::extract_username(&out.stdout)
                .or_else(|| state.config_username.clone());
            Json(WhoamiResponse {
                success: true,
                output: Some(match &username {
                    Some(u) => format!("Logged in as: {u}"),
                    None => "Logged in to Puter".to_string(),
                }),
                username,
                is_logged_in: true,
                error: None,
                code: None,
            })
        }
        _ => Json(WhoamiResponse {
            success: false,
            output: None,
            username: None,
            is_logged_in: false,
            error: Some("Not logged in".to_string()),
            code: Some("NOT_LOGGED_IN".to_string()),
        }),
    }
}

/// `puter whoami` can stall on some accounts, so a failed or empty result
/// falls back to the faster apps probe.
async fn user_info(State(state): State<Arc<AppState>>) -> Json<CommandResponse> {
    if let Ok(out) = state.bridge.execute("whoami", DEFAULT_TIMEOUT).await {
        if !out.stdout.is_empty() {
            return Json(CommandResponse::from_exec(out, ""));
        }
    }
    match state.bridge.execute("apps", PROBE_TIMEOUT).await {
        Ok(out) if !out.stdout.is_empty() => Json(CommandResponse::ok(
            "Status: Logged in\nFull account details require the whoami command, \
             which may take longer to respond.",
        )),
        _ => Json(CommandResponse::fail("Failed to get user info")),
    }
}

// ============================================================================
// Usage Endpoints
// ============================================================================

async fn disk_usage(State(state): State<Arc<AppState>>) -> Json<CommandResponse> {
    Json(run_command(&state, "df", DEFAULT_TIMEOUT, "No disk usage reported").await)
}

async fn usage(State(state): State<Arc<AppState>>) -> Json<CommandResponse> {
    Json(run_command(&state, "usage", DEFAULT_TIMEOUT, "No usage reported").await)
}

// ============================================================================
// File Endpoints - gated behind file_ops_enabled (the puter shell is broken
// on Windows; affected endpoints return a fixed advisory there)
// ============================================================================

#[derive(Deserialize, Default)]
struct FilesQuery {
    path: Option<String>,
}

async fn files_list(
    State(state): State<Arc<AppState>>,
    query: Result<Query<FilesQuery>, QueryRejection>,
) -> Json<CommandResponse> {
    let query = match parse_query(query) {
        Ok(q) => q,
        Err(resp) => return Json(resp),
    };
    if !state.file_ops_enabled {
        return Json(CommandResponse::file_ops_unavailable());
    }
    let cmd = match query.path.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(path) => match validate::validate_name(path) {
            Ok(p) => format!("ls \"{p}\""),
            Err(e) => return Json(CommandResponse::fail(e)),
        },
        None => "ls".to_string(),
    };
    Json(run_command(&state, &cmd, DEFAULT_TIMEOUT, "No files found").await)
}

#[derive(Deserialize)]
struct NameRequest {
    name: Option<String>,
}

async fn mkdir(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NameRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    if !state.file_ops_enabled {
        return Json(CommandResponse::file_ops_unavailable());
    }
    let req = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp),
    };
    let name = match validate::validate_name(req.name.as_deref().unwrap_or("")) {
        Ok(n) => n,
        Err(e) => return Json(CommandResponse::fail(e)),
    };
    let fallback = format!("Directory '{name}' created successfully");
    Json(run_command(&state, &format!("mkdir \"{name}\""), DEFAULT_TIMEOUT, &fallback).await)
}

async fn touch(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NameRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    if !state.file_ops_enabled {
        return Json(CommandResponse::file_ops_unavailable());
    }
    let req = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp),
    };
    let name = match validate::validate_name(req.name.as_deref().unwrap_or("")) {
        Ok(n) => n,
        Err(e) => return Json(CommandResponse::fail(e)),
    };
    let fallback = format!("File '{name}' created successfully");
    Json(run_command(&state, &format!("touch \"{name}\""), DEFAULT_TIMEOUT, &fallback).await)
}

async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Json<CommandResponse> {
    let mut file: Option<(String, Bytes)> = None;
    let mut remote_path = String::new();

    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("file") => {
                let name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "file".to_string());
                if let Ok(bytes) = field.bytes().await {
                    file = Some((name, bytes));
                }
            }
            Some("remotePath") => {
                remote_path = field.text().await.unwrap_or_default();
            }
            _ => {}
        }
    }

    let Some((original_name, bytes)) = file else {
        return Json(CommandResponse::fail("No file uploaded"));
    };

    let safe_name = match validate::validate_name(&original_name) {
        // Path separators are legal name characters but must not escape the
        // staging directory.
        Ok(n) => n.replace(['/', '\\'], "_"),
        Err(e) => return Json(CommandResponse::fail(e)),
    };

    let local_path = state.uploads_dir.join(&safe_name);
    if let Err(e) = fs::write(&local_path, &bytes) {
        return Json(CommandResponse::fail(format!("Failed to stage upload: {e}")));
    }

    Json(push_staged_file(&state, &local_path, &remote_path, &safe_name).await)
}

fn discard_staged(local_path: &std::path::Path) {
    if let Err(e) = fs::remove_file(local_path) {
        tracing::error!(
            "Failed to clean up staged upload {}: {}",
            local_path.display(),
            e
        );
    }
}

/// Push a staged file to the remote path, then remove the local copy.
/// Cleanup is unconditional, whether or not the push succeeded.
async fn push_staged_file(
    state: &AppState,
    local_path: &std::path::Path,
    remote_path: &str,
    original_name: &str,
) -> CommandResponse {
    // The remote path lands on the command line like every other name, so
    // it goes through the same character checks before any quoting.
    let remote_path = remote_path.trim();
    if !remote_path.is_empty() {
        if let Err(e) = validate::validate_name(remote_path) {
            discard_staged(local_path);
            return CommandResponse::fail(format!("Invalid remote path: {e}"));
        }
    }

    let cmd = format!("push \"{}\" {}", local_path.display(), remote_path);
    let result = state.bridge.execute(&cmd, TRANSFER_TIMEOUT).await;
    discard_staged(local_path);

    match result {
        Ok(out) => CommandResponse::from_exec(
            out,
            &format!("File '{original_name}' uploaded successfully"),
        ),
        Err(e) => CommandResponse::from_bridge_error(e),
    }
}

#[derive(Deserialize)]
struct DownloadRequest {
    path: Option<String>,
}

async fn download(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    let req = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp),
    };
    let path = match validate::validate_name(req.path.as_deref().unwrap_or("")) {
        Ok(p) => p,
        Err(e) => return Json(CommandResponse::fail(e)),
    };
    let fallback = format!("File '{path}' downloaded successfully");
    Json(run_command(&state, &format!("pull \"{path}\""), TRANSFER_TIMEOUT, &fallback).await)
}

#[derive(Deserialize)]
struct FileDeleteQuery {
    path: Option<String>,
    #[serde(default)]
    force: Option<bool>,
}

async fn file_delete(
    State(state): State<Arc<AppState>>,
    query: Result<Query<FileDeleteQuery>, QueryRejection>,
) -> Json<CommandResponse> {
    let query = match parse_query(query) {
        Ok(q) => q,
        Err(resp) => return Json(resp),
    };
    let path = match validate::validate_name(query.path.as_deref().unwrap_or("")) {
        Ok(p) => p,
        Err(e) => return Json(CommandResponse::fail(e)),
    };
    let cmd = if query.force.unwrap_or(false) {
        format!("rm -f \"{path}\"")
    } else {
        format!("rm \"{path}\"")
    };
    let fallback = format!("'{path}' deleted successfully");
    Json(run_command(&state, &cmd, DEFAULT_TIMEOUT, &fallback).await)
}

#[derive(Deserialize)]
struct TransferRequest {
    source: Option<String>,
    destination: Option<String>,
}

async fn copy_file(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TransferRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    match parse_body(body) {
        Ok(req) => Json(source_destination_command(&state, req, "cp", "Copied").await),
        Err(resp) => Json(resp),
    }
}

async fn move_file(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TransferRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    match parse_body(body) {
        Ok(req) => Json(source_destination_command(&state, req, "mv", "Moved").await),
        Err(resp) => Json(resp),
    }
}

async fn source_destination_command(
    state: &AppState,
    req: TransferRequest,
    verb: &str,
    past_tense: &str,
) -> CommandResponse {
    let (Some(source), Some(destination)) = (req.source, req.destination) else {
        return CommandResponse::fail("Source and destination are required");
    };
    let source = match validate::validate_name(&source) {
        Ok(s) => s,
        Err(e) => return CommandResponse::fail(format!("Invalid source: {e}")),
    };
    let destination = match validate::validate_name(&destination) {
        Ok(d) => d,
        Err(e) => return CommandResponse::fail(format!("Invalid destination: {e}")),
    };
    let cmd = format!("{verb} \"{source}\" \"{destination}\"");
    let fallback = format!("{past_tense} '{source}' to '{destination}'");
    run_command(state, &cmd, DEFAULT_TIMEOUT, &fallback).await
}

#[derive(Deserialize)]
struct StatRequest {
    path: Option<String>,
}

async fn stat_file(
    State(state): State<Arc<AppState>>,
    body: Result<Json<StatRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    let req = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp),
    };
    let path = match validate::validate_name(req.path.as_deref().unwrap_or("")) {
        Ok(p) => p,
        Err(e) => return Json(CommandResponse::fail(e)),
    };
    Json(run_command(&state, &format!("stat \"{path}\""), DEFAULT_TIMEOUT, "No metadata").await)
}

// ============================================================================
// Site Endpoints
// ============================================================================

#[derive(Deserialize)]
struct SiteCreateRequest {
    name: Option<String>,
    subdomain: Option<String>,
    dir: Option<String>,
}

async fn site_create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SiteCreateRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    let req = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp),
    };
    let name = match validate::validate_name(req.name.as_deref().unwrap_or("")) {
        Ok(n) => n,
        Err(e) => return Json(CommandResponse::fail(e)),
    };

    let mut cmd = format!("site:create \"{name}\"");
    if let Some(subdomain) = req.subdomain.filter(|s| !s.trim().is_empty()) {
        match validate::validate_name(&subdomain) {
            Ok(s) => cmd.push_str(&format!(" --subdomain=\"{s}\"")),
            Err(e) => return Json(CommandResponse::fail(format!("Invalid subdomain: {e}"))),
        }
    }
    if let Some(dir) = req.dir.filter(|d| !d.trim().is_empty()) {
        match validate::validate_name(&dir) {
            Ok(d) => cmd.push_str(&format!(" \"{d}\"")),
            Err(e) => return Json(CommandResponse::fail(format!("Invalid directory: {e}"))),
        }
    }

    let fallback = format!("Site '{name}' created successfully");
    Json(run_command(&state, &cmd, TRANSFER_TIMEOUT, &fallback).await)
}

#[derive(Deserialize)]
struct SiteDeployRequest {
    subdomain: Option<String>,
    dir: Option<String>,
}

async fn site_deploy(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SiteDeployRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    let req = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp),
    };
    let mut cmd = "site:deploy".to_string();
    if let Some(dir) = req.dir.filter(|d| !d.trim().is_empty()) {
        match validate::validate_name(&dir) {
            Ok(d) => cmd.push_str(&format!(" \"{d}\"")),
            Err(e) => return Json(CommandResponse::fail(format!("Invalid directory: {e}"))),
        }
    }
    if let Some(subdomain) = req.subdomain.filter(|s| !s.trim().is_empty()) {
        match validate::validate_name(&subdomain) {
            Ok(s) => cmd.push_str(&format!(" --subdomain=\"{s}\"")),
            Err(e) => return Json(CommandResponse::fail(format!("Invalid subdomain: {e}"))),
        }
    }
    Json(run_command(&state, &cmd, TRANSFER_TIMEOUT, "Site deployed successfully").await)
}

async fn sites_list(State(state): State<Arc<AppState>>) -> Json<CommandResponse> {
    Json(run_command(&state, "sites", DEFAULT_TIMEOUT, "No sites found").await)
}

#[derive(Deserialize)]
struct SiteDeleteQuery {
    uid: Option<String>,
}

async fn site_delete(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SiteDeleteQuery>, QueryRejection>,
) -> Json<CommandResponse> {
    let query = match parse_query(query) {
        Ok(q) => q,
        Err(resp) => return Json(resp),
    };
    let Some(uid) = query.uid.filter(|u| !u.trim().is_empty()) else {
        return Json(CommandResponse::fail("Site UID is required"));
    };
    let uid = match validate::validate_name(&uid) {
        Ok(u) => u,
        Err(e) => return Json(CommandResponse::fail(e)),
    };
    let fallback = format!("Site '{uid}' deleted successfully");
    Json(run_command(&state, &format!("site:delete \"{uid}\""), DEFAULT_TIMEOUT, &fallback).await)
}

// ============================================================================
// App Endpoints
// ============================================================================

#[derive(Deserialize)]
struct AppCreateRequest {
    name: Option<String>,
    dir: Option<String>,
    description: Option<String>,
    url: Option<String>,
}

async fn app_create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AppCreateRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    let req = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp),
    };
    let name = match validate::validate_name(req.name.as_deref().unwrap_or("")) {
        Ok(n) => n,
        Err(e) => return Json(CommandResponse::fail(e)),
    };

    let mut cmd = format!("app:create \"{name}\"");
    if let Some(dir) = req.dir.filter(|d| !d.trim().is_empty()) {
        match validate::validate_name(&dir) {
            Ok(d) => cmd.push_str(&format!(" \"{d}\"")),
            Err(e) => return Json(CommandResponse::fail(format!("Invalid directory: {e}"))),
        }
    }
    // Free-text flag values would unbalance the quoting, so embedded double
    // quotes are dropped.
    if let Some(description) = req.description.filter(|d| !d.trim().is_empty()) {
        cmd.push_str(&format!(" --description=\"{}\"", description.replace('"', "")));
    }
    if let Some(url) = req.url.filter(|u| !u.trim().is_empty()) {
        cmd.push_str(&format!(" --url=\"{}\"", url.replace('"', "")));
    }

    let fallback = format!("App '{name}' created successfully");
    Json(run_command(&state, &cmd, TRANSFER_TIMEOUT, &fallback).await)
}

#[derive(Deserialize)]
struct AppUpdateRequest {
    name: Option<String>,
    dir: Option<String>,
}

async fn app_update(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AppUpdateRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    let req = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp),
    };
    let name = match validate::validate_name(req.name.as_deref().unwrap_or("")) {
        Ok(n) => n,
        Err(e) => return Json(CommandResponse::fail(e)),
    };
    let Some(dir) = req.dir.filter(|d| !d.trim().is_empty()) else {
        return Json(CommandResponse::fail("Directory is required for update"));
    };
    let dir = match validate::validate_name(&dir) {
        Ok(d) => d,
        Err(e) => return Json(CommandResponse::fail(format!("Invalid directory: {e}"))),
    };
    let fallback = format!("App '{name}' updated successfully");
    Json(
        run_command(
            &state,
            &format!("app:update \"{name}\" \"{dir}\""),
            TRANSFER_TIMEOUT,
            &fallback,
        )
        .await,
    )
}

#[derive(Deserialize, Default)]
struct AppsQuery {
    period: Option<String>,
}

async fn apps_list(
    State(state): State<Arc<AppState>>,
    query: Result<Query<AppsQuery>, QueryRejection>,
) -> Json<CommandResponse> {
    let query = match parse_query(query) {
        Ok(q) => q,
        Err(resp) => return Json(resp),
    };
    let cmd = match query.period.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(period) => match validate::validate_name(period) {
            Ok(p) => format!("apps {p}"),
            Err(e) => return Json(CommandResponse::fail(format!("Invalid period: {e}"))),
        },
        None => "apps".to_string(),
    };
    Json(run_command(&state, &cmd, DEFAULT_TIMEOUT, "No apps found").await)
}

#[derive(Deserialize)]
struct AppDeleteQuery {
    name: Option<String>,
    #[serde(default)]
    force: Option<bool>,
}

async fn app_delete(
    State(state): State<Arc<AppState>>,
    query: Result<Query<AppDeleteQuery>, QueryRejection>,
) -> Json<CommandResponse> {
    let query = match parse_query(query) {
        Ok(q) => q,
        Err(resp) => return Json(resp),
    };
    let name = match validate::validate_name(query.name.as_deref().unwrap_or("")) {
        Ok(n) => n,
        Err(e) => return Json(CommandResponse::fail(e)),
    };
    let cmd = if query.force.unwrap_or(false) {
        format!("app:delete -f \"{name}\"")
    } else {
        format!("app:delete \"{name}\"")
    };
    let fallback = format!("App '{name}' deleted successfully");
    Json(run_command(&state, &cmd, DEFAULT_TIMEOUT, &fallback).await)
}

// ============================================================================
// Generic Execute Endpoint
// ============================================================================

#[derive(Deserialize)]
struct ExecuteRequest {
    command: Option<String>,
}

async fn execute_command(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    let req = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return Json(resp),
    };
    let Some(command) = req.command.filter(|c| !c.trim().is_empty()) else {
        return Json(CommandResponse::fail("Command is required"));
    };

    // Interactive-only commands would go through the broken shell on gated
    // platforms; reject them before any subprocess is spawned.
    if ExecMode::classify(&command) == ExecMode::Interactive && !state.file_ops_enabled {
        return Json(CommandResponse::file_ops_unavailable());
    }

    Json(run_command(&state, &command, EXECUTE_TIMEOUT, "Command executed").await)
}

// ============================================================================
// Worker Endpoints - direct Puter API, no CLI involved
// ============================================================================

#[derive(Serialize)]
struct WorkerResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    worker: Option<Worker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl WorkerResponse {
    fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            url: None,
            worker: None,
            error: Some(error.into()),
            code: None,
        }
    }

    fn not_initialized() -> Self {
        Self {
            code: Some("NOT_INITIALIZED".to_string()),
            ..Self::fail(
                "Puter API client not initialized. Run `puter login` and restart the server.",
            )
        }
    }
}

#[derive(Serialize)]
struct WorkerListResponse {
    success: bool,
    workers: Vec<Worker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

#[derive(Deserialize)]
struct WorkerCreateRequest {
    name: Option<String>,
    code: Option<String>,
}

async fn worker_create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<WorkerCreateRequest>, JsonRejection>,
) -> Json<WorkerResponse> {
    let Some(client) = state.puter.as_ref() else {
        return Json(WorkerResponse::not_initialized());
    };
    let req = match body {
        Ok(Json(req)) => req,
        Err(e) => return Json(WorkerResponse::fail(format!("Invalid request body: {e}"))),
    };
    let name = match validate::validate_name(req.name.as_deref().unwrap_or("")) {
        Ok(n) => n,
        Err(e) => return Json(WorkerResponse::fail(format!("Invalid worker name: {e}"))),
    };
    let Some(code) = req.code.filter(|c| !c.trim().is_empty()) else {
        return Json(WorkerResponse::fail("Worker code is required"));
    };

    let file_name = format!("{name}-worker.js");
    if let Err(e) = client.write_file(&file_name, &code).await {
        return Json(WorkerResponse::fail(format!(
            "Failed to write worker source: {e}"
        )));
    }

    match client.create_worker(&name, &file_name).await {
        Ok(worker) => {
            let location = worker
                .url
                .as_deref()
                .map(|u| format!(" at {u}"))
                .unwrap_or_default();
            Json(WorkerResponse {
                success: true,
                output: Some(format!("Worker '{name}' deployed successfully{location}")),
                url: worker.url.clone(),
                worker: Some(worker),
                error: None,
                code: None,
            })
        }
        Err(e) => Json(WorkerResponse::fail(format!("Failed to create worker: {e}"))),
    }
}

async fn workers_list(State(state): State<Arc<AppState>>) -> Json<WorkerListResponse> {
    let Some(client) = state.puter.as_ref() else {
        return Json(WorkerListResponse {
            success: false,
            workers: Vec::new(),
            error: Some(
                "Puter API client not initialized. Run `puter login` and restart the server."
                    .to_string(),
            ),
            code: Some("NOT_INITIALIZED".to_string()),
        });
    };
    match client.list_workers().await {
        Ok(workers) => Json(WorkerListResponse {
            success: true,
            workers,
            error: None,
            code: None,
        }),
        Err(e) => Json(WorkerListResponse {
            success: false,
            workers: Vec::new(),
            error: Some(format!("Failed to list workers: {e}")),
            code: None,
        }),
    }
}

async fn worker_get(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Json<WorkerResponse> {
    let Some(client) = state.puter.as_ref() else {
        return Json(WorkerResponse::not_initialized());
    };
    match client.get_worker(&name).await {
        Ok(Some(worker)) => Json(WorkerResponse {
            success: true,
            output: None,
            url: worker.url.clone(),
            worker: Some(worker),
            error: None,
            code: None,
        }),
        Ok(None) => Json(WorkerResponse::fail("Worker not found")),
        Err(e) => Json(WorkerResponse::fail(format!(
            "Failed to get worker info: {e}"
        ))),
    }
}

async fn worker_delete(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Json<WorkerResponse> {
    let Some(client) = state.puter.as_ref() else {
        return Json(WorkerResponse::not_initialized());
    };
    match client.delete_worker(&name).await {
        Ok(()) => Json(WorkerResponse {
            success: true,
            output: Some(format!("Worker '{name}' deleted successfully")),
            url: None,
            worker: None,
            error: None,
            code: None,
        }),
        Err(e) => Json(WorkerResponse::fail(format!("Failed to delete worker: {e}"))),
    }
}

// ============================================================================
// Health Endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    uptime_secs: u64,
    version: &'static str,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Fault Boundary
// ============================================================================

/// Last-resort boundary: anything that panics past a handler becomes a
/// generic internal-error envelope instead of a dropped connection.
fn handle_panic(
    _err: Box<dyn std::any::Any + Send + 'static>,
) -> axum::http::Response<axum::body::Body> {
    tracing::error!("handler panicked");
    let body = serde_json::json!({
        "success": false,
        "error": "Internal server error",
    })
    .to_string();
    axum::http::Response::builder()
        .status(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body))
        .unwrap()
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("puter_console=info".parse().unwrap())
                .add_directive("tower_http=info".parse().unwrap()),
        )
        .init();

    let cli_bin = std::env::var("PUTER_CLI_BIN").unwrap_or_else(|_| "puter".to_string());
    let bridge = CommandBridge::new(cli_bin);

    // Credential handle: read once at startup and held for the process
    // lifetime. No re-initialization path is exposed.
    let config_path = config::default_config_path();
    let credentials = config::load_credentials(&config_path);
    let config_username = credentials.as_ref().and_then(|c| c.username.clone());
    let puter = match credentials {
        Some(creds) => {
            let origin = std::env::var("PUTER_API_ORIGIN")
                .unwrap_or_else(|_| workers::DEFAULT_API_ORIGIN.to_string());
            match PuterClient::new(creds.token, origin) {
                Ok(client) => {
                    tracing::info!("Puter API client initialized");
                    Some(client)
                }
                Err(e) => {
                    tracing::error!("Failed to build Puter API client: {}", e);
                    None
                }
            }
        }
        None => {
            tracing::warn!("No puter token found, worker endpoints disabled; run `puter login`");
            None
        }
    };

    let file_ops_enabled =
        !cfg!(windows) || std::env::var("PUTER_CONSOLE_FORCE_FILE_OPS").as_deref() == Ok("1");
    if !file_ops_enabled {
        tracing::warn!("File operations disabled: the puter interactive shell is broken here");
    }

    let uploads_dir = PathBuf::from(
        std::env::var("PUTER_CONSOLE_UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()),
    );
    if let Err(e) = fs::create_dir_all(&uploads_dir) {
        tracing::error!("Failed to create uploads dir {}: {}", uploads_dir.display(), e);
    }

    let state = Arc::new(AppState {
        start_time: Instant::now(),
        bridge,
        puter,
        file_ops_enabled,
        uploads_dir,
        config_username,
    });

    let app = Router::new()
        // Auth
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/whoami", get(whoami))
        .route("/api/user-info", get(user_info))
        // Usage
        .route("/api/disk-usage", get(disk_usage))
        .route("/api/usage", get(usage))
        // Files
        .route("/api/files", get(files_list))
        .route("/api/mkdir", post(mkdir))
        .route("/api/touch", post(touch))
        .route("/api/upload", post(upload))
        .route("/api/download", post(download))
        .route("/api/file", delete(file_delete))
        .route("/api/copy", post(copy_file))
        .route("/api/move", post(move_file))
        .route("/api/stat", post(stat_file))
        // Sites
        .route("/api/site/create", post(site_create))
        .route("/api/site/deploy", post(site_deploy))
        .route("/api/sites", get(sites_list))
        .route("/api/site", delete(site_delete))
        // Apps
        .route("/api/app/create", post(app_create))
        .route("/api/app/update", post(app_update))
        .route("/api/apps", get(apps_list))
        .route("/api/app", delete(app_delete))
        // Generic passthrough
        .route("/api/execute", post(execute_command))
        // Workers (Puter API, no CLI)
        .route("/api/worker/create", post(worker_create))
        .route("/api/workers", get(workers_list))
        .route("/api/worker/{name}", get(worker_get).delete(worker_delete))
        // Health
        .route("/api/health", get(health))
        // Upload limit (100MB, matching the original CLI cap)
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        // Static frontend
        .fallback_service(ServeDir::new("static").append_index_html_on_directories(true))
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(
        "puter-console v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Bridge pointed at a binary that cannot exist: any attempted spawn
    /// surfaces as SPAWN_ERROR, so tests can tell "rejected before spawn"
    /// apart from "spawned and failed".
    fn test_state(file_ops_enabled: bool) -> Arc<AppState> {
        Arc::new(AppState {
            start_time: Instant::now(),
            bridge: CommandBridge::new("definitely-not-a-real-binary-9134"),
            puter: None,
            file_ops_enabled,
            uploads_dir: std::env::temp_dir(),
            config_username: None,
        })
    }

    #[tokio::test]
    async fn execute_rejects_interactive_commands_without_file_ops() {
        let state = test_state(false);
        let Json(resp) = execute_command(
            State(state),
            Ok(Json(ExecuteRequest {
                command: Some("ls /".to_string()),
            })),
        )
        .await;
        assert!(!resp.success);
        assert_eq!(resp.code.as_deref(), Some("FILE_OPS_UNAVAILABLE"));
    }

    #[tokio::test]
    async fn execute_requires_a_command() {
        let state = test_state(true);
        let Json(resp) =
            execute_command(State(state), Ok(Json(ExecuteRequest { command: None }))).await;
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("Command is required"));
    }

    #[tokio::test]
    async fn files_listing_unavailable_on_gated_platform() {
        let state = test_state(false);
        let Json(resp) = files_list(State(state), Ok(Query(FilesQuery::default()))).await;
        assert!(!resp.success);
        assert_eq!(resp.code.as_deref(), Some("FILE_OPS_UNAVAILABLE"));
    }

    #[tokio::test]
    async fn mkdir_rejects_reserved_names_before_spawning() {
        let state = test_state(true);
        let Json(resp) = mkdir(
            State(state),
            Ok(Json(NameRequest {
                name: Some("con".to_string()),
            })),
        )
        .await;
        assert!(!resp.success);
        assert_eq!(
            resp.error.as_deref(),
            Some("Name is reserved and cannot be used")
        );
        assert!(resp.code.is_none());
    }

    #[tokio::test]
    async fn download_rejects_invalid_characters_before_spawning() {
        let state = test_state(true);
        let Json(resp) = download(
            State(state),
            Ok(Json(DownloadRequest {
                path: Some("bad|name".to_string()),
            })),
        )
        .await;
        assert!(!resp.success);
        assert_eq!(
            resp.error.as_deref(),
            Some("Name contains invalid characters")
        );
        assert!(resp.code.is_none());
    }

    #[tokio::test]
    async fn copy_requires_both_endpoints() {
        let state = test_state(true);
        let Json(resp) = copy_file(
            State(state),
            Ok(Json(TransferRequest {
                source: Some("a".to_string()),
                destination: None,
            })),
        )
        .await;
        assert_eq!(
            resp.error.as_deref(),
            Some("Source and destination are required")
        );
    }

    #[tokio::test]
    async fn staged_upload_is_cleaned_up_even_when_push_fails() {
        let state = test_state(true);
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("staged.txt");
        std::fs::write(&local, b"data").unwrap();

        let resp = push_staged_file(&state, &local, "/remote", "staged.txt").await;

        assert!(!resp.success, "push should fail against a missing binary");
        assert!(!local.exists(), "staged file must be removed unconditionally");
    }

    #[tokio::test]
    async fn worker_endpoints_report_uninitialized_client() {
        let state = test_state(true);

        let Json(resp) = workers_list(State(state.clone())).await;
        assert!(!resp.success);
        assert_eq!(resp.code.as_deref(), Some("NOT_INITIALIZED"));

        let Json(resp) = worker_create(
            State(state.clone()),
            Ok(Json(WorkerCreateRequest {
                name: Some("w".to_string()),
                code: Some("export default {}".to_string()),
            })),
        )
        .await;
        assert_eq!(resp.code.as_deref(), Some("NOT_INITIALIZED"));

        let Json(resp) = worker_get(State(state.clone()), Path("w".to_string())).await;
        assert_eq!(resp.code.as_deref(), Some("NOT_INITIALIZED"));

        let Json(resp) = worker_delete(State(state), Path("w".to_string())).await;
        assert_eq!(resp.code.as_deref(), Some("NOT_INITIALIZED"));
    }

    #[tokio::test]
    async fn app_update_requires_a_directory() {
        let state = test_state(true);
        let Json(resp) = app_update(
            State(state),
            Ok(Json(AppUpdateRequest {
                name: Some("my-app".to_string()),
                dir: None,
            })),
        )
        .await;
        assert_eq!(
            resp.error.as_deref(),
            Some("Directory is required for update")
        );
    }

    #[tokio::test]
    async fn bridge_errors_carry_machine_readable_codes() {
        let state = test_state(true);
        let Json(resp) = disk_usage(State(state)).await;
        assert!(!resp.success);
        assert_eq!(resp.code.as_deref(), Some("SPAWN_ERROR"));
    }

    /// A quote inside a quoted argument would be silently dropped when the
    /// command line is split back into arguments, so directories go through
    /// the same checks as names.
    #[tokio::test]
    async fn quoted_directory_is_rejected_before_spawning() {
        let state = test_state(true);

        let Json(resp) = site_create(
            State(state.clone()),
            Ok(Json(SiteCreateRequest {
                name: Some("demo".to_string()),
                subdomain: None,
                dir: Some("my\"dir".to_string()),
            })),
        )
        .await;
        assert!(!resp.success);
        assert_eq!(
            resp.error.as_deref(),
            Some("Invalid directory: Name contains invalid characters")
        );
        assert!(resp.code.is_none());

        let Json(resp) = app_update(
            State(state),
            Ok(Json(AppUpdateRequest {
                name: Some("demo".to_string()),
                dir: Some("my\"dir".to_string()),
            })),
        )
        .await;
        assert!(!resp.success);
        assert_eq!(
            resp.error.as_deref(),
            Some("Invalid directory: Name contains invalid characters")
        );
        assert!(resp.code.is_none());
    }

    #[tokio::test]
    async fn quoted_remote_path_is_rejected_and_staging_discarded() {
        let state = test_state(true);
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("staged.txt");
        std::fs::write(&local, b"data").unwrap();

        let resp = push_staged_file(&state, &local, "re\"mote", "staged.txt").await;

        assert!(!resp.success);
        assert_eq!(
            resp.error.as_deref(),
            Some("Invalid remote path: Name contains invalid characters")
        );
        assert!(resp.code.is_none(), "must be rejected before any spawn");
        assert!(!local.exists(), "staged file must be removed on rejection too");
    }

    #[tokio::test]
    async fn malformed_json_body_stays_inside_the_envelope() {
        use axum::extract::FromRequest;

        let state = test_state(true);
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/login")
            .header("content-type", "application/json")
            .body(axum::body::Body::from("{not json"))
            .unwrap();
        let body = Json::<LoginRequest>::from_request(request, &()).await;

        let Json(resp) = login(State(state), body).await;
        assert!(!resp.success);
        assert!(resp
            .error
            .as_deref()
            .unwrap()
            .starts_with("Invalid request body"));
    }

    #[tokio::test]
    async fn malformed_query_string_stays_inside_the_envelope() {
        let state = test_state(true);
        let uri: axum::http::Uri = "/api/file?path=a&force=maybe".parse().unwrap();

        let Json(resp) = file_delete(State(state), Query::try_from_uri(&uri)).await;
        assert!(!resp.success);
        assert!(resp
            .error
            .as_deref()
            .unwrap()
            .starts_with("Invalid query string"));
    }

    #[tokio::test]
    async fn site_delete_surfaces_specific_validation_errors() {
        let state = test_state(true);

        let Json(resp) = site_delete(
            State(state.clone()),
            Ok(Query(SiteDeleteQuery { uid: None })),
        )
        .await;
        assert_eq!(resp.error.as_deref(), Some("Site UID is required"));

        let Json(resp) = site_delete(
            State(state),
            Ok(Query(SiteDeleteQuery {
                uid: Some("bad|uid".to_string()),
            })),
        )
        .await;
        assert_eq!(
            resp.error.as_deref(),
            Some("Name contains invalid characters")
        );
    }
}
