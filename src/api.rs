//! HTTP/JSON control plane.
//!
//! Read-only views of the threat state plus two write paths: manual ban and
//! on-demand log analysis. Analysis requests return immediately; the work
//! runs in a spawned task and its outcome lands in the threat map.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::ScanEngine;
use crate::BanwatchError;

/// Build the control-plane router.
pub fn router(engine: Arc<ScanEngine>) -> Router {
    Router::new()
        .route("/api/v1/intelligent/threats", get(get_threats))
        .route("/api/v1/intelligent/scan-result", get(get_scan_result))
        .route("/api/v1/intelligent/stats", get(get_stats))
        .route("/api/v1/intelligent/ban", post(post_ban))
        .route("/api/v1/intelligent/analyze-log", post(post_analyze_log))
        .route(
            "/api/v1/intelligent/analyze-access-log",
            post(post_analyze_access_log),
        )
        .route("/health", get(health))
        .with_state(engine)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn get_threats(State(engine): State<Arc<ScanEngine>>) -> Json<Value> {
    let threats = engine.threats();
    Json(json!({
        "threats": threats,
        "total": threats.len(),
    }))
}

async fn get_scan_result(State(engine): State<Arc<ScanEngine>>) -> Json<Value> {
    Json(json!({"result": engine.scan_result()}))
}

async fn get_stats(State(engine): State<Arc<ScanEngine>>) -> Json<Value> {
    Json(json!({"stats": engine.stats()}))
}

#[derive(Deserialize)]
struct BanRequest {
    ip: String,
    reason: Option<String>,
}

async fn post_ban(
    State(engine): State<Arc<ScanEngine>>,
    Json(body): Json<BanRequest>,
) -> (StatusCode, Json<Value>) {
    if body.ip.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_request", "ip is required");
    }

    let reason = body.reason.unwrap_or_else(|| "manual ban".to_string());
    match engine.manual_ban(body.ip.trim(), &reason).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "message": "IP banned",
                "ip": body.ip.trim(),
                "reason": reason,
            })),
        ),
        Err(BanwatchError::Whitelisted(ip)) => error_response(
            StatusCode::BAD_REQUEST,
            "whitelisted",
            &format!("IP {} is whitelisted and cannot be banned", ip),
        ),
        Err(BanwatchError::Config(msg)) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_request", &msg)
        }
        Err(BanwatchError::Cancelled) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "cancelled",
            "engine is shutting down",
        ),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed_to_ban_ip",
            &e.to_string(),
        ),
    }
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    log_file_path: String,
}

async fn post_analyze_log(
    State(engine): State<Arc<ScanEngine>>,
    Json(body): Json<AnalyzeRequest>,
) -> (StatusCode, Json<Value>) {
    if body.log_file_path.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "log_file_path is required",
        );
    }

    let path = PathBuf::from(body.log_file_path.trim());
    let worker = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = worker.analyze_file(&path).await {
            log::error!("Log analysis of {} failed: {}", path.display(), e);
        }
    });

    (
        StatusCode::OK,
        Json(json!({
            "message": "log analysis started",
            "log_file_path": body.log_file_path.trim(),
            "status": "processing",
        })),
    )
}

async fn post_analyze_access_log(
    State(engine): State<Arc<ScanEngine>>,
) -> (StatusCode, Json<Value>) {
    let worker = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = worker.analyze_access_log().await {
            log::error!("Access log analysis failed: {}", e);
        }
    });

    (
        StatusCode::OK,
        Json(json!({
            "message": "access log analysis started",
            "status": "processing",
        })),
    )
}

fn error_response(status: StatusCode, error: &str, message: &str) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "error": error,
            "message": message,
        })),
    )
}
