use std::net::SocketAddr;

use axum::{
    Router,
    body::Bytes,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::AppError;
use crate::core::{
    Portfolio, ProjectionInputs, ProjectionPoint, RebalanceOptions, RebalanceOutcome,
    RetirementInputs, SimulationResult, parse_targets, project, rebalance, simulate,
};

pub const MAX_API_SIMULATIONS: u32 = 100_000;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub fn parse_body(bytes: &[u8]) -> Result<Value, AppError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn rebalance_request(body: &Value) -> RebalanceOutcome {
    let portfolio = Portfolio::from_json(body.get("portfolio").unwrap_or(body));
    let targets = parse_targets(body.get("asset_class_targets"));
    let options = RebalanceOptions::from_json(body.get("options"));
    rebalance(&portfolio, &targets, &options)
}

pub fn simulate_request(body: &Value) -> SimulationResult {
    let mut inputs = RetirementInputs::from_json(body);
    inputs.num_simulations = inputs.num_simulations.min(MAX_API_SIMULATIONS);
    simulate(&inputs)
}

pub fn project_request(body: &Value) -> Vec<ProjectionPoint> {
    project(&ProjectionInputs::from_json(body))
}

pub fn router() -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/rebalance", post(rebalance_handler))
        .route("/api/simulate", post(simulate_handler))
        .route("/api/project", post(project_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "advisor HTTP API listening");
    axum::serve(listener, router()).await
}

async fn health_handler() -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

async fn rebalance_handler(body: Bytes) -> Response {
    match parse_body(&body) {
        Ok(value) => json_response(StatusCode::OK, rebalance_request(&value)),
        Err(e) => bad_request(e),
    }
}

async fn simulate_handler(body: Bytes) -> Response {
    let value = match parse_body(&body) {
        Ok(value) => value,
        Err(e) => return bad_request(e),
    };
    match tokio::task::spawn_blocking(move || simulate_request(&value)).await {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(e) => {
            warn!(error = %e, "simulation task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation failed")
        }
    }
}

async fn project_handler(body: Bytes) -> Response {
    match parse_body(&body) {
        Ok(value) => json_response(StatusCode::OK, project_request(&value)),
        Err(e) => bad_request(e),
    }
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn bad_request(err: AppError) -> Response {
    warn!(error = %err, "rejected request body");
    error_response(StatusCode::BAD_REQUEST, &err.to_string())
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
