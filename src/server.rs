//! HTTP API for the report service.
//!
//! Exposes:
//! - `POST /generate_report` to enqueue a report run (202 with a job id)
//! - `GET /jobs/{id}` to poll job status
//! - `GET /metrics` for Prometheus scrapes
//!
//! Routing is a plain function over method and path so handlers are
//! testable without a listener.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::obs;
use crate::report::ReportRequest;
use crate::worker::ReportWorker;
use crate::Error;

#[derive(Serialize)]
struct EnqueuedResponse {
    job_id: u64,
    message: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let encoded = serde_json::to_vec(body).unwrap_or_default();
    let mut response = Response::new(Full::from(encoded));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn error_response(status: StatusCode, error: impl ToString) -> Response<Full<Bytes>> {
    json_response(
        status,
        &ErrorResponse {
            error: error.to_string(),
        },
    )
}

async fn enqueue_report(worker: &ReportWorker, body: &[u8]) -> Response<Full<Bytes>> {
    let request: ReportRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid request body: {}", err),
            );
        }
    };

    match worker.submit(request).await {
        Ok(job_id) => json_response(
            StatusCode::ACCEPTED,
            &EnqueuedResponse {
                job_id,
                message: "Report generation task enqueued",
            },
        ),
        Err(Error::InvalidArgument(reason)) => error_response(StatusCode::BAD_REQUEST, reason),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}

fn job_status(worker: &ReportWorker, id_segment: &str) -> Response<Full<Bytes>> {
    let Ok(id) = id_segment.parse::<u64>() else {
        return error_response(StatusCode::BAD_REQUEST, "job id must be an integer");
    };
    match worker.status(id) {
        Some(status) => json_response(StatusCode::OK, &status),
        None => error_response(StatusCode::NOT_FOUND, format!("unknown job id {}", id)),
    }
}

fn metrics_response() -> Response<Full<Bytes>> {
    let (body, content_type) = obs::render();
    let mut response = Response::new(Full::from(body));
    if let Ok(value) = hyper::header::HeaderValue::from_str(&content_type) {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Route one request. Split out from the connection loop for tests.
pub async fn api_response(
    method: &Method,
    path: &str,
    body: &[u8],
    worker: &ReportWorker,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::POST, "/generate_report") => enqueue_report(worker, body).await,
        (&Method::GET, _) if path.starts_with("/jobs/") => {
            job_status(worker, &path["/jobs/".len()..])
        }
        (&Method::GET, "/metrics") => metrics_response(),
        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn handle_request(
    req: Request<Incoming>,
    worker: Arc<ReportWorker>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            return Ok(error_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {}", err),
            ));
        }
    };

    Ok(api_response(&method, &path, &body, &worker).await)
}

/// Accept loop for the API endpoint. Runs until the listener fails.
pub async fn serve(addr: SocketAddr, worker: Arc<ReportWorker>) -> anyhow::Result<()> {
    obs::init_collectors();
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Report API started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let worker = worker.clone();
        let service = service_fn(move |req| handle_request(req, worker.clone()));
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "API connection error: {}", err);
            }
        });
    }
}
