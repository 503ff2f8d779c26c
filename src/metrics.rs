//! Prometheus metrics for the ingestion and query pipeline.
//!
//! Exposes:
//! - `knowledge_rag_stage_duration_seconds` (histogram by stage)
//! - `knowledge_rag_documents_total` (counter by final status)
//! - `knowledge_rag_queries_total` (counter by outcome)
//! - `knowledge_rag_degraded_steps_total` (counter by skipped step)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::models::DocumentStatus;

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Exponential buckets from 10ms up to ~80s.
    let buckets =
        prometheus::exponential_buckets(0.01, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "knowledge_rag_stage_duration_seconds",
        "Pipeline stage duration in seconds",
        &["stage"],
        buckets
    )
    .expect("failed to register stage duration histogram")
});

static DOCUMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "knowledge_rag_documents_total",
        "Ingested documents by final status",
        &["status"]
    )
    .expect("failed to register documents counter")
});

static QUERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "knowledge_rag_queries_total",
        "Submitted queries by outcome",
        &["outcome"]
    )
    .expect("failed to register queries counter")
});

static DEGRADED_STEPS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "knowledge_rag_degraded_steps_total",
        "Pipeline steps skipped after a provider or store failure",
        &["step"]
    )
    .expect("failed to register degraded steps counter")
});

/// Pipeline step that can be skipped without failing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedStep {
    Embedding,
    Extraction,
    History,
}

impl DegradedStep {
    fn label(&self) -> &'static str {
        match self {
            DegradedStep::Embedding => "embedding",
            DegradedStep::Extraction => "extraction",
            DegradedStep::History => "history",
        }
    }
}

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&STAGE_DURATION);
    Lazy::force(&DOCUMENTS_TOTAL);
    Lazy::force(&QUERIES_TOTAL);
    Lazy::force(&DEGRADED_STEPS);
}

/// Record how long a stage (`ingest`, `query`) took.
pub fn record_stage(stage: &'static str, duration: Duration) {
    init_collectors();
    STAGE_DURATION
        .with_label_values(&[stage])
        .observe(duration.as_secs_f64());
}

/// Count a document reaching its final status.
pub fn record_document(status: DocumentStatus) {
    init_collectors();
    DOCUMENTS_TOTAL.with_label_values(&[status.as_str()]).inc();
}

/// Count a query; `answered == false` means the apology fallback was used.
pub fn record_query(answered: bool) {
    init_collectors();
    QUERIES_TOTAL
        .with_label_values(&[if answered { "answered" } else { "fallback" }])
        .inc();
}

pub fn record_degraded(step: DegradedStep) {
    init_collectors();
    DEGRADED_STEPS.with_label_values(&[step.label()]).inc();
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        return Ok(text_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "encode error",
        ));
    }

    let mut response = text_response(StatusCode::OK, buffer);
    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    Ok(response)
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => Ok(text_response(StatusCode::NOT_FOUND, Bytes::new())),
    }
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Prometheus metrics endpoint started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service_fn(handle_request);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Metrics connection error: {}", err);
            }
        });
    }
}

/// Spawn the metrics HTTP endpoint on the given address.
pub fn spawn_metrics_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        if let Err(err) = serve(addr).await {
            error!(%addr, "Metrics server failed: {}", err);
        }
    });
}
