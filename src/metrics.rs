//! Prometheus metrics for the link grabber.
//!
//! Exposes:
//! - `msggrab_pages_fetched_total` (counter per channel)
//! - `msggrab_messages_scanned_total` (counter per channel)
//! - `msggrab_links_emitted_total` (counter per channel)
//! - `msggrab_fetch_duration_seconds` (histogram)
//! - `msggrab_run_total` / `msggrab_run_duration_seconds` (per run)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram, register_histogram_vec, register_int_counter_vec,
    Encoder, Histogram, HistogramVec, IntCounterVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static PAGES_FETCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "msggrab_pages_fetched_total",
        "Non-empty history pages fetched",
        &["channel"]
    )
    .expect("failed to register pages counter")
});

static MESSAGES_SCANNED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "msggrab_messages_scanned_total",
        "Messages run through link extraction",
        &["channel"]
    )
    .expect("failed to register messages counter")
});

static LINKS_EMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "msggrab_links_emitted_total",
        "Link lines emitted to the output",
        &["channel"]
    )
    .expect("failed to register links counter")
});

static FETCH_DURATION: Lazy<Histogram> = Lazy::new(|| {
    // Exponential buckets from 25ms up to ~100 seconds.
    let buckets =
        prometheus::exponential_buckets(0.025, 2.0, 12).expect("failed to create histogram buckets");
    register_histogram!(
        "msggrab_fetch_duration_seconds",
        "Duration of a single history page request",
        buckets
    )
    .expect("failed to register fetch duration histogram")
});

static RUN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets =
        prometheus::exponential_buckets(0.5, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "msggrab_run_duration_seconds",
        "Whole run duration in seconds",
        &["status"],
        buckets
    )
    .expect("failed to register run duration histogram")
});

static RUN_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("msggrab_run_total", "Runs by status", &["status"])
        .expect("failed to register run counter")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&PAGES_FETCHED);
    Lazy::force(&MESSAGES_SCANNED);
    Lazy::force(&LINKS_EMITTED);
    Lazy::force(&FETCH_DURATION);
    Lazy::force(&RUN_DURATION);
    Lazy::force(&RUN_TOTAL);
}

/// Record one history request, successful or not.
pub fn record_fetch(duration: Duration) {
    FETCH_DURATION.observe(duration.as_secs_f64());
}

/// Record a non-empty page and how many messages it carried.
pub fn record_page(channel: &str, messages: usize) {
    PAGES_FETCHED.with_label_values(&[channel]).inc();
    MESSAGES_SCANNED
        .with_label_values(&[channel])
        .inc_by(messages as u64);
}

pub fn record_links(channel: &str, links: usize) {
    LINKS_EMITTED
        .with_label_values(&[channel])
        .inc_by(links as u64);
}

/// Record run completion with duration and status.
pub fn record_run_result(duration: Duration, success: bool) {
    init_collectors();
    let status = if success { "ok" } else { "error" };
    RUN_DURATION
        .with_label_values(&[status])
        .observe(duration.as_secs_f64());
    RUN_TOTAL.with_label_values(&[status]).inc();
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        let mut response = Response::new(Full::from("encode error"));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return Ok(response);
    }

    let mut response = Response::new(Full::from(buffer));
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::NOT_FOUND;
            Ok(response)
        }
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
