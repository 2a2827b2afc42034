//! Prometheus metrics for pipeline runs and a small `/metrics` exporter.

use std::convert::Infallible;
use std::net::TcpListener;

use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response, StatusCode};
use once_cell::sync::Lazy;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use tokio::task::JoinHandle;

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("snapflow".to_string()), None).expect("valid registry prefix")
});

fn counter(name: &str, help: &str) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), &["pipeline"]).expect("valid counter");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
}

static PIPELINE_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new("pipeline_duration_ms", "Pipeline run duration in milliseconds, retries included")
        .buckets(vec![100.0, 500.0, 1_000.0, 5_000.0, 15_000.0, 60_000.0, 300_000.0, 900_000.0]);
    let hist = HistogramVec::new(opts, &["pipeline"]).expect("valid histogram");
    REGISTRY.register(Box::new(hist.clone())).ok();
    hist
});

static RUNS: Lazy<CounterVec> = Lazy::new(|| counter("pipeline_runs_total", "Pipeline runs started"));
static FAILURES: Lazy<CounterVec> = Lazy::new(|| counter("pipeline_failures_total", "Pipeline runs that failed after all attempts"));
static RETRIES: Lazy<CounterVec> = Lazy::new(|| counter("pipeline_retries_total", "Attempts retried after a failure"));
static ROWS_LOADED: Lazy<CounterVec> = Lazy::new(|| counter("rows_loaded_total", "Rows committed to the warehouse"));
static SKIPPED: Lazy<CounterVec> = Lazy::new(|| {
    counter("skipped_triggers_total", "Triggers dropped because a run was still in flight")
});

pub fn observe_duration(pipeline: &str, duration_ms: f64) {
    PIPELINE_DURATION_MS.with_label_values(&[pipeline]).observe(duration_ms);
}

pub fn inc_run(pipeline: &str) {
    RUNS.with_label_values(&[pipeline]).inc();
}

pub fn inc_failure(pipeline: &str) {
    FAILURES.with_label_values(&[pipeline]).inc();
}

pub fn inc_retry(pipeline: &str) {
    RETRIES.with_label_values(&[pipeline]).inc();
}

pub fn inc_skipped(pipeline: &str) {
    SKIPPED.with_label_values(&[pipeline]).inc();
}

pub fn add_rows(pipeline: &str, rows: u64) {
    ROWS_LOADED.with_label_values(&[pipeline]).inc_by(rows as f64);
}

/// Current value of a per-pipeline counter, for tests and status output.
pub fn counter_value(name: &str, pipeline: &str) -> f64 {
    let counter = match name {
        "pipeline_runs_total" => &*RUNS,
        "pipeline_failures_total" => &*FAILURES,
        "pipeline_retries_total" => &*RETRIES,
        "rows_loaded_total" => &*ROWS_LOADED,
        "skipped_triggers_total" => &*SKIPPED,
        _ => return 0.0,
    };
    counter.with_label_values(&[pipeline]).get()
}

/// Gather metrics as text in Prometheus exposition format.
///
/// ```no_run
/// use snapflow_core::metrics;
/// metrics::inc_run("rest_countries");
/// println!("{}", metrics::gather_text());
/// ```
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn respond(req: &Request<Body>) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            *res.body_mut() = Body::from(gather_text());
            res.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
        }
        _ => *res.status_mut() = StatusCode::NOT_FOUND,
    }
    res
}

/// Serve `/metrics` on `listener` until `shutdown` resolves.
///
/// Must be called from inside a Tokio runtime; the server runs as a task on
/// that runtime.
pub fn start_exporter_with_shutdown<F>(listener: TcpListener, shutdown: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = listener.set_nonblocking(true) {
            tracing::error!(error = %e, "failed to set metrics listener non-blocking");
            return;
        }
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, "failed to register metrics listener");
                return;
            }
        };
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "metrics exporter listening");
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accept = listener.accept() => {
                    let stream = match accept {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            tracing::warn!(error = %e, "metrics accept failed");
                            continue;
                        }
                    };
                    let svc = service_fn(|req: Request<Body>| async move {
                        Ok::<_, Infallible>(respond(&req))
                    });
                    tokio::spawn(async move {
                        if let Err(e) = hyper::server::conn::Http::new().serve_connection(stream, svc).await {
                            tracing::debug!(error = %e, "metrics connection closed with error");
                        }
                    });
                }
            }
        }
        tracing::info!("metrics exporter stopped");
    })
}

/// Like [`start_exporter_with_shutdown`], stopped by sending on the returned
/// channel.
pub fn start_exporter(listener: TcpListener) -> (JoinHandle<()>, tokio::sync::oneshot::Sender<()>) {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = start_exporter_with_shutdown(listener, async move {
        let _ = rx.await;
    });
    (handle, tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_per_pipeline() {
        inc_run("metrics_test_a");
        inc_run("metrics_test_a");
        inc_run("metrics_test_b");
        add_rows("metrics_test_a", 250);

        assert_eq!(counter_value("pipeline_runs_total", "metrics_test_a"), 2.0);
        assert_eq!(counter_value("pipeline_runs_total", "metrics_test_b"), 1.0);
        assert_eq!(counter_value("rows_loaded_total", "metrics_test_a"), 250.0);
        assert_eq!(counter_value("no_such_metric", "metrics_test_a"), 0.0);
    }

    #[test]
    fn exposition_uses_prefix_and_labels() {
        inc_failure("metrics_test_c");
        observe_duration("metrics_test_c", 1234.0);

        let text = gather_text();
        assert!(text.contains("snapflow_pipeline_failures_total{pipeline=\"metrics_test_c\"} 1"));
        assert!(text.contains("snapflow_pipeline_duration_ms_count{pipeline=\"metrics_test_c\"} 1"));
    }

    #[test]
    fn unknown_paths_are_not_found() {
        let req = Request::get("/health").body(Body::empty()).unwrap();
        assert_eq!(respond(&req).status(), StatusCode::NOT_FOUND);

        let req = Request::get("/metrics").body(Body::empty()).unwrap();
        assert_eq!(respond(&req).status(), StatusCode::OK);
    }
}
