use std::future::Future;

use once_cell::sync::Lazy;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

use crate::errors::StorageError;

// Prometheus metrics (default registry)
pub static OP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "file_storage_op_duration_seconds",
        "Storage engine operation duration in seconds",
        &["method"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("register op_duration")
});

pub static OP_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "file_storage_op_errors_total",
        "Storage engine operations that ended in an error",
        &["method"]
    )
    .expect("register op_errors_total")
});

/// Time `fut` under `method` and count its failure. End of stream is not a failure.
pub async fn collect<T, F>(method: &'static str, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    let timer = OP_DURATION.with_label_values(&[method]).start_timer();
    let res = fut.await;
    timer.observe_duration();
    if let Err(e) = &res {
        if !e.is_end_of_stream() {
            OP_ERRORS_TOTAL.with_label_values(&[method]).inc();
        }
    }
    res
}
