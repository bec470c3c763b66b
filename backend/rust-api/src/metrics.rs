use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    pub static ref QUIZ_SYNC_CYCLES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_sync_cycles_total",
        "Quiz sync cycles by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref QUIZ_SYNC_CYCLE_DURATION_SECONDS: Histogram = register_histogram!(
        "quiz_sync_cycle_duration_seconds",
        "Duration of a full ingest, repair and reconcile cycle",
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .unwrap();

    pub static ref QUIZ_INGESTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_ingestions_total",
        "Quiz sheet ingestions by quiz and status",
        &["quiz", "status"]
    )
    .unwrap();

    pub static ref QUIZ_ROWS_SKIPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_rows_skipped_total",
        "Spreadsheet rows skipped during ingestion",
        &["reason"]
    )
    .unwrap();

    pub static ref STUDENT_ID_REPAIRS_TOTAL: IntCounter = register_int_counter!(
        "student_id_repairs_total",
        "Stored submissions whose student id was repaired"
    )
    .unwrap();

    pub static ref USERS_CREATED_TOTAL: IntCounter = register_int_counter!(
        "registry_users_created_total",
        "Users created from quiz submissions"
    )
    .unwrap();

    pub static ref USER_WRITES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "registry_user_writes_total",
        "User registry writes by operation and status",
        &["operation", "status"]
    )
    .unwrap();
}

/// Render all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
