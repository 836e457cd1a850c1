use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("face_search_count", "count of the face search requests", &["result"]).unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("face_search_duration", "duration of the per-image search in seconds").unwrap()
});

static METRIC_SEARCH_MATCHES: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "face_search_matches",
        "number of matched images of the per-image search",
        vec![0.0, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    )
    .unwrap()
});

static METRIC_INDEXED_FILES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("face_indexed_files", "count of the files processed by the indexer", &["outcome"])
        .unwrap()
});

/// 记录一次搜索，`result` 为 ok 或错误种类
pub fn inc_search_count(result: &str) {
    METRIC_SEARCH_COUNT.with_label_values(&[result]).inc();
}

pub fn inc_search_duration(duration: f32) {
    METRIC_SEARCH_DURATION.observe(duration as f64);
}

pub fn inc_search_matches(matches: usize) {
    METRIC_SEARCH_MATCHES.observe(matches as f64);
}

/// 记录索引处理的文件，`outcome` 为 indexed、skipped 或 failed
pub fn inc_indexed_files(outcome: &str) {
    METRIC_INDEXED_FILES.with_label_values(&[outcome]).inc();
}

/// 以文本格式导出所有指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&prometheus::gather()).unwrap_or_default()
}
