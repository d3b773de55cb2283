use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter},
};
use std::sync::LazyLock;

pub static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("financial-analysis-gateway"));

// --- Domain Metrics ---

pub static ANALYZE_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("financial.analyze.duration")
        .with_description("End-to-end single-document analysis duration in seconds")
        .with_unit("s")
        .build()
});

pub static BILAN_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("financial.bilan.duration")
        .with_description("End-to-end bilan generation duration in seconds")
        .with_unit("s")
        .build()
});

pub static DOCUMENTS_STAGED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("financial.documents.staged")
        .with_description("Number of documents staged to transient local storage")
        .with_unit("{document}")
        .build()
});

pub static FETCH_SKIPPED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("financial.fetch.skipped")
        .with_description("Remote document references skipped after a non-success fetch")
        .with_unit("{document}")
        .build()
});

// --- HTTP Metrics ---

pub static HTTP_REQUESTS_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("http.requests.total")
        .with_description("Total number of HTTP requests")
        .with_unit("{request}")
        .build()
});

pub static HTTP_REQUEST_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("http.request.duration")
        .with_description("HTTP request duration in milliseconds")
        .with_unit("ms")
        .with_boundaries(vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
        ])
        .build()
});
