use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mfc_scraper::cache::{calculate_cache_ttl, CacheTtlTable};
use mfc_scraper::utils::{is_valid_target, sanitize_log, similarity};
use mfc_scraper::ErrorKind;
use std::time::Duration;

fn bench_error_classification(c: &mut Criterion) {
    c.bench_function("error_classification", |b| {
        b.iter(|| {
            black_box(ErrorKind::classify(black_box(
                "Navigation failed: net::ERR_CONNECTION_RESET after rate limit",
            )))
        })
    });
}

fn bench_similarity(c: &mut Criterion) {
    c.bench_function("similarity_short", |b| {
        b.iter(|| black_box(similarity(black_box("Just a m0ment..."), black_box("just a moment"))))
    });

    let long_a = "checking your browser before accessing ".repeat(40);
    let long_b = "verifying you are human before accessing ".repeat(40);
    c.bench_function("similarity_capped", |b| {
        b.iter(|| black_box(similarity(black_box(&long_a), black_box(&long_b))))
    });
}

fn bench_url_validation(c: &mut Criterion) {
    c.bench_function("url_validation", |b| {
        b.iter(|| {
            black_box(is_valid_target(black_box(
                "https://myfigurecollection.net/item/287",
            )))
        })
    });
}

fn bench_log_sanitizer(c: &mut Criterion) {
    let hostile = "user\x1b[31minput\nwith\r\ncontrol\x00bytes".repeat(8);
    c.bench_function("log_sanitizer", |b| {
        b.iter(|| black_box(sanitize_log(black_box(&hostile))))
    });
}

fn bench_cache_ttl(c: &mut Criterion) {
    let table = CacheTtlTable::default();
    let now = NaiveDate::from_ymd_opt(2024, 6, 15).expect("valid date");
    c.bench_function("cache_ttl", |b| {
        b.iter(|| black_box(calculate_cache_ttl(black_box("2023-06-15"), now, &table)))
    });
}

fn configure() -> Criterion {
    Criterion::default()
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_millis(500))
        .sample_size(20)
}

criterion_group! {
    name = benches;
    config = configure();
    targets = bench_error_classification,
        bench_similarity,
        bench_url_validation,
        bench_log_sanitizer,
        bench_cache_ttl
}
criterion_main!(benches);
