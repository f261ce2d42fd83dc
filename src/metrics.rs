//! Process-wide cache metrics.
//!
//! Unlike [`crate::stats::CacheStatistics`] these are shared by every cache
//! in the process and never reset.

use metriken::{metric, AtomicHistogram, Counter, Gauge};

#[metric(name = "embcache_requests", description = "Total get operations")]
pub static REQUESTS: Counter = Counter::new();

#[metric(name = "embcache_hits", description = "Gets answered from either tier")]
pub static HITS: Counter = Counter::new();

#[metric(name = "embcache_misses", description = "Gets that found nothing")]
pub static MISSES: Counter = Counter::new();

#[metric(name = "embcache_puts", description = "Accepted put operations")]
pub static PUTS: Counter = Counter::new();

#[metric(
    name = "embcache_put_rejected",
    description = "Put operations rejected by validation"
)]
pub static PUT_REJECTED: Counter = Counter::new();

#[metric(
    name = "embcache_evictions",
    description = "Entries evicted from the memory tier"
)]
pub static EVICTIONS: Counter = Counter::new();

#[metric(
    name = "embcache_expirations",
    description = "Expired entries removed from the memory tier"
)]
pub static EXPIRATIONS: Counter = Counter::new();

#[metric(
    name = "embcache_promotions",
    description = "Entries copied from the durable tier into memory"
)]
pub static PROMOTIONS: Counter = Counter::new();

#[metric(
    name = "embcache_persistence_errors",
    description = "Durable tier failures and timeouts absorbed by the cache"
)]
pub static PERSISTENCE_ERRORS: Counter = Counter::new();

#[metric(name = "embcache_cleanup_runs", description = "Completed cleanup passes")]
pub static CLEANUP_RUNS: Counter = Counter::new();

#[metric(name = "embcache_entries", description = "Entries in the memory tier")]
pub static ENTRIES: Gauge = Gauge::new();

#[metric(
    name = "embcache_memory_bytes",
    description = "Estimated bytes held by the memory tier"
)]
pub static MEMORY_BYTES: Gauge = Gauge::new();

#[metric(
    name = "embcache_get_latency",
    description = "Get latency histogram (nanoseconds)"
)]
pub static GET_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "embcache_put_latency",
    description = "Put latency histogram (nanoseconds)"
)]
pub static PUT_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

/// Render every registered metric in Prometheus text format.
pub fn render_prometheus() -> String {
    let mut output = String::with_capacity(2048);

    for metric in metriken::metrics().iter() {
        let name = metric.name();
        if name.is_empty() {
            continue;
        }
        let Some(value) = metric.value() else {
            continue;
        };

        match value {
            metriken::Value::Counter(v) => {
                output.push_str(&format!("# TYPE {} counter\n{} {}\n", name, name, v));
            }
            metriken::Value::Gauge(v) => {
                output.push_str(&format!("# TYPE {} gauge\n{} {}\n", name, name, v));
            }
            metriken::Value::Other(any) => {
                let Some(snapshot) = any
                    .downcast_ref::<AtomicHistogram>()
                    .and_then(|histogram| histogram.load())
                else {
                    continue;
                };
                output.push_str(&format!("# TYPE {} summary\n", name));
                if let Ok(Some(results)) = snapshot.percentiles(&[50.0, 90.0, 99.0, 99.9]) {
                    for (pct, bucket) in results {
                        output.push_str(&format!(
                            "{}{{quantile=\"{}\"}} {}\n",
                            name,
                            pct / 100.0,
                            bucket.end()
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    output
}
