//! Lock-free metric primitives.
//!
//! `Counter` and `Histogram` are plain relaxed atomics; `Gauge` stores the
//! f64 bit pattern in an `AtomicU64` and uses a compare-exchange loop for
//! `inc`/`dec`. Histogram bucket bounds are fixed at construction, so the
//! per-bucket counters never move after the histogram is built.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Settable gauge with lock-free `inc`/`dec`.
#[derive(Debug, Default)]
pub struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn inc(&self, delta: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn dec(&self, delta: f64) {
        self.inc(-delta);
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[derive(Debug)]
pub struct HistogramBucket {
    pub upper_bound: f64,
    count: AtomicU64,
}

impl HistogramBucket {
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Prometheus-shape histogram: cumulative bucket counts over fixed
/// ascending bounds with a trailing `+Inf` bucket. The sum is kept as
/// integer nanoseconds so it can be updated atomically; it is divided
/// back to seconds on read.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    count: AtomicU64,
    sum_nanos: AtomicU64,
}

impl Histogram {
    /// `bounds` must be ascending; an `+Inf` bucket is appended.
    pub fn new(bounds: &[f64]) -> Self {
        let mut buckets: Vec<HistogramBucket> = bounds
            .iter()
            .map(|&upper_bound| HistogramBucket { upper_bound, count: AtomicU64::new(0) })
            .collect();
        buckets.push(HistogramBucket {
            upper_bound: f64::INFINITY,
            count: AtomicU64::new(0),
        });
        Self { buckets, count: AtomicU64::new(0), sum_nanos: AtomicU64::new(0) }
    }

    pub fn observe(&self, value: f64) {
        self.sum_nanos
            .fetch_add((value * 1e9) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for bucket in &self.buckets {
            if value <= bucket.upper_bound {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        self.sum_nanos.load(Ordering::Relaxed) as f64 / 1e9
    }

    pub fn buckets(&self) -> &[HistogramBucket] {
        &self.buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let counter = Counter::new();
        counter.inc();
        counter.add(4);
        assert_eq!(counter.value(), 5);
    }

    #[test]
    fn gauge_set_inc_dec() {
        let gauge = Gauge::new();
        gauge.set(10.0);
        gauge.inc(2.5);
        gauge.dec(0.5);
        assert!((gauge.value() - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gauge_inc_is_safe_under_contention() {
        let gauge = std::sync::Arc::new(Gauge::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gauge = std::sync::Arc::clone(&gauge);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        gauge.inc(1.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(gauge.value(), 8000.0);
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let hist = Histogram::new(&[0.01, 0.1, 1.0]);
        hist.observe(0.005);
        hist.observe(0.05);
        hist.observe(0.5);
        hist.observe(5.0);

        let counts: Vec<u64> = hist.buckets().iter().map(|b| b.count()).collect();
        assert_eq!(counts, vec![1, 2, 3, 4]);
        assert_eq!(hist.buckets().last().unwrap().upper_bound, f64::INFINITY);
        assert_eq!(hist.count(), 4);
        assert!((hist.sum() - 5.555).abs() < 1e-6);
    }

    #[test]
    fn every_bucket_at_or_above_value_increments_once() {
        let hist = Histogram::new(&[0.1, 0.2, 0.3]);
        hist.observe(0.2);
        let counts: Vec<u64> = hist.buckets().iter().map(|b| b.count()).collect();
        assert_eq!(counts, vec![0, 1, 1, 1]);
    }
}
