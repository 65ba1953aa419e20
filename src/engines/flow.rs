//! Signed flow tracking per watched address: 15-minute buckets with 24-hour
//! retention, analyzed into accumulation / distribution / acceleration /
//! reversal signals that ride along with whale alerts.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const BUCKET_MS: i64 = 15 * 60 * 1000;
const RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSignal {
    /// Last three buckets all inflows.
    Accumulation,
    /// Last three buckets all outflows.
    Distribution,
    /// Magnitudes strictly increasing across the last three buckets.
    Acceleration,
    /// Sign flipped against the prior bucket.
    Reversal,
}

impl FlowSignal {
    pub fn describe(&self) -> &'static str {
        match self {
            FlowSignal::Accumulation => "accumulating",
            FlowSignal::Distribution => "distributing",
            FlowSignal::Acceleration => "accelerating",
            FlowSignal::Reversal => "flow reversal",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    start_ms: i64,
    /// Net signed flow in USD: positive into the address, negative out.
    net_usd: f64,
}

/// In-memory tracker; flow history is advisory and rebuilt after restart.
#[derive(Default)]
pub struct FlowTracker {
    series: Mutex<HashMap<(u64, String), VecDeque<Bucket>>>,
}

impl FlowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a sample into the address's current bucket and return the
    /// signals visible after this sample.
    pub fn record(
        &self,
        chain_id: u64,
        address: &str,
        signed_usd: f64,
        now_ms: i64,
    ) -> Vec<FlowSignal> {
        let mut series = self.series.lock().unwrap();
        let buckets = series.entry((chain_id, address.to_lowercase())).or_default();

        let bucket_start = now_ms - now_ms.rem_euclid(BUCKET_MS);
        match buckets.back_mut() {
            Some(last) if last.start_ms == bucket_start => last.net_usd += signed_usd,
            _ => buckets.push_back(Bucket { start_ms: bucket_start, net_usd: signed_usd }),
        }

        while buckets.front().is_some_and(|b| b.start_ms < now_ms - RETENTION_MS) {
            buckets.pop_front();
        }

        analyze(buckets)
    }
}

fn analyze(buckets: &VecDeque<Bucket>) -> Vec<FlowSignal> {
    let n = buckets.len();
    let mut signals = Vec::new();

    if n >= 2 {
        let prev = buckets[n - 2].net_usd;
        let last = buckets[n - 1].net_usd;
        if prev != 0.0 && last != 0.0 && prev.signum() != last.signum() {
            signals.push(FlowSignal::Reversal);
        }
    }

    if n >= 3 {
        let window = [buckets[n - 3].net_usd, buckets[n - 2].net_usd, buckets[n - 1].net_usd];
        if window.iter().all(|v| *v > 0.0) {
            signals.push(FlowSignal::Accumulation);
        } else if window.iter().all(|v| *v < 0.0) {
            signals.push(FlowSignal::Distribution);
        }
        if window[0].abs() < window[1].abs() && window[1].abs() < window[2].abs() {
            signals.push(FlowSignal::Acceleration);
        }
    }

    signals
}
