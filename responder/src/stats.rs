use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Counters kept for the lifetime of the responder
#[derive(Debug)]
pub struct ServiceStats {
    started: Instant,
    received: AtomicU64,
    published: AtomicU64,
    generator_failures: AtomicU64,
    publish_failures: AtomicU64,
}

impl Default for ServiceStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            received: AtomicU64::new(0),
            published: AtomicU64::new(0),
            generator_failures: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }
    }

    /// A request arrived, counted before generation starts
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// A response reached at least one peer
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generator_failure(&self) {
        self.generator_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, connected: bool, peers: usize) -> StatusReport {
        let uptime = self.started.elapsed();
        let received = self.received();
        let minutes = uptime.as_secs_f64() / 60.0;
        let per_minute = if minutes > 0.0 { received as f64 / minutes } else { 0.0 };

        StatusReport {
            uptime,
            connected,
            peers,
            received,
            published: self.published(),
            generator_failures: self.generator_failures.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            per_minute,
        }
    }
}

/// Point-in-time view used by the periodic status log
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(serialize_with = "serialize_uptime")]
    pub uptime: Duration,
    pub connected: bool,
    pub peers: usize,
    pub received: u64,
    pub published: u64,
    pub generator_failures: u64,
    pub publish_failures: u64,
    /// Received requests per minute of uptime
    pub per_minute: f64,
}

fn serialize_uptime<S: serde::Serializer>(uptime: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_uptime(*uptime))
}

/// Formats as `1h 2m 3s`
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uptime={} connected={} peers={} received={} published={} avg={:.2}/min",
            format_uptime(self.uptime),
            self.connected,
            self.peers,
            self.received,
            self.published,
            self.per_minute
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0h 0m 0s");
        assert_eq!(format_uptime(Duration::from_secs(3723)), "1h 2m 3s");
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "25h 1m 1s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_rates() {
        let stats = ServiceStats::new();
        for _ in 0..6 {
            stats.record_received();
        }
        for _ in 0..5 {
            stats.record_published();
        }
        stats.record_generator_failure();
        tokio::time::advance(Duration::from_secs(120)).await;

        let report = stats.snapshot(true, 2);
        assert_eq!(report.received, 6);
        assert_eq!(report.published, 5);
        assert_eq!(report.generator_failures, 1);
        assert_eq!(report.publish_failures, 0);
        assert!((report.per_minute - 3.0).abs() < 0.01);
        assert!(report.to_string().contains("uptime=0h 2m 0s"));
        assert!(report.to_string().contains("received=6 published=5"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["uptime"], "0h 2m 0s");
    }
}
