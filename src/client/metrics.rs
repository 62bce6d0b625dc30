use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// One upload attempt as seen by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptMetric {
    pub capture_id: Uuid,
    pub attempt: u32,
    pub start_time: u64, // milliseconds since epoch
    pub latency_ms: u64,
    pub success: bool,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub failed_attempts: usize,
    pub failure_rate: f64,
    pub captures_delivered: usize,
    pub max_attempts_per_capture: u32,

    // Latency statistics (milliseconds)
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
    pub latency_avg_ms: f64,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
    pub latency_p99_ms: u64,

    // Failure reasons breakdown
    pub failure_reasons: HashMap<String, usize>,
}

#[derive(Debug)]
pub struct DeliveryMetrics {
    client_name: String,
    start_time: Instant,
    attempts: Vec<AttemptMetric>,
}

impl DeliveryMetrics {
    pub fn new(client_name: String) -> Self {
        Self {
            client_name,
            start_time: Instant::now(),
            attempts: Vec::new(),
        }
    }

    pub fn record_attempt(
        &mut self,
        capture_id: Uuid,
        attempt: u32,
        latency: Duration,
        success: bool,
        failure_reason: Option<String>,
    ) {
        let start_time = chrono::Utc::now().timestamp_millis().max(0) as u64;

        self.attempts.push(AttemptMetric {
            capture_id,
            attempt,
            start_time,
            latency_ms: latency.as_millis() as u64,
            success,
            failure_reason,
        });
    }

    pub fn aggregate(&self) -> AggregatedStats {
        let mut stats = AggregatedStats::default();

        if self.attempts.is_empty() {
            return stats;
        }

        stats.total_attempts = self.attempts.len();
        stats.successful_attempts = self.attempts.iter().filter(|a| a.success).count();
        stats.failed_attempts = stats.total_attempts - stats.successful_attempts;
        stats.failure_rate = (stats.failed_attempts as f64 / stats.total_attempts as f64) * 100.0;
        stats.captures_delivered = stats.successful_attempts;
        stats.max_attempts_per_capture = self.attempts.iter().map(|a| a.attempt).max().unwrap_or(0);

        // Latency statistics from successful attempts
        let mut latencies: Vec<u64> = self
            .attempts
            .iter()
            .filter(|a| a.success)
            .map(|a| a.latency_ms)
            .collect();

        if !latencies.is_empty() {
            latencies.sort_unstable();

            stats.latency_min_ms = latencies[0];
            stats.latency_max_ms = latencies[latencies.len() - 1];
            stats.latency_avg_ms =
                latencies.iter().sum::<u64>() as f64 / latencies.len() as f64;

            stats.latency_p50_ms = percentile(&latencies, 50.0);
            stats.latency_p95_ms = percentile(&latencies, 95.0);
            stats.latency_p99_ms = percentile(&latencies, 99.0);
        }

        for attempt in self.attempts.iter().filter(|a| !a.success) {
            if let Some(reason) = &attempt.failure_reason {
                *stats.failure_reasons.entry(reason.clone()).or_insert(0) += 1;
            }
        }

        stats
    }

    pub fn export_to_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let stats = self.aggregate();

        let output = serde_json::json!({
            "client_name": self.client_name,
            "run_duration_secs": self.start_time.elapsed().as_secs(),
            "aggregated_stats": stats,
        });

        let json_string = serde_json::to_string_pretty(&output)?;
        let mut file = File::create(path)?;
        file.write_all(json_string.as_bytes())?;

        Ok(())
    }
}

fn percentile(sorted_data: &[u64], percentile: f64) -> u64 {
    if sorted_data.is_empty() {
        return 0;
    }

    let index = (percentile / 100.0 * (sorted_data.len() - 1) as f64).round() as usize;
    sorted_data[index.min(sorted_data.len() - 1)]
}
