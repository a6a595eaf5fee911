// Metrics collection for the interaction endpoint and background jobs

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

const LATENCY_WINDOW: usize = 1000;

/// Request counts and latency distribution for one endpoint
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    request_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    total_latency_ms: Arc<AtomicU64>,
    max_latency_ms: Arc<AtomicU64>,
    // last LATENCY_WINDOW samples, for percentiles
    latency_samples: Arc<Mutex<VecDeque<u64>>>,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            total_latency_ms: Arc::new(AtomicU64::new(0)),
            max_latency_ms: Arc::new(AtomicU64::new(0)),
            latency_samples: Arc::new(Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW))),
        }
    }

    pub fn record_request(&self, latency_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            if samples.len() == LATENCY_WINDOW {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.request_count();
        if count == 0 {
            return 0.0;
        }
        self.total_latency_ms.load(Ordering::Relaxed) as f64 / count as f64
    }

    fn percentiles(&self, ps: [u8; 3]) -> [u64; 3] {
        let mut sorted: Vec<u64> = match self.latency_samples.lock() {
            Ok(samples) => samples.iter().copied().collect(),
            Err(_) => return [0; 3],
        };
        if sorted.is_empty() {
            return [0; 3];
        }
        sorted.sort_unstable();
        ps.map(|p| {
            let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
            sorted[index]
        })
    }

    pub fn stats(&self) -> EndpointStats {
        let [p50, p95, p99] = self.percentiles([50, 95, 99]);
        EndpointStats {
            request_count: self.request_count(),
            error_count: self.error_count(),
            avg_latency_ms: self.avg_latency_ms(),
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: p50,
            p95_latency_ms: p95,
            p99_latency_ms: p99,
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Background job counters
#[derive(Debug, Default)]
pub struct JobMetrics {
    accepted: AtomicU64,
    rejected_busy: AtomicU64,
    in_flight: AtomicU64,
    completed: AtomicU64,
    failed_validation: AtomicU64,
    failed_internal: AtomicU64,
    delivery_failures: AtomicU64,
    total_job_time_ms: AtomicU64,
}

impl JobMetrics {
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_busy(&self) {
        self.rejected_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// A job reached a terminal state. `validation` is only meaningful when `success` is false.
    pub fn record_finished(&self, success: bool, validation: bool, elapsed_ms: u64) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.total_job_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        let counter = match (success, validation) {
            (true, _) => &self.completed,
            (false, true) => &self.failed_validation,
            (false, false) => &self.failed_internal,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> JobStats {
        let completed = self.completed.load(Ordering::Relaxed);
        let failed_validation = self.failed_validation.load(Ordering::Relaxed);
        let failed_internal = self.failed_internal.load(Ordering::Relaxed);
        let finished = completed + failed_validation + failed_internal;
        let avg_job_time_ms = if finished == 0 {
            0.0
        } else {
            self.total_job_time_ms.load(Ordering::Relaxed) as f64 / finished as f64
        };

        JobStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_busy: self.rejected_busy.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            completed,
            failed_validation,
            failed_internal,
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            avg_job_time_ms,
        }
    }
}

#[derive(Debug)]
pub struct AppMetrics {
    pub interactions: EndpointMetrics,
    pub jobs: Arc<JobMetrics>,
    started: Instant,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self {
            interactions: EndpointMetrics::new(),
            jobs: Arc::new(JobMetrics::default()),
            started: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsResponse {
        MetricsResponse {
            timestamp: Utc::now(),
            system: SystemMetrics::collect(self.uptime_seconds()),
            interactions: self.interactions.stats(),
            jobs: self.jobs.snapshot(),
        }
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub interactions: EndpointStats,
    pub jobs: JobStats,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

impl SystemMetrics {
    fn collect(uptime_seconds: u64) -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let memory_used = system.used_memory();
        let memory_total = system.total_memory();
        let memory_usage_percent = if memory_total > 0 {
            (memory_used as f64 / memory_total as f64 * 100.0) as f32
        } else {
            0.0
        };

        let load = sysinfo::System::load_average().one;

        Self {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            uptime_seconds,
            system_load: (load > 0.0).then_some(load),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct JobStats {
    pub accepted: u64,
    pub rejected_busy: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed_validation: u64,
    pub failed_internal: u64,
    pub delivery_failures: u64,
    pub avg_job_time_ms: f64,
}
