//! Prometheus-compatible metrics endpoint
//!
//! Exposes spawn scheduler metrics for Grafana dashboards.
//! - /metrics: Prometheus format for scraping
//! - /json: Simple JSON format for direct API access
//! - /health: Health check endpoint

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Metrics registry for the bot scheduler.
#[derive(Debug)]
pub struct Metrics {
    // Bot population
    pub bots_active: AtomicU64,
    pub bots_peak: AtomicU64,
    pub spawns_total: AtomicU64,
    pub despawns_total: AtomicU64,
    pub spawn_failures_total: AtomicU64,
    pub spawn_attempts_total: AtomicU64,

    // Spawn queue
    pub queue_depth: AtomicU64,
    pub queue_depth_critical: AtomicU64,
    pub queue_depth_high: AtomicU64,
    pub queue_depth_normal: AtomicU64,
    pub queue_depth_low: AtomicU64,
    pub queue_dequeued_total: AtomicU64,
    pub queue_wait_avg_ms: AtomicU64,

    // Flow control (0=None/Closed, see level/state enums)
    pub pressure_level: AtomicU64,
    pub breaker_state: AtomicU64,
    pub permitted_rate_millis: AtomicU64, // bots/sec x1000
    pub startup_phase: AtomicU64,

    // Population model
    pub zones_tracked: AtomicU64,
    pub reconcile_runs_total: AtomicU64,

    // Scheduler tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Server uptime
    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            bots_active: AtomicU64::new(0),
            bots_peak: AtomicU64::new(0),
            spawns_total: AtomicU64::new(0),
            despawns_total: AtomicU64::new(0),
            spawn_failures_total: AtomicU64::new(0),
            spawn_attempts_total: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            queue_depth_critical: AtomicU64::new(0),
            queue_depth_high: AtomicU64::new(0),
            queue_depth_normal: AtomicU64::new(0),
            queue_depth_low: AtomicU64::new(0),
            queue_dequeued_total: AtomicU64::new(0),
            queue_wait_avg_ms: AtomicU64::new(0),
            pressure_level: AtomicU64::new(0),
            breaker_state: AtomicU64::new(0),
            permitted_rate_millis: AtomicU64::new(0),
            startup_phase: AtomicU64::new(0),
            zones_tracked: AtomicU64::new(0),
            reconcile_runs_total: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(1000)),
        }
    }

    /// Record a scheduler tick time and update percentiles.
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > 1000 {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us
                .store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn pressure_name(&self) -> &'static str {
        match self.pressure_level.load(Ordering::Relaxed) {
            0 => "none",
            1 => "low",
            2 => "medium",
            3 => "high",
            _ => "critical",
        }
    }

    fn breaker_name(&self) -> &'static str {
        match self.breaker_state.load(Ordering::Relaxed) {
            0 => "closed",
            1 => "open",
            _ => "half_open",
        }
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Population metrics
        metric!("botrealm_bots_active", "Currently active bots", "gauge",
            self.bots_active.load(Ordering::Relaxed));
        metric!("botrealm_bots_peak", "Peak concurrent bots", "gauge",
            self.bots_peak.load(Ordering::Relaxed));
        metric!("botrealm_spawns_total", "Total bots spawned", "counter",
            self.spawns_total.load(Ordering::Relaxed));
        metric!("botrealm_despawns_total", "Total bots despawned", "counter",
            self.despawns_total.load(Ordering::Relaxed));
        metric!("botrealm_spawn_failures_total", "Total failed spawn attempts", "counter",
            self.spawn_failures_total.load(Ordering::Relaxed));
        metric!("botrealm_spawn_attempts_total", "Total spawn attempts", "counter",
            self.spawn_attempts_total.load(Ordering::Relaxed));

        // Queue metrics
        metric!("botrealm_queue_depth", "Pending spawn requests", "gauge",
            self.queue_depth.load(Ordering::Relaxed));
        metric!("botrealm_queue_dequeued_total", "Requests dequeued", "counter",
            self.queue_dequeued_total.load(Ordering::Relaxed));
        metric!("botrealm_queue_wait_avg_ms", "Mean queue wait in milliseconds", "gauge",
            self.queue_wait_avg_ms.load(Ordering::Relaxed));

        // Flow control
        metric!("botrealm_pressure_level", "Resource pressure (0=None, 4=Critical)", "gauge",
            self.pressure_level.load(Ordering::Relaxed));
        output.push_str(&format!(
            "# HELP botrealm_pressure_state Human-readable pressure state\n# TYPE botrealm_pressure_state gauge\nbotrealm_pressure_state{{state=\"{}\"}} 1\n",
            self.pressure_name()
        ));
        metric!("botrealm_breaker_state", "Circuit breaker (0=Closed, 1=Open, 2=HalfOpen)", "gauge",
            self.breaker_state.load(Ordering::Relaxed));
        output.push_str(&format!(
            "# HELP botrealm_breaker Human-readable breaker state\n# TYPE botrealm_breaker gauge\nbotrealm_breaker{{state=\"{}\"}} 1\n",
            self.breaker_name()
        ));

        // Permitted rate (stored as x1000, display as float)
        let rate = self.permitted_rate_millis.load(Ordering::Relaxed);
        output.push_str(&format!(
            "# HELP botrealm_permitted_rate Permitted spawn rate in bots per second\n# TYPE botrealm_permitted_rate gauge\nbotrealm_permitted_rate {:.3}\n",
            rate as f64 / 1000.0
        ));

        metric!("botrealm_startup_phase", "Startup phase (0=disengaged, 4=unrestricted)", "gauge",
            self.startup_phase.load(Ordering::Relaxed));

        // Tick timing
        metric!("botrealm_tick_time_microseconds", "Current scheduler tick time", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("botrealm_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("botrealm_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("botrealm_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("botrealm_tick_count", "Total scheduler ticks", "counter",
            self.tick_count.load(Ordering::Relaxed));

        metric!("botrealm_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        // Extended metrics (feature-gated: metrics_extended)
        #[cfg(feature = "metrics_extended")]
        {
            metric!("botrealm_queue_depth_critical", "Pending CRITICAL requests", "gauge",
                self.queue_depth_critical.load(Ordering::Relaxed));
            metric!("botrealm_queue_depth_high", "Pending HIGH requests", "gauge",
                self.queue_depth_high.load(Ordering::Relaxed));
            metric!("botrealm_queue_depth_normal", "Pending NORMAL requests", "gauge",
                self.queue_depth_normal.load(Ordering::Relaxed));
            metric!("botrealm_queue_depth_low", "Pending LOW requests", "gauge",
                self.queue_depth_low.load(Ordering::Relaxed));
            metric!("botrealm_zones_tracked", "Zones in the population table", "gauge",
                self.zones_tracked.load(Ordering::Relaxed));
            metric!("botrealm_reconcile_runs_total", "Zone target recomputes", "counter",
                self.reconcile_runs_total.load(Ordering::Relaxed));
        }

        output
    }

    /// Generate JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        format!(
            r#"{{
  "bots": {{
    "active": {},
    "peak": {},
    "spawned_total": {},
    "despawned_total": {},
    "failures_total": {},
    "attempts_total": {}
  }},
  "queue": {{
    "depth": {},
    "dequeued_total": {},
    "wait_avg_ms": {}
  }},
  "flow": {{
    "pressure": {},
    "pressure_name": "{}",
    "breaker": {},
    "breaker_name": "{}",
    "permitted_rate": {:.3},
    "startup_phase": {}
  }},
  "ticks": {{
    "time_us": {},
    "time_p95_us": {},
    "time_p99_us": {},
    "count": {}
  }},
  "uptime_seconds": {}
}}"#,
            self.bots_active.load(Ordering::Relaxed),
            self.bots_peak.load(Ordering::Relaxed),
            self.spawns_total.load(Ordering::Relaxed),
            self.despawns_total.load(Ordering::Relaxed),
            self.spawn_failures_total.load(Ordering::Relaxed),
            self.spawn_attempts_total.load(Ordering::Relaxed),
            self.queue_depth.load(Ordering::Relaxed),
            self.queue_dequeued_total.load(Ordering::Relaxed),
            self.queue_wait_avg_ms.load(Ordering::Relaxed),
            self.pressure_level.load(Ordering::Relaxed),
            self.pressure_name(),
            self.breaker_state.load(Ordering::Relaxed),
            self.breaker_name(),
            self.permitted_rate_millis.load(Ordering::Relaxed) as f64 / 1000.0,
            self.startup_phase.load(Ordering::Relaxed),
            self.tick_time_us.load(Ordering::Relaxed),
            self.tick_time_p95_us.load(Ordering::Relaxed),
            self.tick_time_p99_us.load(Ordering::Relaxed),
            self.tick_count.load(Ordering::Relaxed),
            self.uptime_seconds(),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    let response = if request.starts_with("GET /metrics/json")
                        || request.starts_with("GET /json")
                    {
                        let body = metrics.to_json();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /metrics") {
                        let body = metrics.to_prometheus();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /health") || request.starts_with("GET /") {
                        let body = "OK";
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
