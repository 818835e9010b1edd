use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Monotonically increasing counter.
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, val: u64) {
        self.value.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Value that can go up or down.
pub struct Gauge {
    name: &'static str,
    help: &'static str,
    value: AtomicI64,
}

impl Gauge {
    const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicI64::new(0),
        }
    }

    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Failover metrics for one instance, rendered in Prometheus text format.
pub struct HaMetrics {
    pub is_leader: Gauge,
    pub autosave_sessions: Gauge,
    pub leadership_acquired: Counter,
    pub leadership_lost: Counter,
    pub checkpoints_saved: Counter,
    pub checkpoint_save_errors: Counter,
    pub sessions_restored: Counter,
    pub sessions_dropped: Counter,
}

impl HaMetrics {
    pub fn new() -> Self {
        Self {
            is_leader: Gauge::new(
                "encore_is_leader",
                "1 while this instance holds the leader lease",
            ),
            autosave_sessions: Gauge::new(
                "encore_autosave_sessions",
                "Sessions with an armed checkpoint timer",
            ),
            leadership_acquired: Counter::new(
                "encore_leadership_acquired_total",
                "Times this instance acquired the leader lease",
            ),
            leadership_lost: Counter::new(
                "encore_leadership_lost_total",
                "Times this instance lost or released the leader lease",
            ),
            checkpoints_saved: Counter::new(
                "encore_checkpoints_saved_total",
                "Playback checkpoints written",
            ),
            checkpoint_save_errors: Counter::new(
                "encore_checkpoint_save_errors_total",
                "Playback checkpoint writes that failed",
            ),
            sessions_restored: Counter::new(
                "encore_sessions_restored_total",
                "Playback sessions resumed after a failover",
            ),
            sessions_dropped: Counter::new(
                "encore_sessions_dropped_total",
                "Checkpoints discarded as unrestorable",
            ),
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();

        for counter in [
            &self.leadership_acquired,
            &self.leadership_lost,
            &self.checkpoints_saved,
            &self.checkpoint_save_errors,
            &self.sessions_restored,
            &self.sessions_dropped,
        ] {
            let _ = writeln!(output, "# HELP {} {}", counter.name, counter.help);
            let _ = writeln!(output, "# TYPE {} counter", counter.name);
            let _ = writeln!(output, "{} {}", counter.name, counter.get());
        }

        for gauge in [&self.is_leader, &self.autosave_sessions] {
            let _ = writeln!(output, "# HELP {} {}", gauge.name, gauge.help);
            let _ = writeln!(output, "# TYPE {} gauge", gauge.name);
            let _ = writeln!(output, "{} {}", gauge.name, gauge.get());
        }

        output
    }
}

impl Default for HaMetrics {
    fn default() -> Self {
        Self::new()
    }
}
