//! Metrics registry (spec §1 lists the HTTP endpoint itself as out of
//! scope; the registry and an optional file dump are the ambient
//! observability surface this crate still owns).

use std::collections::HashMap;
use std::sync::Mutex;

/// Mutex-guarded maps of counters and gauges (spec §5 "Metrics registry").
#[derive(Default)]
pub struct Metrics {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, f64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    pub fn incr(&self, name: &str, by: u64) {
        let mut counters = self.counters.lock().expect("metrics mutex poisoned");
        *counters.entry(name.to_string()).or_insert(0) += by;
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        let mut gauges = self.gauges.lock().expect("metrics mutex poisoned");
        gauges.insert(name.to_string(), value);
    }

    pub fn counter(&self, name: &str) -> u64 {
        *self
            .counters
            .lock()
            .expect("metrics mutex poisoned")
            .get(name)
            .unwrap_or(&0)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.lock().expect("metrics mutex poisoned").get(name).copied()
    }

    /// Render a Prometheus-style text snapshot, suitable for a file dump or
    /// an HTTP handler the orchestrator wires up (both out of this crate's
    /// scope beyond this rendering step).
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let counters = self.counters.lock().expect("metrics mutex poisoned");
        let mut counter_names: Vec<&String> = counters.keys().collect();
        counter_names.sort();
        for name in counter_names {
            out.push_str(&format!("{name} {}\n", counters[name]));
        }
        drop(counters);

        let gauges = self.gauges.lock().expect("metrics mutex poisoned");
        let mut gauge_names: Vec<&String> = gauges.keys().collect();
        gauge_names.sort();
        for name in gauge_names {
            out.push_str(&format!("{name} {}\n", gauges[name]));
        }
        out
    }

    pub fn dump_to_file(&self, path: &str) -> std::io::Result<()> {
        std::fs::write(path, self.render_text())
    }
}
