//! Best-effort system metrics for heartbeats.
//!
//! Reads procfs where the platform has one and leaves fields empty
//! elsewhere; a heartbeat never fails because a metric was unreadable.

use obscura_protocol::AgentMetrics;

/// Collect whatever metrics this platform exposes cheaply.
pub fn collect() -> AgentMetrics {
    AgentMetrics {
        cpu_percent: read_load_percent(),
        memory_mb: read_available_memory_mb(),
        disk_free_gb: None,
    }
}

#[cfg(target_os = "linux")]
fn read_available_memory_mb() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb / 1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_available_memory_mb() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn read_load_percent() -> Option<f64> {
    // One-minute load average scaled by core count, capped at 100.
    let loadavg = std::fs::read_to_string("/proc/loadavg").ok()?;
    let load: f64 = loadavg.split_whitespace().next()?.parse().ok()?;
    let cores = std::thread::available_parallelism().ok()?.get() as f64;
    Some((load / cores * 100.0).min(100.0))
}

#[cfg(not(target_os = "linux"))]
fn read_load_percent() -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_never_panics() {
        let metrics = collect();
        if let Some(cpu) = metrics.cpu_percent {
            assert!((0.0..=100.0).contains(&cpu));
        }
    }
}
