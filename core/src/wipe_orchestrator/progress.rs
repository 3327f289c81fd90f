use std::time::Duration;

const MIB: f64 = 1024.0 * 1024.0;

/// Derived progress counters for one observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub percent: f64,
    /// MiB/s averaged since the job started
    pub mbps: f64,
    pub eta_sec: Option<u64>,
}

/// Percent (clamped to 0..=100), average throughput and ETA.
///
/// Without a known size there is no percent and no ETA.
pub fn compute(bytes: u64, size: u64, elapsed: Duration) -> ProgressSnapshot {
    let percent = if size > 0 {
        (bytes as f64 / size as f64 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let seconds = elapsed.as_secs_f64().max(1e-6);
    let rate = bytes as f64 / seconds;

    let eta_sec = if size > 0 && bytes > 0 && rate > 0.0 {
        Some((size.saturating_sub(bytes) as f64 / rate) as u64)
    } else {
        None
    };

    ProgressSnapshot {
        percent,
        mbps: rate / MIB,
        eta_sec,
    }
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// One-line summary for the daemon log
pub fn describe(bytes: u64, size: u64, snapshot: &ProgressSnapshot) -> String {
    let eta = snapshot
        .eta_sec
        .map(|s| humantime::format_duration(Duration::from_secs(s)).to_string())
        .unwrap_or_else(|| "unknown".to_string());

    format!(
        "progress {:.1}% ({}/{}) {:.1} MiB/s, eta {}",
        snapshot.percent,
        human_bytes(bytes),
        human_bytes(size),
        snapshot.mbps,
        eta
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_halfway() {
        let size = 1024 * 1024 * 1024;
        let p = compute(size / 2, size, Duration::from_secs(4));

        assert!((p.percent - 50.0).abs() < 1e-9);
        assert!((p.mbps - 128.0).abs() < 1e-9);
        assert_eq!(p.eta_sec, Some(4));
    }

    #[test]
    fn test_compute_clamps_overshoot() {
        let p = compute(2_000, 1_000, Duration::from_secs(1));
        assert_eq!(p.percent, 100.0);
        assert_eq!(p.eta_sec, Some(0));
    }

    #[test]
    fn test_compute_unknown_size() {
        let p = compute(4096, 0, Duration::from_secs(1));
        assert_eq!(p.percent, 0.0);
        assert_eq!(p.eta_sec, None);
        assert!(p.mbps > 0.0);
    }

    #[test]
    fn test_compute_no_bytes_yet() {
        let p = compute(0, 1_000, Duration::ZERO);
        assert_eq!(p.percent, 0.0);
        assert_eq!(p.mbps, 0.0);
        assert_eq!(p.eta_sec, None);
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(64 * 1024 * 1024 * 1024), "64.0 GiB");
    }

    #[test]
    fn test_describe() {
        let p = compute(1024 * 1024, 4 * 1024 * 1024, Duration::from_secs(1));
        assert_eq!(describe(1024 * 1024, 4 * 1024 * 1024, &p), "progress 25.0% (1.0 MiB/4.0 MiB) 1.0 MiB/s, eta 3s");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn percent_stays_in_range(bytes in any::<u64>(), size in any::<u64>(), ms in 0u64..10_000_000) {
                let p = compute(bytes, size, Duration::from_millis(ms));
                prop_assert!((0.0..=100.0).contains(&p.percent));
                prop_assert!(p.mbps >= 0.0);
            }

            #[test]
            fn unknown_size_has_no_eta(bytes in any::<u64>(), ms in 0u64..10_000_000) {
                let p = compute(bytes, 0, Duration::from_millis(ms));
                prop_assert_eq!(p.percent, 0.0);
                prop_assert_eq!(p.eta_sec, None);
            }

            #[test]
            fn human_bytes_has_a_unit(bytes in any::<u64>()) {
                let text = human_bytes(bytes);
                prop_assert!(text.ends_with('B'), "{}", text);
            }
        }
    }
}
