//! Monotonic local clock and the master-clock offset it is measured against.
//!
//! `local_clock()` never moves backward and is immune to wall-clock
//! adjustments (NTP steps, DST, manual changes) — it is a pure
//! microsecond-granularity view of [`std::time::Instant`]. The master clock
//! is derived from it by subtracting a learned offset; see
//! [`crate::channel::Channel`] for how that offset is established and
//! refined.

use std::sync::OnceLock;
use std::time::Instant;

/// Epoch instant the monotonic clock is measured from, lazily pinned to the
/// first call. Using a fixed epoch rather than re-reading `Instant::now()`
/// each time keeps `local_clock()` a pure function of elapsed time.
fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Microseconds elapsed since an arbitrary, process-local start point.
///
/// Steady across wall-clock adjustments: built on [`Instant`], never on
/// [`std::time::SystemTime`].
pub fn local_clock() -> u64 {
    epoch().elapsed().as_micros() as u64
}

/// Derive the master clock from a local clock reading and a learned offset.
///
/// Returns `0` when `offset == 0` (no master sync observed yet) — this is a
/// sentinel, not an error. Callers must treat `0` as "unknown" and must not
/// schedule against it.
pub fn master_clock_from(local: u64, offset_us: u64) -> u64 {
    if offset_us == 0 {
        0
    } else {
        local.saturating_sub(offset_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_clock_is_monotone() {
        let a = local_clock();
        std::thread::sleep(std::time::Duration::from_micros(200));
        let b = local_clock();
        assert!(b >= a);
    }

    #[test]
    fn master_clock_unknown_until_synced() {
        assert_eq!(master_clock_from(1_000_000, 0), 0);
    }

    #[test]
    fn master_clock_subtracts_offset() {
        assert_eq!(master_clock_from(1_000_000, 600_000), 400_000);
    }
}
