//! Wall-clock timestamps for packets and frames.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as microseconds since the Unix epoch.
///
/// Every packet and storage frame carries one of these, so interleaved
/// records from different sources can be re-ordered on replay.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_monotone_enough() {
        let a = now_micros();
        let b = now_micros();
        assert!(b >= a);
        // Sanity: after 2020-01-01 in microseconds.
        assert!(a > 1_577_836_800_000_000);
    }
}
