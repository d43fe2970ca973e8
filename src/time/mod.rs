//! Time sources and slot arithmetic
//!
//! The engine never reads a clock itself: every entry point takes `now` as
//! seconds since the Unix epoch. The station runtime obtains that value from a
//! [`Clock`]:
//!
//! - [`SystemClock`] reads the UTC wall clock
//! - [`ManualClock`] is driven by hand in tests
//! - [`InstantClock`] follows tokio's (possibly paused) timer in simulations
//! - [`MonotonicClock`] wraps either so time never steps backwards
//!
//! # Examples
//!
//! ```
//! use slotchat::time::{Clock, ManualClock, util};
//!
//! let clock = ManualClock::new(1_700_000_010);
//! assert!(util::is_slot_boundary(clock.now(), 15));
//! clock.advance(1);
//! assert!(!util::is_slot_boundary(clock.now(), 15));
//! ```

mod source;

pub use self::source::{Clock, InstantClock, ManualClock, MonotonicClock, SystemClock};

/// Slot arithmetic shared by the scheduler and the runtime
pub mod util {
    use crate::core::Timestamp;

    /// Whether `now` falls exactly on the start of a slot
    pub fn is_slot_boundary(now: Timestamp, slot_secs: u64) -> bool {
        slot_secs != 0 && now % slot_secs == 0
    }

    /// Start of the slot containing `now`
    pub fn slot_start(now: Timestamp, slot_secs: u64) -> Timestamp {
        if slot_secs == 0 {
            return now;
        }
        now - now % slot_secs
    }

    /// Start of the first slot strictly after `now`
    pub fn next_slot(now: Timestamp, slot_secs: u64) -> Timestamp {
        slot_start(now, slot_secs) + slot_secs
    }
}

#[cfg(test)]
mod tests {
    use super::util::*;

    #[test]
    fn test_slot_boundaries() {
        assert!(is_slot_boundary(30, 15));
        assert!(!is_slot_boundary(31, 15));
        assert!(!is_slot_boundary(31, 0));
    }

    #[test]
    fn test_slot_start_and_next() {
        assert_eq!(slot_start(44, 15), 30);
        assert_eq!(slot_start(45, 15), 45);
        assert_eq!(next_slot(44, 15), 45);
        assert_eq!(next_slot(45, 15), 60);
    }
}
