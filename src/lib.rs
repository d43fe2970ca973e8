//! Slotchat: store-and-forward text messaging over a slotted, half-duplex radio channel
//!
//! One packet of 13 characters fits in each 15-second slot. Messages are cut
//! into fragments behind a checksummed header, reassembled and acknowledged by
//! the receiving station, and retried when no acknowledgment arrives. Stations
//! find each other through periodic presence beacons.
//!
//! The [`Messenger`] engine is synchronous and takes the current time on every
//! call; a [`Station`] runs it against a modem link, a clock and a UI sink.

pub mod core;
pub mod network;
pub mod protocol;
pub mod store;
pub mod time;
pub mod ui;

// Re-export commonly used items
pub use crate::core::{Callsign, Error, MemorySettings, MessengerConfig, Result, Settings};
pub use crate::network::{Decoded, ModemCodec, Station, StationHandle};
pub use crate::protocol::{Messenger, Transmission};
pub use crate::store::{Directory, FileStore};
pub use crate::ui::{UiEvent, UiSink};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
