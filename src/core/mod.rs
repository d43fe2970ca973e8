//! Core types and traits for the slotted messenger
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;
pub mod settings;
pub mod serde;

pub use self::error::{Error, Result};
pub use self::types::{is_callsign_char, Callsign, Frequency, MessengerConfig, Timestamp};
pub use self::settings::{MemorySettings, Settings};

/// Characters carried by one physical packet
pub const PACKET_SIZE: usize = 13;

/// Payload characters in a non-final fragment (one character is the continuation mark)
pub const FRAGMENT_PAYLOAD: usize = PACKET_SIZE - 1;

/// Payload characters in the final fragment (three characters hold the check suffix)
pub const FINAL_PAYLOAD: usize = PACKET_SIZE - 3;

/// Largest packet count a header can announce (single decimal digit)
pub const MAX_PACKETS: usize = 9;

/// Hard cap on the logical message length
pub const MAX_MESSAGE_LEN: usize = 150;

/// Shortest accepted callsign
pub const MIN_CALLSIGN: usize = 3;

/// Longest accepted callsign
pub const MAX_CALLSIGN: usize = 10;

/// Longest presence/status text kept for a contact
pub const MAX_STATUS: usize = 9;

/// Length of a slot in seconds
pub const SLOT_SECS: u64 = 15;

/// Protocol version marker closing every check token
pub const PROTOCOL_VERSION: char = '0';
