//! Protocol implementation module
//!
//! This module defines the on-air framing, the message model and the
//! messenger engine with its reassembly and slot scheduling halves.

pub mod codec;
pub mod message;
pub mod reassembly;
pub mod scheduler;
pub mod state;

pub use self::message::{Direction, IncomingState, Message, MessageState, OutgoingState};
pub use self::reassembly::Routed;
pub use self::state::{Messenger, Transmission};
