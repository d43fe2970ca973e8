//! Contact directory and its persistence
//!
//! The directory owns every contact and, through them, every message. The
//! persistence half renders it to and from the line-oriented store file.

pub mod directory;
pub mod persist;

pub use self::directory::{Contact, Directory};
pub use self::persist::FileStore;
