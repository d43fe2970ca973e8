use std::borrow::Borrow;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Deserialize};

use super::{Error, Result};

/// Seconds since the Unix epoch, as delivered by the clock interface
pub type Timestamp = u64;

/// Audio offset in Hz at which a station transmits
pub type Frequency = u32;

/// A station identifier: the primary key of the contact directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Callsign(String);

impl Callsign {
    /// Creates a callsign, rejecting anything outside `A-Z 0-9 /` or outside the length bounds
    pub fn new(call: impl Into<String>) -> Result<Self> {
        let call = call.into();
        if call.len() < super::MIN_CALLSIGN || call.len() > super::MAX_CALLSIGN {
            return Err(Error::invalid_callsign(format!(
                "'{}' must be {} to {} characters",
                call,
                super::MIN_CALLSIGN,
                super::MAX_CALLSIGN
            )));
        }
        if !call.chars().all(is_callsign_char) {
            return Err(Error::invalid_callsign(format!(
                "'{}' may only contain A-Z, 0-9 and /",
                call
            )));
        }
        Ok(Callsign(call))
    }

    /// Returns the callsign text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Characters allowed in a callsign
pub fn is_callsign_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || c == '/'
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Callsign {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Callsign {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Callsign {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Callsign::new(s)
    }
}

impl TryFrom<String> for Callsign {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Callsign::new(s)
    }
}

impl From<Callsign> for String {
    fn from(call: Callsign) -> Self {
        call.0
    }
}

impl PartialEq<str> for Callsign {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Callsign {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Timing and capacity configuration for the messenger engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// Length of one transmission slot
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub slot: Duration,
    /// How long a fully transmitted message waits for its acknowledgment before retrying
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub retry_window: Duration,
    /// Contacts heard within this window are considered reachable
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub freshness_window: Duration,
    /// Base period between presence beacons
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub beacon_period: Duration,
    /// Upper bound of the random delay added to each beacon period
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub beacon_jitter: Duration,
    /// Contacts heard within this window are shown as active
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub stale_after: Duration,
    /// Period between unconditional writes of the store
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub save_interval: Duration,
    /// Frequency window (Hz either side) used to attribute fragments to a contact
    pub frequency_tolerance: Frequency,
    /// Extra slots added to the pause after starting a send
    pub send_margin_slots: u64,
    /// Extra slots added to the pause after receiving a header
    pub reassembly_margin_slots: u64,
    /// Optional hard limit on directory size
    pub max_contacts: Option<usize>,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        MessengerConfig {
            slot: Duration::from_secs(super::SLOT_SECS),
            retry_window: Duration::from_secs(480),
            freshness_window: Duration::from_secs(600),
            beacon_period: Duration::from_secs(300),
            beacon_jitter: Duration::from_secs(30),
            stale_after: Duration::from_secs(100),
            save_interval: Duration::from_secs(300),
            frequency_tolerance: 20,
            send_margin_slots: 2,
            reassembly_margin_slots: 1,
            max_contacts: None,
        }
    }
}

impl MessengerConfig {
    /// Loads a configuration from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: MessengerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the timing values are usable
    pub fn validate(&self) -> Result<()> {
        if self.slot.as_secs() == 0 {
            return Err(Error::config("Slot length must be at least one second"));
        }
        if self.retry_window < self.slot {
            return Err(Error::config("Retry window shorter than a slot"));
        }
        if self.beacon_period < self.slot {
            return Err(Error::config("Beacon period shorter than a slot"));
        }
        if self.max_contacts == Some(0) {
            return Err(Error::config("max_contacts must be positive when set"));
        }
        Ok(())
    }

    /// Slot length in whole seconds
    pub fn slot_secs(&self) -> u64 {
        self.slot.as_secs().max(1)
    }
}
