//! Local identity and UI-selected values
//!
//! The engine owns none of this storage: it reads and writes it through the
//! [`Settings`] accessors so the host application can keep it wherever it likes.

use std::path::Path;

use serde::{Serialize, Deserialize};

use super::{Callsign, Error, Frequency, Result};

/// Accessors for the station configuration held outside the engine
pub trait Settings: Send {
    /// Our own callsign
    fn callsign(&self) -> &Callsign;

    /// Presence selection as chosen in the UI (e.g. `READY`, `AWAY`)
    fn presence(&self) -> &str;

    /// Stores a new presence selection
    fn set_presence(&mut self, presence: String);

    /// Audio offset in Hz used for our own transmissions
    fn tx_pitch(&self) -> Frequency;

    /// Contact currently shown in the chat view
    fn selected_contact(&self) -> Option<&Callsign>;

    /// Changes the contact shown in the chat view
    fn set_selected_contact(&mut self, contact: Option<Callsign>);
}

/// In-memory settings, loadable from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    pub callsign: Callsign,
    #[serde(default = "default_presence")]
    pub presence: String,
    #[serde(default = "default_pitch")]
    pub tx_pitch: Frequency,
    #[serde(default)]
    pub selected: Option<Callsign>,
}

fn default_presence() -> String {
    "READY".to_string()
}

fn default_pitch() -> Frequency {
    1500
}

impl MemorySettings {
    /// Creates settings for `callsign` with a READY presence and a 1500 Hz pitch
    pub fn new(callsign: Callsign) -> Self {
        MemorySettings {
            callsign,
            presence: default_presence(),
            tx_pitch: default_pitch(),
            selected: None,
        }
    }

    /// Sets the transmit pitch
    pub fn with_pitch(mut self, tx_pitch: Frequency) -> Self {
        self.tx_pitch = tx_pitch;
        self
    }

    /// Loads settings from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: MemorySettings = serde_json::from_str(&text)?;
        if settings.tx_pitch == 0 {
            return Err(Error::config("tx_pitch must be non-zero"));
        }
        Ok(settings)
    }
}

impl Settings for MemorySettings {
    fn callsign(&self) -> &Callsign {
        &self.callsign
    }

    fn presence(&self) -> &str {
        &self.presence
    }

    fn set_presence(&mut self, presence: String) {
        self.presence = presence;
    }

    fn tx_pitch(&self) -> Frequency {
        self.tx_pitch
    }

    fn selected_contact(&self) -> Option<&Callsign> {
        self.selected.as_ref()
    }

    fn set_selected_contact(&mut self, contact: Option<Callsign>) {
        self.selected = contact;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let settings: MemorySettings = serde_json::from_str(r#"{"callsign":"W7PUA"}"#).unwrap();
        assert_eq!(settings.callsign(), &Callsign::new("W7PUA").unwrap());
        assert_eq!(settings.presence(), "READY");
        assert_eq!(settings.tx_pitch(), 1500);
        assert!(settings.selected_contact().is_none());
    }

    #[test]
    fn test_selection_round_trip() {
        let mut settings = MemorySettings::new(Callsign::new("W7PUA").unwrap());
        settings.set_selected_contact(Some(Callsign::new("VU2ESE").unwrap()));
        assert_eq!(settings.selected_contact().unwrap(), "VU2ESE");
        settings.set_selected_contact(None);
        assert!(settings.selected_contact().is_none());
    }

    #[test]
    fn test_zero_pitch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.json");
        std::fs::write(&path, r#"{"callsign":"W7PUA","tx_pitch":0}"#).unwrap();
        assert!(matches!(MemorySettings::from_json_file(&path), Err(Error::Config(_))));
    }
}
