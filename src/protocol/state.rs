use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::core::{Callsign, Error, Frequency, MessengerConfig, Result, Settings, Timestamp};
use crate::store::Directory;
use crate::time::util::next_slot;
use crate::ui::{self, UiEvent};

use super::codec::{check_length, normalize, verify_header};
use super::message::{Message, OutgoingState};

/// One packet the engine wants on air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    /// Packet text, at most one packet long
    pub text: String,
    /// Audio offset to transmit at
    pub frequency: Frequency,
}

/// The messenger protocol engine.
///
/// Owns the contact directory and every conversation in it. All entry points
/// are synchronous and take the current time explicitly; the caller serializes
/// them (see [`crate::network::Station`]).
pub struct Messenger {
    pub(crate) config: MessengerConfig,
    pub(crate) settings: Box<dyn Settings>,
    pub(crate) directory: Directory,
    /// No new send may start before this time
    pub(crate) pause_until: Timestamp,
    pub(crate) next_beacon_due: Timestamp,
    /// Start of the last slot the scheduler ran in
    pub(crate) last_slot: Option<Timestamp>,
    pub(crate) chat_changed: bool,
    pub(crate) store_dirty: bool,
    pub(crate) rng: StdRng,
}

impl Messenger {
    /// Creates an engine around an already loaded directory. The first beacon
    /// goes out on the first free slot.
    pub fn new(config: MessengerConfig, settings: Box<dyn Settings>, directory: Directory) -> Self {
        Messenger {
            config,
            settings,
            directory,
            pause_until: 0,
            next_beacon_due: 0,
            last_slot: None,
            chat_changed: true,
            store_dirty: false,
            rng: StdRng::from_entropy(),
        }
    }

    /// Replaces the jitter source with a seeded one, for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    pub fn settings(&self) -> &dyn Settings {
        self.settings.as_ref()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Our own callsign
    pub fn local(&self) -> &Callsign {
        self.settings.callsign()
    }

    pub fn pause_until(&self) -> Timestamp {
        self.pause_until
    }

    pub fn next_beacon_due(&self) -> Timestamp {
        self.next_beacon_due
    }

    pub(crate) fn slot_secs(&self) -> u64 {
        self.config.slot_secs()
    }

    pub(crate) fn is_selected(&self, callsign: &Callsign) -> bool {
        self.settings.selected_contact() == Some(callsign)
    }

    /// Flags the chat view for redraw if it shows `callsign`
    pub(crate) fn touch_chat(&mut self, callsign: &Callsign) {
        if self.is_selected(callsign) {
            self.chat_changed = true;
        }
    }

    /// Queues a message for `contact`, or for the selected contact when `None`.
    ///
    /// The contact is created, not yet heard, if unknown. Fails when nothing is selected, when
    /// the text is empty or too long, or when the directory is full.
    pub fn post(&mut self, contact: Option<&str>, text: &str, now: Timestamp) -> Result<()> {
        let text = normalize(text);
        if text.is_empty() {
            return Err(Error::invalid_text("Message is empty"));
        }
        check_length(text.len())?;

        let callsign = match contact {
            Some(call) => Callsign::new(call.trim().to_ascii_uppercase())?,
            None => self
                .settings
                .selected_contact()
                .cloned()
                .ok_or(Error::NoContactSelected)?,
        };

        let contact = self.directory.add(callsign.clone())?;
        contact.messages.push(Message::outgoing(text.as_str(), now));
        info!(to = %callsign, text = %text, "message queued");

        self.touch_chat(&callsign);
        self.store_dirty = true;
        Ok(())
    }

    /// Shows `callsign` in the chat view, or nothing when `None`
    pub fn select(&mut self, callsign: Option<&str>) -> Result<()> {
        let selected = match callsign {
            Some(call) => {
                let contact = self
                    .directory
                    .find_by_callsign(call)
                    .ok_or_else(|| Error::unknown_contact(call))?;
                Some(contact.callsign.clone())
            }
            None => None,
        };
        self.settings.set_selected_contact(selected);
        self.chat_changed = true;
        Ok(())
    }

    /// Adds a contact typed in by the user. It stays unheard, so nothing is
    /// sent to it until one of its transmissions is received.
    pub fn add_contact(&mut self, callsign: &str) -> Result<()> {
        let callsign = Callsign::new(callsign.trim().to_ascii_uppercase())?;
        self.directory.add(callsign.clone())?;
        info!(callsign = %callsign, "contact added");
        self.store_dirty = true;
        Ok(())
    }

    /// Deletes a contact and its conversation, clearing the selection if needed
    pub fn remove_contact(&mut self, callsign: &str) -> Result<()> {
        let removed = self
            .directory
            .remove(callsign)
            .ok_or_else(|| Error::unknown_contact(callsign))?;
        if self.is_selected(&removed.callsign) {
            self.settings.set_selected_contact(None);
            self.chat_changed = true;
        }
        info!(callsign = %removed.callsign, messages = removed.messages.len(), "contact removed");
        self.store_dirty = true;
        Ok(())
    }

    /// Changes our presence and announces it on the next slot
    pub fn set_presence(&mut self, presence: &str, now: Timestamp) {
        let presence = presence.trim().to_ascii_uppercase();
        debug!(presence = %presence, "presence changed");
        self.settings.set_presence(presence);
        self.next_beacon_due = next_slot(now, self.slot_secs());
    }

    /// Flags one message of a conversation for deletion
    pub fn delete_message(&mut self, callsign: &str, index: usize) -> Result<()> {
        let contact = self
            .directory
            .get_mut(callsign)
            .ok_or_else(|| Error::unknown_contact(callsign))?;
        let msg = contact
            .messages
            .get_mut(index)
            .ok_or_else(|| Error::invalid_text(format!("no message {} for {}", index, callsign)))?;
        msg.delete = true;
        let callsign = contact.callsign.clone();
        self.touch_chat(&callsign);
        self.store_dirty = true;
        Ok(())
    }

    /// Drops the messages flagged for deletion, returning how many went
    pub fn prune(&mut self, callsign: &str) -> Result<usize> {
        let contact = self
            .directory
            .get_mut(callsign)
            .ok_or_else(|| Error::unknown_contact(callsign))?;
        let before = contact.messages.len();
        contact.messages.retain(|m| !m.delete);
        let pruned = before - contact.messages.len();
        if pruned > 0 {
            let callsign = contact.callsign.clone();
            self.touch_chat(&callsign);
            self.store_dirty = true;
        }
        Ok(pruned)
    }

    /// Applies an acknowledgment `header` received from `contact`.
    ///
    /// Only a message waiting for its acknowledgment, last updated within the
    /// retry window, whose recomputed header matches byte for byte, is
    /// affected. At most one message changes state.
    pub fn mark_acknowledged(&mut self, contact: &str, header: &str, now: Timestamp) -> bool {
        let local = self.settings.callsign().clone();
        let floor = now.saturating_sub(self.config.retry_window.as_secs());
        let Some(entry) = self.directory.get_mut(contact) else {
            return false;
        };

        let peer = entry.callsign.clone();
        let matched = entry.messages.iter_mut().find(|m| {
            m.outgoing_state() == Some(OutgoingState::AwaitingAck)
                && m.updated_at >= floor
                && verify_header(header, peer.as_str(), local.as_str(), &m.text)
        });

        match matched {
            Some(msg) => {
                msg.set_outgoing(OutgoingState::Acknowledged, now);
                info!(from = %peer, text = %msg.text, "message acknowledged");
                self.touch_chat(&peer);
                self.store_dirty = true;
                true
            }
            None => {
                debug!(from = %peer, header, "acknowledgment matched nothing");
                false
            }
        }
    }

    /// Renders pending UI work into events and clears the dirty flags
    pub fn drain_ui(&mut self, now: Timestamp) -> Vec<UiEvent> {
        let contacts_changed = self.directory.take_changed();
        let chat_changed = std::mem::take(&mut self.chat_changed);
        if !contacts_changed && !chat_changed {
            return Vec::new();
        }
        ui::render(
            &self.directory,
            self.settings.selected_contact(),
            self.settings.callsign(),
            now,
            self.config.stale_after.as_secs(),
            contacts_changed,
            chat_changed,
        )
    }

    /// Whether something durable changed since the last call
    pub fn take_store_dirty(&mut self) -> bool {
        std::mem::take(&mut self.store_dirty)
    }

    /// Requests another save, e.g. after a failed write
    pub fn mark_store_dirty(&mut self) {
        self.store_dirty = true;
    }
}
