//! Notification outbox for the presentation layer
//!
//! The engine never calls into a UI. It raises "contacts changed" and "chat
//! changed" flags; [`render`] turns them into [`UiEvent`]s which the runtime
//! hands to a [`UiSink`].

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use tracing::info;

use crate::core::{Callsign, Timestamp};
use crate::protocol::message::{Direction, Message, MessageState, OutgoingState};
use crate::store::{Contact, Directory};

/// Chat title shown when no contact is selected
pub const NO_CONTACT_TITLE: &str = "(Select a Contact)";

/// One row of the contact list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRow {
    pub callsign: String,
    pub status: String,
    /// Heard recently enough to be shown as on the air
    pub active: bool,
}

impl ContactRow {
    /// Text for the row, callsign first so selection can parse it back
    pub fn label(&self) -> String {
        if self.status.is_empty() {
            self.callsign.clone()
        } else {
            format!("{} {}", self.callsign, self.status)
        }
    }
}

/// Fire-and-forget notifications for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    ChatClear,
    ChatAppend(String),
    ChatTitle(String),
    ContactsClear,
    ContactAdd(ContactRow),
}

/// Receiver of UI notifications
pub trait UiSink: Send {
    fn chat_clear(&mut self);
    fn chat_append(&mut self, line: &str);
    fn chat_title(&mut self, title: &str);
    fn contacts_clear(&mut self);
    fn contact_add(&mut self, row: &ContactRow);

    /// Routes one event to the matching method
    fn dispatch(&mut self, event: &UiEvent) {
        match event {
            UiEvent::ChatClear => self.chat_clear(),
            UiEvent::ChatAppend(line) => self.chat_append(line),
            UiEvent::ChatTitle(title) => self.chat_title(title),
            UiEvent::ContactsClear => self.contacts_clear(),
            UiEvent::ContactAdd(row) => self.contact_add(row),
        }
    }
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogSink;

impl UiSink for LogSink {
    fn chat_clear(&mut self) {}

    fn chat_append(&mut self, line: &str) {
        info!(target: "slotchat::chat", "{}", line);
    }

    fn chat_title(&mut self, title: &str) {
        info!(target: "slotchat::chat", title, "chat view");
    }

    fn contacts_clear(&mut self) {}

    fn contact_add(&mut self, row: &ContactRow) {
        info!(
            target: "slotchat::contacts",
            callsign = %row.callsign,
            status = %row.status,
            active = row.active,
            "contact"
        );
    }
}

/// Forwards every event to a channel, e.g. towards a GUI thread
impl UiSink for mpsc::UnboundedSender<UiEvent> {
    fn chat_clear(&mut self) {
        let _ = self.send(UiEvent::ChatClear);
    }

    fn chat_append(&mut self, line: &str) {
        let _ = self.send(UiEvent::ChatAppend(line.to_string()));
    }

    fn chat_title(&mut self, title: &str) {
        let _ = self.send(UiEvent::ChatTitle(title.to_string()));
    }

    fn contacts_clear(&mut self) {
        let _ = self.send(UiEvent::ContactsClear);
    }

    fn contact_add(&mut self, row: &ContactRow) {
        let _ = self.send(UiEvent::ContactAdd(row.clone()));
    }
}

fn clock_label(ts: Timestamp) -> String {
    match Utc.timestamp_opt(ts as i64, 0).single() {
        Some(time) => time.format("%H:%M").to_string(),
        None => "--:--".to_string(),
    }
}

fn delivery_marker(msg: &Message) -> &'static str {
    match msg.state {
        MessageState::Outgoing(OutgoingState::Pending) => " [queued]",
        MessageState::Outgoing(OutgoingState::Sending { .. }) => " [sending]",
        MessageState::Outgoing(OutgoingState::AwaitingAck) => " [sent]",
        MessageState::Outgoing(OutgoingState::Acknowledged) => " [delivered]",
        MessageState::Incoming(_) => "",
    }
}

/// `HH:MM CALLSIGN: TEXT` plus a delivery marker for our own messages
pub fn transcript_line(contact: &Contact, msg: &Message, local: &Callsign) -> String {
    let who = match msg.direction() {
        Direction::Outgoing => local,
        Direction::Incoming => &contact.callsign,
    };
    format!(
        "{} {}: {}{}",
        clock_label(msg.created_at),
        who,
        msg.text,
        delivery_marker(msg)
    )
}

/// Contact list rows, most recent first
pub fn contact_rows(directory: &Directory, now: Timestamp, stale_after: u64) -> Vec<ContactRow> {
    directory
        .iter()
        .map(|c| ContactRow {
            callsign: c.callsign.to_string(),
            status: c.status.clone(),
            active: c.heard_within(now, stale_after),
        })
        .collect()
}

/// Turns the dirty flags into the event sequence the UI should apply
pub fn render(
    directory: &Directory,
    selected: Option<&Callsign>,
    local: &Callsign,
    now: Timestamp,
    stale_after: u64,
    contacts_changed: bool,
    chat_changed: bool,
) -> Vec<UiEvent> {
    let mut events = Vec::new();

    if contacts_changed {
        events.push(UiEvent::ContactsClear);
        events.extend(
            contact_rows(directory, now, stale_after)
                .into_iter()
                .map(UiEvent::ContactAdd),
        );
    }

    if chat_changed {
        let contact = selected.and_then(|call| directory.find_by_callsign(call.as_str()));
        match contact {
            Some(contact) => {
                events.push(UiEvent::ChatTitle(contact.callsign.to_string()));
                events.push(UiEvent::ChatClear);
                events.extend(
                    contact
                        .messages
                        .iter()
                        .filter(|m| !m.delete)
                        .map(|m| UiEvent::ChatAppend(transcript_line(contact, m, local))),
                );
            }
            None => {
                events.push(UiEvent::ChatTitle(NO_CONTACT_TITLE.to_string()));
                events.push(UiEvent::ChatClear);
            }
        }
    }

    events
}
