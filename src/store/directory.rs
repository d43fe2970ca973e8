use std::collections::{BTreeMap, HashMap};

use crate::core::{Callsign, Error, Frequency, Result, Timestamp, MAX_STATUS};
use crate::protocol::message::Message;

/// Contact flag bit: write this contact to the store
pub const CONTACT_SAVED: u32 = 0x1;
/// Contact flag bit: scheduled for deletion
pub const CONTACT_DELETE: u32 = 0x2;

/// A known station and its conversation
#[derive(Debug, Clone)]
pub struct Contact {
    /// Unique key
    pub callsign: Callsign,
    /// Last presence text received from the station
    pub status: String,
    /// Last time anything was received from the station; `None` until it is heard
    pub last_heard: Option<Timestamp>,
    /// Audio offset at which the station was last heard, 0 until then
    pub frequency: Frequency,
    /// Persist this contact
    pub saved: bool,
    /// Scheduled for deletion
    pub delete: bool,
    /// Header line plus fragments received so far
    pub incoming_buffer: String,
    /// Once passed, the buffer is validated or dropped
    pub incoming_deadline: Timestamp,
    /// Conversation in chronological order
    pub messages: Vec<Message>,
    rank: i64,
}

impl Contact {
    /// A contact nothing has been received from yet
    pub fn new(callsign: Callsign) -> Self {
        Contact {
            callsign,
            status: String::new(),
            last_heard: None,
            frequency: 0,
            saved: true,
            delete: false,
            incoming_buffer: String::new(),
            incoming_deadline: 0,
            messages: Vec::new(),
            rank: 0,
        }
    }

    /// Records a transmission received from the station
    pub fn heard(&mut self, frequency: Frequency, now: Timestamp) {
        self.frequency = frequency;
        self.last_heard = Some(now);
    }

    pub fn is_heard(&self) -> bool {
        self.last_heard.is_some()
    }

    /// Stores a presence text, truncated to the status bound
    pub fn set_status(&mut self, status: &str) {
        self.status = status.chars().take(MAX_STATUS).collect();
    }

    /// Persisted flag bits
    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.saved {
            flags |= CONTACT_SAVED;
        }
        if self.delete {
            flags |= CONTACT_DELETE;
        }
        flags
    }

    /// A reassembly is in progress and its window has not closed
    pub fn is_receiving(&self, now: Timestamp) -> bool {
        !self.incoming_buffer.is_empty() && now <= self.incoming_deadline
    }

    /// Starts accumulating a new incoming message seeded with its header line
    pub fn begin_reassembly(&mut self, header: &str, deadline: Timestamp) {
        self.incoming_buffer = header.to_string();
        self.incoming_deadline = deadline;
    }

    /// Hands back the accumulated buffer and resets the reassembly
    pub fn take_reassembly(&mut self) -> String {
        self.incoming_deadline = 0;
        std::mem::take(&mut self.incoming_buffer)
    }

    /// Heard within `window` seconds of `now`; never for a station not yet heard
    pub fn heard_within(&self, now: Timestamp, window: u64) -> bool {
        self.last_heard
            .map_or(false, |heard| now.saturating_sub(heard) <= window)
    }
}

/// Known stations keyed by callsign, iterated most recently heard first
#[derive(Debug, Default)]
pub struct Directory {
    contacts: HashMap<Callsign, Contact>,
    /// Rank → callsign; the highest rank is the front
    order: BTreeMap<i64, Callsign>,
    next_front: i64,
    next_back: i64,
    max_contacts: Option<usize>,
    changed: bool,
}

impl Directory {
    /// Creates an empty directory, optionally bounded
    pub fn new(max_contacts: Option<usize>) -> Self {
        Directory {
            max_contacts,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Exact, case-sensitive lookup
    pub fn find_by_callsign(&self, callsign: &str) -> Option<&Contact> {
        self.contacts.get(callsign)
    }

    pub fn get_mut(&mut self, callsign: &str) -> Option<&mut Contact> {
        self.contacts.get_mut(callsign)
    }

    /// Heard contacts last seen within `tolerance` Hz of `frequency`, in recency
    /// order. The first one is the best attribution.
    pub fn find_by_frequency(
        &self,
        frequency: Frequency,
        tolerance: Frequency,
    ) -> impl Iterator<Item = &Contact> {
        self.iter()
            .filter(move |c| c.is_heard() && c.frequency.abs_diff(frequency) <= tolerance)
    }

    /// Adds a saved, not yet heard contact at the front. An existing contact is
    /// moved to the front and returned unchanged.
    pub fn add(&mut self, callsign: Callsign) -> Result<&mut Contact> {
        if self.contacts.contains_key(&callsign) {
            self.touch_to_front(callsign.as_str());
            return self
                .contacts
                .get_mut(&callsign)
                .ok_or_else(|| Error::unknown_contact(callsign.as_str()));
        }
        self.check_capacity(&callsign)?;

        self.next_front += 1;
        let rank = self.next_front;
        let mut contact = Contact::new(callsign.clone());
        contact.rank = rank;
        self.order.insert(rank, callsign.clone());
        self.changed = true;
        Ok(self.contacts.entry(callsign).or_insert(contact))
    }

    /// Adds or touches a station we just received from at `frequency`
    pub fn add_heard(
        &mut self,
        callsign: Callsign,
        frequency: Frequency,
        now: Timestamp,
    ) -> Result<&mut Contact> {
        let contact = self.add(callsign)?;
        contact.heard(frequency, now);
        Ok(contact)
    }

    pub fn contains(&self, callsign: &str) -> bool {
        self.contacts.contains_key(callsign)
    }

    /// Appends a contact at the back of the recency order (used when loading)
    pub fn push_back(&mut self, mut contact: Contact) -> Result<()> {
        if self.contacts.contains_key(&contact.callsign) {
            return Err(Error::persistence(format!(
                "duplicate contact {}",
                contact.callsign
            )));
        }
        self.check_capacity(&contact.callsign)?;

        self.next_back -= 1;
        contact.rank = self.next_back;
        self.order.insert(contact.rank, contact.callsign.clone());
        self.contacts.insert(contact.callsign.clone(), contact);
        self.changed = true;
        Ok(())
    }

    fn check_capacity(&self, callsign: &Callsign) -> Result<()> {
        match self.max_contacts {
            Some(max) if self.contacts.len() >= max => Err(Error::capacity(format!(
                "directory full ({} contacts), cannot add {}",
                max, callsign
            ))),
            _ => Ok(()),
        }
    }

    /// Moves a contact to the front without touching its fields
    pub fn touch_to_front(&mut self, callsign: &str) -> bool {
        let Some(contact) = self.contacts.get_mut(callsign) else {
            return false;
        };
        if contact.rank == self.next_front {
            return true;
        }
        self.order.remove(&contact.rank);
        self.next_front += 1;
        contact.rank = self.next_front;
        self.order.insert(contact.rank, contact.callsign.clone());
        self.changed = true;
        true
    }

    /// Deletes a contact together with its messages
    pub fn remove(&mut self, callsign: &str) -> Option<Contact> {
        let contact = self.contacts.remove(callsign)?;
        self.order.remove(&contact.rank);
        self.changed = true;
        Some(contact)
    }

    /// Contacts, most recent first
    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.order.values().rev().filter_map(|call| self.contacts.get(call))
    }

    /// Snapshot of the callsigns in recency order, for scans that mutate contacts
    pub fn callsigns(&self) -> Vec<Callsign> {
        self.order.values().rev().cloned().collect()
    }

    /// Flags the contact list as needing a redraw
    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    /// Returns and clears the redraw flag
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }
}
