//! Inbound routing and reassembly of fragmented messages
//!
//! Every decoded line goes through [`Messenger::on_decoded`]. Header lines
//! addressed to us open a per-contact accumulation window, acknowledgments
//! settle our outgoing messages, anything else heard on the frequency of an
//! open window is appended to it, and presence beacons update the directory.
//! Once a window has closed the buffer is checked against its header and
//! either becomes an incoming message or is dropped without a trace on air.

use tracing::{debug, info, warn};

use crate::core::{Callsign, Frequency, Timestamp};
use crate::network::discovery::{apply_beacon, parse_beacon};

use super::codec::{assemble, pad_packet, parse_header, verify_header, HeaderLine};
use super::message::Message;
use super::state::Messenger;

/// How a decoded line was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Opened a reassembly window
    Header,
    /// Acknowledgment from a contact; `matched` tells whether a message settled
    Ack { matched: bool },
    /// Appended to an open reassembly
    Fragment,
    /// Presence announcement
    Beacon,
    /// Nothing to do with us
    Ignored,
}

impl Messenger {
    /// Handles one decoded packet heard at `frequency`
    pub fn on_decoded(&mut self, frequency: Frequency, line: &str, now: Timestamp) -> Routed {
        let line = line.trim_end();
        if line.is_empty() {
            return Routed::Ignored;
        }
        self.complete_reassemblies(now);

        let local = self.settings.callsign().clone();

        if let Some(header) = parse_header(line) {
            let to_us = header.tok0 == local.as_str();
            let from_us = header.tok1 == local.as_str();
            return match (to_us, from_us) {
                (true, false) => self.begin_incoming(&header, frequency, now),
                (false, true) => self.receive_ack(&header, frequency, now),
                _ => {
                    debug!(line, "header not for us");
                    Routed::Ignored
                }
            };
        }

        if let Some(callsign) = self.receiving_at(frequency, now) {
            if let Some(contact) = self.directory.get_mut(callsign.as_str()) {
                contact.incoming_buffer.push_str(&pad_packet(line));
                contact.last_heard = Some(now);
                debug!(from = %callsign, line, "fragment");
                return Routed::Fragment;
            }
        }

        if let Some(beacon) = parse_beacon(line) {
            if beacon.callsign == local {
                return Routed::Ignored;
            }
            return match apply_beacon(&mut self.directory, &beacon, frequency, now) {
                Ok(()) => {
                    self.store_dirty = true;
                    Routed::Beacon
                }
                Err(e) => {
                    warn!(callsign = %beacon.callsign, error = %e, "beacon not recorded");
                    Routed::Ignored
                }
            };
        }

        debug!(frequency, line, "unattributed line");
        Routed::Ignored
    }

    /// Opens a reassembly window for a header addressed to us
    fn begin_incoming(&mut self, header: &HeaderLine, frequency: Frequency, now: Timestamp) -> Routed {
        let sender = match Callsign::new(header.tok1.as_str()) {
            Ok(call) => call,
            Err(e) => {
                debug!(error = %e, "header from malformed callsign");
                return Routed::Ignored;
            }
        };
        let slot = self.slot_secs();
        let is_new = !self.directory.contains(sender.as_str());

        let contact = match self.directory.add_heard(sender.clone(), frequency, now) {
            Ok(contact) => contact,
            Err(e) => {
                warn!(from = %sender, error = %e, "cannot track sender");
                return Routed::Ignored;
            }
        };
        if is_new {
            self.store_dirty = true;
        }
        if contact.is_receiving(now) {
            debug!(from = %sender, "reassembly already in progress");
            return Routed::Ignored;
        }

        let deadline = now + slot * header.count as u64;
        contact.begin_reassembly(&header.to_line(), deadline);

        let hold = deadline + self.config.reassembly_margin_slots * slot;
        self.pause_until = self.pause_until.max(hold);
        self.directory.mark_changed();
        info!(from = %sender, packets = header.count, "receiving message");
        Routed::Header
    }

    /// Applies an acknowledgment sent by `tok0` for a message of ours
    fn receive_ack(&mut self, header: &HeaderLine, frequency: Frequency, now: Timestamp) -> Routed {
        let Some(contact) = self.directory.get_mut(header.tok0.as_str()) else {
            debug!(from = %header.tok0, "acknowledgment from unknown station");
            return Routed::Ignored;
        };
        contact.heard(frequency, now);

        let matched = self.mark_acknowledged(&header.tok0, &header.to_line(), now);
        self.directory.touch_to_front(&header.tok0);
        Routed::Ack { matched }
    }

    /// The contact near `frequency` with an open reassembly window
    fn receiving_at(&self, frequency: Frequency, now: Timestamp) -> Option<Callsign> {
        self.directory
            .find_by_frequency(frequency, self.config.frequency_tolerance)
            .find(|c| c.is_receiving(now))
            .map(|c| c.callsign.clone())
    }

    /// Validates every buffer whose window has closed
    pub fn complete_reassemblies(&mut self, now: Timestamp) {
        let due: Vec<Callsign> = self
            .directory
            .iter()
            .filter(|c| !c.incoming_buffer.is_empty() && now > c.incoming_deadline)
            .map(|c| c.callsign.clone())
            .collect();
        for callsign in due {
            self.finish_reassembly(&callsign, now);
        }
    }

    fn finish_reassembly(&mut self, callsign: &Callsign, now: Timestamp) -> bool {
        let local = self.settings.callsign().clone();
        let Some(contact) = self.directory.get_mut(callsign.as_str()) else {
            return false;
        };
        let buffer = contact.take_reassembly();

        let text = assemble(&buffer).and_then(|(header, text)| {
            let valid = !text.is_empty()
                && verify_header(&header.to_line(), local.as_str(), callsign.as_str(), &text);
            valid.then_some(text)
        });
        let Some(text) = text else {
            warn!(from = %callsign, buffer = %buffer, "dropping incomplete or corrupt message");
            return false;
        };

        contact.messages.push(Message::incoming(text.as_str(), now));
        info!(from = %callsign, text = %text, "message received");
        self.directory.touch_to_front(callsign.as_str());
        self.touch_chat(callsign);
        self.store_dirty = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MemorySettings, MessengerConfig};
    use crate::protocol::codec::{fragments, header_suffix, make_header};
    use crate::protocol::message::{IncomingState, MessageState, OutgoingState};
    use crate::store::Directory;

    const T0: Timestamp = 1_700_000_010;

    fn messenger(local: &str) -> Messenger {
        let settings = MemorySettings::new(Callsign::new(local).unwrap());
        Messenger::new(MessengerConfig::default(), Box::new(settings), Directory::new(None))
            .with_seed(1)
    }

    /// Packets W7PUA would send to VU2ESE for `text`
    fn wire(text: &str) -> (String, Vec<String>) {
        let header = make_header("VU2ESE", "W7PUA", text).unwrap();
        let suffix = header_suffix("VU2ESE", "W7PUA", text).unwrap();
        (header, fragments(text, &suffix))
    }

    fn incoming_texts(m: &Messenger, from: &str) -> Vec<String> {
        m.directory()
            .find_by_callsign(from)
            .map(|c| c.messages.iter().map(|msg| msg.text.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_single_packet_message() {
        let mut bob = messenger("VU2ESE");
        let (header, frags) = wire("HI BOB");
        assert_eq!(frags.len(), 1);

        assert_eq!(bob.on_decoded(1000, &header, T0), Routed::Header);
        assert_eq!(bob.pause_until(), T0 + 30);
        assert_eq!(bob.on_decoded(1005, &frags[0], T0 + 15), Routed::Fragment);

        bob.complete_reassemblies(T0 + 15);
        assert!(incoming_texts(&bob, "W7PUA").is_empty());

        bob.complete_reassemblies(T0 + 16);
        let al = bob.directory().find_by_callsign("W7PUA").unwrap();
        assert_eq!(al.messages.len(), 1);
        assert_eq!(al.messages[0].text, "HI BOB");
        assert_eq!(
            al.messages[0].state,
            MessageState::Incoming(IncomingState::AckPending)
        );
        assert!(al.incoming_buffer.is_empty());
        assert!(bob.take_store_dirty());
    }

    #[test]
    fn test_header_from_new_station_is_saved() {
        let mut bob = messenger("VU2ESE");
        let (header, _) = wire("HI BOB");

        assert_eq!(bob.on_decoded(1000, &header, T0), Routed::Header);
        assert!(bob.take_store_dirty());
        let al = bob.directory().find_by_callsign("W7PUA").unwrap();
        assert_eq!(al.last_heard, Some(T0));
        assert_eq!(al.frequency, 1000);
    }

    #[test]
    fn test_fragment_goes_to_receiving_contact_near_frequency() {
        let mut bob = messenger("VU2ESE");
        // a quiet station heard earlier on almost the same frequency
        bob.on_decoded(1010, "+K1ABC QRV", T0 - 30);
        let (header, frags) = wire("HI BOB");

        bob.on_decoded(1000, &header, T0);
        bob.directory.touch_to_front("K1ABC");
        let nearest = bob.directory().find_by_frequency(1005, 20).next().unwrap();
        assert_eq!(nearest.callsign, "K1ABC");
        assert_eq!(bob.on_decoded(1005, &frags[0], T0 + 15), Routed::Fragment);
        bob.complete_reassemblies(T0 + 16);
        assert_eq!(incoming_texts(&bob, "W7PUA"), vec!["HI BOB".to_string()]);
        assert!(incoming_texts(&bob, "K1ABC").is_empty());
    }

    #[test]
    fn test_multi_packet_message() {
        let mut bob = messenger("VU2ESE");
        let text = "THE QUICK BROWN FOX JUMPS OVER THE LAZY DOG 73";
        let (header, frags) = wire(text);
        assert_eq!(frags.len(), 4);

        bob.on_decoded(1000, &header, T0);
        for (i, frag) in frags.iter().enumerate() {
            let at = T0 + 15 * (i as u64 + 1);
            assert_eq!(bob.on_decoded(1000, frag, at), Routed::Fragment);
        }
        bob.complete_reassemblies(T0 + 61);
        assert_eq!(incoming_texts(&bob, "W7PUA"), vec![text.to_string()]);
    }

    #[test]
    fn test_trailing_whitespace_tolerated() {
        let mut bob = messenger("VU2ESE");
        let text = "GOOD MORNING OLD MAN";
        let (header, frags) = wire(text);

        bob.on_decoded(1000, &format!("{}  \r\n", header), T0);
        for (i, frag) in frags.iter().enumerate() {
            bob.on_decoded(1000, frag.trim_end(), T0 + 15 * (i as u64 + 1));
        }
        bob.complete_reassemblies(T0 + 60);
        assert_eq!(incoming_texts(&bob, "W7PUA"), vec![text.to_string()]);
    }

    #[test]
    fn test_missing_fragment_yields_nothing() {
        let mut bob = messenger("VU2ESE");
        let (header, frags) = wire("THE QUICK BROWN FOX JUMPS");
        assert_eq!(frags.len(), 3);

        bob.on_decoded(1000, &header, T0);
        bob.on_decoded(1000, &frags[0], T0 + 15);
        bob.on_decoded(1000, &frags[2], T0 + 45);
        bob.complete_reassemblies(T0 + 46);
        assert!(incoming_texts(&bob, "W7PUA").is_empty());
        assert!(bob.directory().find_by_callsign("W7PUA").unwrap().incoming_buffer.is_empty());
    }

    #[test]
    fn test_checksum_mismatch_yields_nothing() {
        let mut bob = messenger("VU2ESE");
        let (header, _) = wire("HI BOB");
        let (_, forged) = wire("HI BOX");

        bob.on_decoded(1000, &header, T0);
        bob.on_decoded(1000, &forged[0], T0 + 15);
        bob.complete_reassemblies(T0 + 16);
        assert!(incoming_texts(&bob, "W7PUA").is_empty());
    }

    #[test]
    fn test_fragments_outside_window_or_frequency() {
        let mut bob = messenger("VU2ESE");
        let (header, frags) = wire("HI BOB");

        // no window open
        assert_eq!(bob.on_decoded(1000, &frags[0], T0), Routed::Ignored);

        bob.on_decoded(1000, &header, T0);
        assert_eq!(bob.on_decoded(1300, &frags[0], T0 + 15), Routed::Ignored);
        // after the deadline the window is closed and validated first
        assert_eq!(bob.on_decoded(1000, &frags[0], T0 + 16), Routed::Ignored);
        assert!(incoming_texts(&bob, "W7PUA").is_empty());
    }

    #[test]
    fn test_second_header_during_reassembly_ignored() {
        let mut bob = messenger("VU2ESE");
        let (first, frags) = wire("HI BOB");
        let (second, _) = wire("ANOTHER ONE");

        bob.on_decoded(1000, &first, T0);
        assert_eq!(bob.on_decoded(1000, &second, T0 + 5), Routed::Ignored);
        bob.on_decoded(1000, &frags[0], T0 + 15);
        bob.complete_reassemblies(T0 + 16);
        assert_eq!(incoming_texts(&bob, "W7PUA"), vec!["HI BOB".to_string()]);
    }

    #[test]
    fn test_header_for_other_station_ignored() {
        let mut bob = messenger("VU2ESE");
        let header = make_header("K1ABC", "W7PUA", "HI").unwrap();
        assert_eq!(bob.on_decoded(1000, &header, T0), Routed::Ignored);
        assert!(bob.directory().is_empty());
        assert_eq!(bob.pause_until(), 0);
    }

    #[test]
    fn test_ack_settles_outgoing_message() {
        let mut al = messenger("W7PUA");
        al.post(Some("VU2ESE"), "HI BOB", T0).unwrap();
        al.directory.get_mut("VU2ESE").unwrap().messages[0]
            .set_outgoing(OutgoingState::AwaitingAck, T0 + 15);

        let ack = make_header("VU2ESE", "W7PUA", "HI BOB").unwrap();
        assert_eq!(al.on_decoded(1210, &ack, T0 + 30), Routed::Ack { matched: true });
        let bob = al.directory().find_by_callsign("VU2ESE").unwrap();
        assert!(bob.messages[0].is_acknowledged());
        assert_eq!(bob.frequency, 1210);
        assert_eq!(bob.last_heard, Some(T0 + 30));

        // a repeated acknowledgment finds nothing left to settle
        assert_eq!(al.on_decoded(1210, &ack, T0 + 45), Routed::Ack { matched: false });
    }

    #[test]
    fn test_beacons() {
        let mut al = messenger("W7PUA");
        assert_eq!(al.on_decoded(1210, "+VU2ESE QRV", T0), Routed::Beacon);
        assert_eq!(al.on_decoded(800, "CQ K1ABC FN42", T0), Routed::Beacon);
        assert_eq!(al.on_decoded(1500, "+W7PUA QRV", T0), Routed::Ignored);

        let bob = al.directory().find_by_callsign("VU2ESE").unwrap();
        assert_eq!(bob.status, "QRV");
        assert_eq!(bob.frequency, 1210);
        assert!(al.directory().find_by_callsign("W7PUA").is_none());
        assert_eq!(al.directory().len(), 2);
    }

    #[test]
    fn test_line_starting_with_mark_inside_window_is_fragment() {
        let mut bob = messenger("VU2ESE");
        let text = "+1 DB REPORT";
        let (header, frags) = wire(text);
        assert!(frags[0].starts_with('+'));

        bob.on_decoded(1000, &header, T0);
        assert_eq!(bob.on_decoded(1000, &frags[0], T0 + 15), Routed::Fragment);
        assert_eq!(bob.on_decoded(1000, &frags[1], T0 + 30), Routed::Fragment);
        bob.complete_reassemblies(T0 + 31);
        assert_eq!(incoming_texts(&bob, "W7PUA"), vec![text.to_string()]);
    }
}
