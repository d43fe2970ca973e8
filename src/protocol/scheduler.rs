//! Slot scheduler: at most one packet per slot
//!
//! Priority, highest first:
//!
//! 1. an acknowledgment we owe
//! 2. the next fragment of a message already on air
//! 3. the header of a pending message to a recently heard contact, gated by
//!    `pause_until`
//! 4. a presence beacon, when due and not paused

use rand::Rng;
use tracing::{debug, info, warn};

use crate::core::{Callsign, Timestamp};
use crate::network::discovery::{format_beacon, presence_code};
use crate::time::util::slot_start;

use super::codec::{fragment, header_suffix, make_header, packet_count};
use super::message::OutgoingState;
use super::state::{Messenger, Transmission};

/// Seconds after a slot boundary during which the slot may still be used
pub const SLOT_GRACE_SECS: u64 = 2;

impl Messenger {
    /// Once-per-second housekeeping. Closes finished reassemblies and, on the
    /// first tick of a new slot, runs the scheduler.
    pub fn tick(&mut self, now: Timestamp) -> Option<Transmission> {
        self.complete_reassemblies(now);

        let start = slot_start(now, self.slot_secs());
        if self.last_slot.map_or(false, |last| last >= start) {
            return None;
        }
        self.last_slot = Some(start);
        // activity markers age with time
        self.directory.mark_changed();

        if now - start > SLOT_GRACE_SECS {
            debug!(slot = start, "slot missed");
            return None;
        }
        self.on_slot(now)
    }

    /// Picks the single packet to transmit in the slot starting at `now`
    pub fn on_slot(&mut self, now: Timestamp) -> Option<Transmission> {
        let tx = self
            .send_ack(now)
            .or_else(|| self.continue_send(now))
            .or_else(|| self.start_send(now))
            .or_else(|| self.send_beacon(now));
        if let Some(tx) = &tx {
            debug!(text = %tx.text, frequency = tx.frequency, "slot granted");
        }
        tx
    }

    fn send_ack(&mut self, now: Timestamp) -> Option<Transmission> {
        let local = self.settings.callsign().clone();
        let frequency = self.settings.tx_pitch();

        for callsign in self.directory.callsigns() {
            let Some(contact) = self.directory.get_mut(callsign.as_str()) else {
                continue;
            };
            let Some(msg) = contact.messages.iter_mut().find(|m| m.owes_ack()) else {
                continue;
            };
            msg.mark_ack_sent(now);
            let header = make_header(local.as_str(), callsign.as_str(), &msg.text);
            self.touch_chat(&callsign);
            self.store_dirty = true;

            match header {
                Ok(text) => {
                    info!(to = %callsign, "acknowledging message");
                    return Some(Transmission { text, frequency });
                }
                Err(e) => warn!(to = %callsign, error = %e, "cannot acknowledge"),
            }
        }
        None
    }

    fn continue_send(&mut self, now: Timestamp) -> Option<Transmission> {
        let local = self.settings.callsign().clone();
        let frequency = self.settings.tx_pitch();

        for callsign in self.directory.callsigns() {
            let Some(contact) = self.directory.get_mut(callsign.as_str()) else {
                continue;
            };
            let Some((msg, sent)) = contact.messages.iter_mut().find_map(|m| match m.outgoing_state() {
                Some(OutgoingState::Sending { sent }) => Some((m, sent)),
                _ => None,
            }) else {
                continue;
            };

            let suffix = match header_suffix(callsign.as_str(), local.as_str(), &msg.text) {
                Ok(suffix) => suffix,
                Err(e) => {
                    warn!(to = %callsign, error = %e, "cannot continue message");
                    continue;
                }
            };
            let next = fragment(&msg.text, sent, &suffix);
            if next.is_final {
                msg.set_outgoing(OutgoingState::AwaitingAck, now);
                info!(to = %callsign, text = %msg.text, "message transmitted, awaiting acknowledgment");
                self.touch_chat(&callsign);
                self.store_dirty = true;
            } else {
                msg.set_outgoing(OutgoingState::Sending { sent: next.sent }, now);
            }
            return Some(Transmission {
                text: next.packet,
                frequency,
            });
        }
        None
    }

    fn start_send(&mut self, now: Timestamp) -> Option<Transmission> {
        let local = self.settings.callsign().clone();
        let frequency = self.settings.tx_pitch();
        let slot = self.slot_secs();
        let freshness = self.config.freshness_window.as_secs();
        let retry = self.config.retry_window.as_secs();
        let margin = self.config.send_margin_slots;

        let mut started = None;
        let mut touched: Vec<Callsign> = Vec::new();

        for callsign in self.directory.callsigns() {
            let Some(contact) = self.directory.get_mut(callsign.as_str()) else {
                continue;
            };
            let fresh = contact.heard_within(now, freshness);

            if fresh && started.is_none() && now >= self.pause_until {
                let pending = contact
                    .messages
                    .iter_mut()
                    .find(|m| m.outgoing_state() == Some(OutgoingState::Pending));
                if let Some(msg) = pending {
                    match make_header(callsign.as_str(), local.as_str(), &msg.text) {
                        Ok(header) => {
                            let packets = packet_count(msg.text.len()) as u64;
                            msg.set_outgoing(OutgoingState::Sending { sent: 0 }, now);
                            self.pause_until = now + (packets + margin) * slot;
                            info!(to = %callsign, packets, "sending message");
                            touched.push(callsign.clone());
                            started = Some(header);
                        }
                        Err(e) => warn!(to = %callsign, error = %e, "cannot send message"),
                    }
                }
            }

            // retries become eligible from the next slot on, heard or not
            for msg in contact.messages.iter_mut() {
                if msg.outgoing_state() == Some(OutgoingState::AwaitingAck)
                    && now >= msg.updated_at + retry
                {
                    msg.set_outgoing(OutgoingState::Pending, now);
                    info!(to = %callsign, text = %msg.text, "no acknowledgment, will retry");
                    touched.push(callsign.clone());
                }
            }
        }

        if !touched.is_empty() {
            self.store_dirty = true;
        }
        for callsign in &touched {
            self.touch_chat(callsign);
        }
        started.map(|text| Transmission { text, frequency })
    }

    fn send_beacon(&mut self, now: Timestamp) -> Option<Transmission> {
        if now < self.next_beacon_due || now < self.pause_until {
            return None;
        }
        let jitter = self.rng.gen_range(0..=self.config.beacon_jitter.as_secs());
        self.next_beacon_due = now + self.config.beacon_period.as_secs() + jitter;

        let code = presence_code(self.settings.presence())?;
        Some(Transmission {
            text: format_beacon(self.settings.callsign(), &code),
            frequency: self.settings.tx_pitch(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MemorySettings, MessengerConfig};
    use crate::protocol::message::{IncomingState, Message, MessageState};
    use crate::protocol::reassembly::Routed;
    use crate::store::Directory;

    const T0: Timestamp = 1_700_000_010;

    fn messenger(local: &str, pitch: u32) -> Messenger {
        let settings = MemorySettings::new(Callsign::new(local).unwrap()).with_pitch(pitch);
        Messenger::new(MessengerConfig::default(), Box::new(settings), Directory::new(None))
            .with_seed(42)
    }

    fn state(m: &Messenger, contact: &str, index: usize) -> MessageState {
        m.directory().find_by_callsign(contact).unwrap().messages[index].state
    }

    #[test]
    fn test_hi_bob_scenario() {
        let mut al = messenger("W7PUA", 1000);
        al.on_decoded(1210, "+VU2ESE QRV", T0 - 20);
        al.post(Some("VU2ESE"), "hi bob", T0 - 10).unwrap();
        assert_eq!(
            state(&al, "VU2ESE", 0),
            MessageState::Outgoing(OutgoingState::Pending)
        );

        let header = al.on_slot(T0).unwrap();
        assert_eq!(header.text, make_header("VU2ESE", "W7PUA", "HI BOB").unwrap());
        assert!(header.text.starts_with("VU2ESE W7PUA "));
        assert!(header.text.ends_with("10"));
        assert_eq!(header.frequency, 1000);
        assert_eq!(
            state(&al, "VU2ESE", 0),
            MessageState::Outgoing(OutgoingState::Sending { sent: 0 })
        );
        assert_eq!(al.pause_until(), T0 + 45);

        let frag = al.on_slot(T0 + 15).unwrap();
        assert_eq!(frag.text.len(), 13);
        assert!(frag.text.starts_with("HI BOB    "));
        assert_eq!(
            state(&al, "VU2ESE", 0),
            MessageState::Outgoing(OutgoingState::AwaitingAck)
        );
    }

    #[test]
    fn test_grants_to_awaiting_ack() {
        let mut al = messenger("W7PUA", 1000);
        let text = "THE QUICK BROWN FOX JUMPS OVER THE LAZY DOG 73";
        al.on_decoded(1210, "+VU2ESE QRV", T0 - 20);
        al.post(Some("VU2ESE"), text, T0).unwrap();

        let grants = packet_count(text.len()) + 1;
        for i in 0..grants {
            assert!(al.on_slot(T0 + 15 * i as u64).is_some());
            let expect_done = i + 1 == grants;
            assert_eq!(
                state(&al, "VU2ESE", 0) == MessageState::Outgoing(OutgoingState::AwaitingAck),
                expect_done
            );
        }
    }

    #[test]
    fn test_retry_after_window() {
        let mut al = messenger("W7PUA", 1000);
        al.on_decoded(1210, "+VU2ESE QRV", T0 - 20);
        al.post(Some("VU2ESE"), "HI BOB", T0).unwrap();
        al.on_slot(T0);
        al.on_slot(T0 + 15);
        al.directory.get_mut("VU2ESE").unwrap().last_heard = Some(T0 + 400);

        // nothing to do but beacon while waiting
        let tx = al.on_slot(T0 + 480).unwrap();
        assert!(tx.text.starts_with('+'));
        assert_eq!(
            state(&al, "VU2ESE", 0),
            MessageState::Outgoing(OutgoingState::AwaitingAck)
        );

        // window elapsed: back to pending, not restarted in the same slot
        let tx = al.on_slot(T0 + 495);
        assert!(tx.is_none());
        assert_eq!(
            state(&al, "VU2ESE", 0),
            MessageState::Outgoing(OutgoingState::Pending)
        );

        let tx = al.on_slot(T0 + 510).unwrap();
        assert_eq!(tx.text, make_header("VU2ESE", "W7PUA", "HI BOB").unwrap());
    }

    #[test]
    fn test_never_heard_contact_not_started() {
        let mut al = messenger("W7PUA", 1000);
        al.post(Some("VU2ESE"), "HI BOB", T0).unwrap();

        let tx = al.on_slot(T0).unwrap();
        assert!(tx.text.starts_with('+'));
        assert_eq!(
            state(&al, "VU2ESE", 0),
            MessageState::Outgoing(OutgoingState::Pending)
        );

        al.on_decoded(1210, "+VU2ESE QRV", T0 + 5);
        let tx = al.on_slot(T0 + 15).unwrap();
        assert_eq!(tx.text, make_header("VU2ESE", "W7PUA", "HI BOB").unwrap());
    }

    #[test]
    fn test_retry_expires_for_quiet_contact() {
        let mut al = messenger("W7PUA", 1000);
        al.on_decoded(1210, "+VU2ESE QRV", T0);
        al.post(Some("VU2ESE"), "HI BOB", T0).unwrap();
        al.next_beacon_due = u64::MAX;
        assert!(al.on_slot(T0).is_some());
        assert!(al.on_slot(T0 + 15).is_some());
        assert_eq!(
            state(&al, "VU2ESE", 0),
            MessageState::Outgoing(OutgoingState::AwaitingAck)
        );

        // the contact went quiet after the message went out
        let bob = al.directory().find_by_callsign("VU2ESE").unwrap();
        assert!(!bob.heard_within(T0 + 615, 600));
        assert!(al.on_slot(T0 + 615).is_none());
        assert_eq!(
            state(&al, "VU2ESE", 0),
            MessageState::Outgoing(OutgoingState::Pending)
        );
    }

    #[test]
    fn test_stale_contact_not_started() {
        let mut al = messenger("W7PUA", 1000);
        al.post(Some("VU2ESE"), "HI BOB", T0).unwrap();
        al.next_beacon_due = u64::MAX;

        assert!(al.on_slot(T0 + 615).is_none());
        assert_eq!(
            state(&al, "VU2ESE", 0),
            MessageState::Outgoing(OutgoingState::Pending)
        );

        al.on_decoded(1210, "+VU2ESE QRV", T0 + 620);
        assert!(al.on_slot(T0 + 630).is_some());
    }

    #[test]
    fn test_pause_blocks_new_sends_not_acks() {
        let mut al = messenger("W7PUA", 1000);
        al.on_decoded(1210, "+VU2ESE QRV", T0 - 20);
        al.post(Some("VU2ESE"), "HI BOB", T0).unwrap();
        al.next_beacon_due = u64::MAX;

        let incoming = make_header("W7PUA", "K1ABC", "GM").unwrap();
        assert_eq!(al.on_decoded(800, &incoming, T0), Routed::Header);
        assert_eq!(al.pause_until(), T0 + 30);

        assert!(al.on_slot(T0 + 15).is_none());
        let tx = al.on_slot(T0 + 30).unwrap();
        assert!(tx.text.starts_with("VU2ESE W7PUA "));
    }

    #[test]
    fn test_ack_has_priority() {
        let mut al = messenger("W7PUA", 1000);
        al.on_decoded(1210, "+VU2ESE QRV", T0 - 20);
        al.post(Some("VU2ESE"), "HI BOB", T0).unwrap();
        let bob = al.directory.get_mut("VU2ESE").unwrap();
        bob.messages.push(Message::incoming("GM AL", T0));

        let tx = al.on_slot(T0 + 15).unwrap();
        assert_eq!(tx.text, make_header("W7PUA", "VU2ESE", "GM AL").unwrap());
        assert_eq!(
            state(&al, "VU2ESE", 1),
            MessageState::Incoming(IncomingState::AckSent)
        );
        assert_eq!(
            state(&al, "VU2ESE", 0),
            MessageState::Outgoing(OutgoingState::Pending)
        );

        // next slot the pending message gets its turn
        let tx = al.on_slot(T0 + 30).unwrap();
        assert!(tx.text.starts_with("VU2ESE W7PUA "));
    }

    #[test]
    fn test_beacon_schedule() {
        let mut al = messenger("W7PUA", 1000);
        let tx = al.on_slot(T0).unwrap();
        assert_eq!(tx.text, "+W7PUA QRV");
        assert_eq!(tx.frequency, 1000);

        let due = al.next_beacon_due();
        assert!(due >= T0 + 300 && due <= T0 + 330);
        assert!(al.on_slot(T0 + 15).is_none());

        al.set_presence("away", T0 + 20);
        assert_eq!(al.on_slot(T0 + 30).unwrap().text, "+W7PUA AWY");
    }

    #[test]
    fn test_silent_presence_suppresses_beacon() {
        let mut al = messenger("W7PUA", 1000);
        al.set_presence("SILENT", T0 - 5);
        assert!(al.on_slot(T0).is_none());
        assert!(al.next_beacon_due() > T0);
    }

    #[test]
    fn test_tick_runs_once_per_slot() {
        let mut al = messenger("W7PUA", 1000);
        assert!(al.tick(T0).is_some());
        assert!(al.tick(T0 + 1).is_none());

        al.set_presence("BUSY", T0 + 1);
        // first tick of the next slot arrives too late to use it
        assert!(al.tick(T0 + 15 + SLOT_GRACE_SECS + 1).is_none());
        assert_eq!(al.tick(T0 + 30).unwrap().text, "+W7PUA QRL");
    }

    /// Steps both stations through time, delivering each transmission to the
    /// other side in the same second.
    fn run_pair(al: &mut Messenger, bob: &mut Messenger, from: Timestamp, to: Timestamp) -> Vec<String> {
        let mut on_air = Vec::new();
        for now in from..=to {
            let a = al.tick(now);
            let b = bob.tick(now);
            if let Some(tx) = a {
                bob.on_decoded(tx.frequency, &tx.text, now);
                on_air.push(format!("W7PUA: {}", tx.text));
            }
            if let Some(tx) = b {
                al.on_decoded(tx.frequency, &tx.text, now);
                on_air.push(format!("VU2ESE: {}", tx.text));
            }
        }
        on_air
    }

    #[test]
    fn test_two_stations_deliver_and_acknowledge() {
        let mut al = messenger("W7PUA", 1000);
        let mut bob = messenger("VU2ESE", 1600);
        al.post(Some("VU2ESE"), "HI BOB", T0 - 5).unwrap();

        // neither side has heard the other yet, so both open with a beacon
        let on_air = run_pair(&mut al, &mut bob, T0, T0 + 59);
        assert_eq!(on_air[0], "W7PUA: +W7PUA QRV");
        assert_eq!(on_air[1], "VU2ESE: +VU2ESE QRV");
        let header = make_header("VU2ESE", "W7PUA", "HI BOB").unwrap();
        assert!(on_air.contains(&format!("W7PUA: {}", header)));
        assert!(on_air.contains(&format!("VU2ESE: {}", header)));

        let received = &bob.directory().find_by_callsign("W7PUA").unwrap().messages;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].text, "HI BOB");
        assert_eq!(received[0].state, MessageState::Incoming(IncomingState::AckSent));

        assert!(al.directory().find_by_callsign("VU2ESE").unwrap().messages[0].is_acknowledged());
    }
}
