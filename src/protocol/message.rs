use crate::core::Timestamp;

/// Message flag bit: the message was received from the contact
pub const FLAG_INCOMING: u32 = 0x1;
/// Message flag bit: acknowledged (outgoing) or acknowledgment sent (incoming)
pub const FLAG_COMPLETED: u32 = 0x2;
/// Message flag bit: scheduled for pruning
pub const FLAG_DELETE: u32 = 0x4;

/// Which way a message travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Delivery state of a message we send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingState {
    /// Waiting for the scheduler to grant a slot for the header
    Pending,
    /// Header sent; `sent` payload characters are on air so far
    Sending { sent: usize },
    /// Final fragment sent, waiting for the echo of our header
    AwaitingAck,
    /// The peer echoed our header
    Acknowledged,
}

/// Acknowledgment duty for a message we received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingState {
    /// We still owe the sender an acknowledgment packet
    AckPending,
    /// The acknowledgment has been transmitted
    AckSent,
}

/// Explicit state tag; transitions replace it, they never accumulate bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Outgoing(OutgoingState),
    Incoming(IncomingState),
}

/// One entry of a contact's conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// When the message was posted or received
    pub created_at: Timestamp,
    /// Last state change
    pub updated_at: Timestamp,
    /// Delivery state
    pub state: MessageState,
    /// Normalized payload (never padded)
    pub text: String,
    /// Scheduled for pruning
    pub delete: bool,
}

impl Message {
    /// A freshly posted message, waiting for a slot
    pub fn outgoing(text: impl Into<String>, now: Timestamp) -> Self {
        Message {
            created_at: now,
            updated_at: now,
            state: MessageState::Outgoing(OutgoingState::Pending),
            text: text.into(),
            delete: false,
        }
    }

    /// A validated incoming message that still needs acknowledging
    pub fn incoming(text: impl Into<String>, now: Timestamp) -> Self {
        Message {
            created_at: now,
            updated_at: now,
            state: MessageState::Incoming(IncomingState::AckPending),
            text: text.into(),
            delete: false,
        }
    }

    pub fn direction(&self) -> Direction {
        match self.state {
            MessageState::Outgoing(_) => Direction::Outgoing,
            MessageState::Incoming(_) => Direction::Incoming,
        }
    }

    /// Outgoing delivery state, if this is an outgoing message
    pub fn outgoing_state(&self) -> Option<OutgoingState> {
        match self.state {
            MessageState::Outgoing(state) => Some(state),
            MessageState::Incoming(_) => None,
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        self.state == MessageState::Outgoing(OutgoingState::Acknowledged)
    }

    pub fn owes_ack(&self) -> bool {
        self.state == MessageState::Incoming(IncomingState::AckPending)
    }

    /// Moves an outgoing message to `state`
    pub fn set_outgoing(&mut self, state: OutgoingState, now: Timestamp) {
        self.state = MessageState::Outgoing(state);
        self.updated_at = now;
    }

    /// Records that the acknowledgment for an incoming message went out
    pub fn mark_ack_sent(&mut self, now: Timestamp) {
        self.state = MessageState::Incoming(IncomingState::AckSent);
        self.updated_at = now;
    }

    /// Persisted flag bits
    pub fn flags(&self) -> u32 {
        let mut flags = match self.state {
            MessageState::Outgoing(OutgoingState::Acknowledged) => FLAG_COMPLETED,
            MessageState::Outgoing(_) => 0,
            MessageState::Incoming(IncomingState::AckPending) => FLAG_INCOMING,
            MessageState::Incoming(IncomingState::AckSent) => FLAG_INCOMING | FLAG_COMPLETED,
        };
        if self.delete {
            flags |= FLAG_DELETE;
        }
        flags
    }

    /// Persisted send-progress token: `P`, `S<n>`, `T` or `-`
    pub fn progress_token(&self) -> String {
        match self.state {
            MessageState::Outgoing(OutgoingState::Pending) => "P".to_string(),
            MessageState::Outgoing(OutgoingState::Sending { sent }) => format!("S{}", sent),
            MessageState::Outgoing(_) => "T".to_string(),
            MessageState::Incoming(_) => "-".to_string(),
        }
    }

    /// Rebuilds a message from its persisted fields
    pub fn from_parts(
        created_at: Timestamp,
        updated_at: Timestamp,
        flags: u32,
        progress: &str,
        text: &str,
    ) -> Option<Self> {
        let completed = flags & FLAG_COMPLETED != 0;
        let state = if flags & FLAG_INCOMING != 0 {
            if progress != "-" {
                return None;
            }
            MessageState::Incoming(if completed {
                IncomingState::AckSent
            } else {
                IncomingState::AckPending
            })
        } else {
            let state = match progress {
                "P" => OutgoingState::Pending,
                "T" if completed => OutgoingState::Acknowledged,
                "T" => OutgoingState::AwaitingAck,
                _ => {
                    let sent: usize = progress.strip_prefix('S')?.parse().ok()?;
                    if sent > text.len() {
                        return None;
                    }
                    OutgoingState::Sending { sent }
                }
            };
            if completed && state != OutgoingState::Acknowledged {
                return None;
            }
            MessageState::Outgoing(state)
        };

        Some(Message {
            created_at,
            updated_at,
            state,
            text: text.to_string(),
            delete: flags & FLAG_DELETE != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let out = Message::outgoing("HI BOB", 100);
        assert_eq!(out.direction(), Direction::Outgoing);
        assert_eq!(out.outgoing_state(), Some(OutgoingState::Pending));
        assert!(!out.owes_ack());

        let inc = Message::incoming("GM AL", 100);
        assert_eq!(inc.direction(), Direction::Incoming);
        assert!(inc.owes_ack());
        assert_eq!(inc.outgoing_state(), None);
    }

    #[test]
    fn test_flags_are_assigned_not_accumulated() {
        let mut msg = Message::incoming("GM", 1);
        msg.mark_ack_sent(2);
        msg.mark_ack_sent(3);
        assert_eq!(msg.flags(), FLAG_INCOMING | FLAG_COMPLETED);
        assert_eq!(msg.updated_at, 3);

        let mut msg = Message::outgoing("GM", 1);
        msg.set_outgoing(OutgoingState::Acknowledged, 5);
        msg.set_outgoing(OutgoingState::Acknowledged, 6);
        assert_eq!(msg.flags(), FLAG_COMPLETED);
    }

    #[test]
    fn test_progress_tokens() {
        let mut msg = Message::outgoing("HELLO THERE OLD MAN", 1);
        assert_eq!(msg.progress_token(), "P");
        msg.set_outgoing(OutgoingState::Sending { sent: 12 }, 2);
        assert_eq!(msg.progress_token(), "S12");
        msg.set_outgoing(OutgoingState::AwaitingAck, 3);
        assert_eq!(msg.progress_token(), "T");
        assert_eq!(Message::incoming("X", 1).progress_token(), "-");
    }

    #[test]
    fn test_from_parts_restores_state() {
        let cases = [
            (0, "P", MessageState::Outgoing(OutgoingState::Pending)),
            (0, "S5", MessageState::Outgoing(OutgoingState::Sending { sent: 5 })),
            (0, "T", MessageState::Outgoing(OutgoingState::AwaitingAck)),
            (FLAG_COMPLETED, "T", MessageState::Outgoing(OutgoingState::Acknowledged)),
            (FLAG_INCOMING, "-", MessageState::Incoming(IncomingState::AckPending)),
            (FLAG_INCOMING | FLAG_COMPLETED, "-", MessageState::Incoming(IncomingState::AckSent)),
        ];
        for (flags, progress, state) in cases {
            let msg = Message::from_parts(10, 20, flags, progress, "HELLO").unwrap();
            assert_eq!(msg.state, state);
            assert_eq!(msg.flags(), flags);
            assert_eq!(msg.progress_token(), progress);
        }
    }

    #[test]
    fn test_from_parts_rejects_inconsistent_fields() {
        assert!(Message::from_parts(1, 1, 0, "S9", "HELLO").is_none());
        assert!(Message::from_parts(1, 1, 0, "X", "HELLO").is_none());
        assert!(Message::from_parts(1, 1, FLAG_INCOMING, "P", "HELLO").is_none());
        assert!(Message::from_parts(1, 1, FLAG_COMPLETED, "P", "HELLO").is_none());
    }
}
