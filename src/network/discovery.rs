//! Presence beacons: how stations find each other
//!
//! Outbound beacons read `+<CALLSIGN> <CODE>`. Inbound, both that form and the
//! common `CQ <CALLSIGN> ...` call are accepted.

use tracing::debug;

use crate::core::{is_callsign_char, Callsign, Frequency, Result, Timestamp, MAX_CALLSIGN, PACKET_SIZE};
use crate::protocol::codec::normalize;
use crate::store::Directory;

/// Beacon prefix
pub const BEACON_MARK: char = '+';

/// General call prefix also treated as a presence announcement
pub const CQ_PREFIX: &str = "CQ ";

/// Presence selection that suppresses beaconing
pub const SILENT: &str = "SILENT";

/// On-air code for a presence selection, `None` when the station stays silent
pub fn presence_code(presence: &str) -> Option<String> {
    let presence = presence.trim().to_ascii_uppercase();
    let code = match presence.as_str() {
        "READY" => "QRV",
        "AWAY" => "AWY",
        "BUSY" => "QRL",
        SILENT => return None,
        _ => return Some(normalize(&presence)),
    };
    Some(code.to_string())
}

/// Beacon packet text, cut to one packet
pub fn format_beacon(callsign: &Callsign, code: &str) -> String {
    let mut beacon = if code.is_empty() {
        format!("{}{}", BEACON_MARK, callsign)
    } else {
        format!("{}{} {}", BEACON_MARK, callsign, code)
    };
    beacon.truncate(PACKET_SIZE);
    beacon.trim_end().to_string()
}

/// A presence announcement heard on the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    pub callsign: Callsign,
    pub status: String,
}

/// Recognizes `+CALL STATUS` and `CQ CALL ...` lines
pub fn parse_beacon(line: &str) -> Option<Beacon> {
    let rest = if let Some(rest) = line.strip_prefix(BEACON_MARK) {
        rest
    } else {
        line.strip_prefix(CQ_PREFIX)?.trim_start()
    };

    let end = rest
        .find(|c: char| !is_callsign_char(c))
        .unwrap_or(rest.len());
    if end > MAX_CALLSIGN {
        return None;
    }
    let callsign = Callsign::new(&rest[..end]).ok()?;
    Some(Beacon {
        callsign,
        status: rest[end..].trim().to_string(),
    })
}

/// Upserts the announcing station: status, frequency and last-heard are
/// refreshed and the contact moves to the front.
pub fn apply_beacon(
    directory: &mut Directory,
    beacon: &Beacon,
    frequency: Frequency,
    now: Timestamp,
) -> Result<()> {
    let call = beacon.callsign.as_str();
    if !directory.contains(call) {
        debug!(callsign = call, frequency, "new station heard");
    }
    let contact = directory.add_heard(beacon.callsign.clone(), frequency, now)?;
    contact.set_status(&beacon.status);
    directory.mark_changed();
    Ok(())
}
