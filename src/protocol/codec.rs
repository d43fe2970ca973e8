//! Frame codec: text normalization, headers and fragment framing
//!
//! A message travels as one header packet followed by `packet_count` fragment
//! packets of exactly [`PACKET_SIZE`] characters. Every fragment but the last
//! carries [`FRAGMENT_PAYLOAD`] characters and ends in [`CONTINUATION_MARK`];
//! the last carries at most [`FINAL_PAYLOAD`] characters followed by the
//! checksum and count copied from the header.
//!
//! The two-letter checksum holds 8 bits derived from a digest. It keeps
//! simultaneous conversations from being mixed up; it does not authenticate
//! anything.

use sha2::{Digest, Sha256};

use crate::core::{
    Error, Result, FINAL_PAYLOAD, FRAGMENT_PAYLOAD, MAX_PACKETS, PACKET_SIZE, PROTOCOL_VERSION,
};

/// Closes every non-final fragment
pub const CONTINUATION_MARK: char = '+';

/// Characters that survive the radio link: `0-9 A-Z + - . / ?` and space
pub fn is_transmit_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | '/' | '?' | ' ')
}

/// Maps text onto the transmit alphabet: uppercase, anything else becomes `?`.
///
/// Surrounding spaces are dropped so the result is the logical message; use
/// [`normalize_padded`] for the framed view.
pub fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| {
            let upper = c.to_ascii_uppercase();
            if is_transmit_char(upper) {
                upper
            } else {
                '?'
            }
        })
        .collect::<String>()
        .trim_matches(' ')
        .to_string()
}

/// Normalized text right-padded with spaces to a multiple of the packet size
pub fn normalize_padded(text: &str) -> String {
    let mut out = normalize(text);
    let rem = out.len() % PACKET_SIZE;
    if rem != 0 || out.is_empty() {
        out.extend(std::iter::repeat(' ').take(PACKET_SIZE - rem));
    }
    out
}

/// Right-pads a single packet with spaces up to the packet size
pub fn pad_packet(packet: &str) -> String {
    format!("{:<width$}", packet, width = PACKET_SIZE)
}

/// Number of fragment packets needed for `payload_length` characters
pub fn packet_count(payload_length: usize) -> usize {
    let mut remaining = payload_length as isize;
    let mut count = 1;
    while remaining > FINAL_PAYLOAD as isize {
        remaining -= FRAGMENT_PAYLOAD as isize;
        count += 1;
    }
    count
}

/// Rejects payloads whose packet count does not fit the single header digit
pub fn check_length(payload_length: usize) -> Result<usize> {
    let packets = packet_count(payload_length);
    if packets > MAX_PACKETS {
        return Err(Error::MessageTooLong { packets });
    }
    Ok(packets)
}

/// Digest over `source ‖ destination ‖ text`
pub fn digest(destination: &str, source: &str, text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(destination.as_bytes());
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

/// The two checksum letters, each in `A..=P`
pub fn check_letters(destination: &str, source: &str, text: &str) -> [char; 2] {
    let hash = digest(destination, source, text);
    [
        (b'A' + hash[0] % 16) as char,
        (b'A' + hash[1] % 16) as char,
    ]
}

/// `<CHECK><COUNT>`, the part of the header repeated at the end of the final fragment
pub fn header_suffix(destination: &str, source: &str, text: &str) -> Result<String> {
    let count = check_length(text.len())?;
    let [a, b] = check_letters(destination, source, text);
    Ok(format!("{}{}{}", a, b, count))
}

/// Builds `"<DEST> <SRC> <CHECK><COUNT>0"` for a message
pub fn make_header(destination: &str, source: &str, text: &str) -> Result<String> {
    let suffix = header_suffix(destination, source, text)?;
    Ok(format!(
        "{} {} {}{}",
        destination, source, suffix, PROTOCOL_VERSION
    ))
}

/// Recomputes the header for the triple and compares byte for byte
pub fn verify_header(candidate: &str, destination: &str, source: &str, text: &str) -> bool {
    match make_header(destination, source, text) {
        Ok(expected) => expected == candidate,
        Err(_) => false,
    }
}

/// A line shaped like `<tok0> <tok1> <CHECK><COUNT>0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    /// First token (the destination)
    pub tok0: String,
    /// Second token (the source)
    pub tok1: String,
    /// Checksum letters and count digit, without the version marker
    pub suffix: String,
    /// Announced number of fragment packets
    pub count: usize,
}

impl HeaderLine {
    /// The line exactly as it appears on air
    pub fn to_line(&self) -> String {
        format!("{} {} {}{}", self.tok0, self.tok1, self.suffix, PROTOCOL_VERSION)
    }
}

/// Parses a check token: two letters `A..=P`, a digit `1..=9`, then the version marker
fn parse_check_token(token: &str) -> Option<(String, usize)> {
    let bytes = token.as_bytes();
    if bytes.len() != 4 {
        return None;
    }
    let letters_ok = bytes[..2].iter().all(|b| (b'A'..=b'P').contains(b));
    let count = (bytes[2] as char).to_digit(10)? as usize;
    if !letters_ok || count == 0 || bytes[3] as char != PROTOCOL_VERSION {
        return None;
    }
    Some((token[..3].to_string(), count))
}

/// Classifies a decoded line as a header/acknowledgment candidate
pub fn parse_header(line: &str) -> Option<HeaderLine> {
    let mut tokens = line.split_whitespace();
    let tok0 = tokens.next()?;
    let tok1 = tokens.next()?;
    let tok2 = tokens.next()?;
    if tokens.next().is_some() {
        return None;
    }
    let (suffix, count) = parse_check_token(tok2)?;
    Some(HeaderLine {
        tok0: tok0.to_string(),
        tok1: tok1.to_string(),
        suffix,
        count,
    })
}

/// One fragment produced by [`fragment`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// The 13-character packet to transmit
    pub packet: String,
    /// Payload offset after this fragment
    pub sent: usize,
    /// Whether this was the closing fragment
    pub is_final: bool,
}

/// Cuts the next fragment of `text` starting at offset `sent`.
///
/// `suffix` is the checksum and count (`<CHECK><COUNT>`) closing the final fragment.
pub fn fragment(text: &str, sent: usize, suffix: &str) -> Fragment {
    let rest = text.get(sent..).unwrap_or("");
    if rest.len() > FINAL_PAYLOAD {
        let take = rest.len().min(FRAGMENT_PAYLOAD);
        Fragment {
            packet: format!(
                "{:<width$}{}",
                &rest[..take],
                CONTINUATION_MARK,
                width = FRAGMENT_PAYLOAD
            ),
            sent: sent + take,
            is_final: false,
        }
    } else {
        Fragment {
            packet: format!("{:<width$}{}", rest, suffix, width = FINAL_PAYLOAD),
            sent: text.len(),
            is_final: true,
        }
    }
}

/// Every fragment of `text`, in transmission order
pub fn fragments(text: &str, suffix: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut sent = 0;
    loop {
        let next = fragment(text, sent, suffix);
        sent = next.sent;
        out.push(next.packet);
        if next.is_final {
            return out;
        }
    }
}

/// Splits a reassembly buffer (header line followed by the fragments) into
/// its header and recovered payload. Returns `None` if the framing is broken.
pub fn assemble(buffer: &str) -> Option<(HeaderLine, String)> {
    let (tok0, rest) = buffer.split_once(' ')?;
    let (tok1, rest) = rest.split_once(' ')?;
    let token = rest.get(..4)?;
    let body = rest.get(4..)?;
    let (suffix, count) = parse_check_token(token)?;

    if body.len() != count * PACKET_SIZE {
        return None;
    }

    let mut payload = String::with_capacity(count * FRAGMENT_PAYLOAD);
    for (i, packet) in body.as_bytes().chunks(PACKET_SIZE).enumerate() {
        let packet = std::str::from_utf8(packet).ok()?;
        if !packet.is_ascii() {
            return None;
        }
        if i + 1 < count {
            if !packet.ends_with(CONTINUATION_MARK) {
                return None;
            }
            payload.push_str(&packet[..FRAGMENT_PAYLOAD]);
        } else {
            if packet[FINAL_PAYLOAD..] != suffix {
                return None;
            }
            payload.push_str(&packet[..FINAL_PAYLOAD]);
        }
    }

    let header = HeaderLine {
        tok0: tok0.to_string(),
        tok1: tok1.to_string(),
        suffix,
        count,
    };
    Some((header, payload.trim_end_matches(' ').to_string()))
}
