//! Line-oriented text store for the directory and its conversations
//!
//! ```text
//! CALLSIGN|STATUS|LAST_HEARD_EPOCH|FREQUENCY_HZ|FLAGS
//!  CREATED|UPDATED|FLAGS|SEND_PROGRESS|TEXT
//! ```
//!
//! Message lines start with a space or tab and belong to the contact line
//! above them. A contact never heard from is written with a last-heard time
//! and frequency of 0. Bad lines are skipped one at a time.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::directory::{Contact, Directory, CONTACT_DELETE};
use crate::core::{Callsign, Error, Result, MAX_STATUS};
use crate::protocol::codec::{check_length, is_transmit_char};
use crate::protocol::message::Message;

/// Lines shorter than this are ignored
pub const MIN_LINE_LEN: usize = 10;

fn clean_field(text: &str) -> String {
    text.chars()
        .map(|c| if c == '|' || c == '\n' || c == '\r' { '?' } else { c })
        .collect()
}

/// Renders every saved contact and its messages
pub fn encode(directory: &Directory) -> String {
    let mut out = String::new();
    for contact in directory.iter().filter(|c| c.saved && !c.delete) {
        let _ = writeln!(
            out,
            "{}|{}|{}|{}|{}",
            contact.callsign,
            clean_field(&contact.status),
            contact.last_heard.unwrap_or(0),
            contact.frequency,
            contact.flags()
        );
        for msg in contact.messages.iter().filter(|m| !m.delete) {
            let _ = writeln!(
                out,
                " {}|{}|{}|{}|{}",
                msg.created_at,
                msg.updated_at,
                msg.flags(),
                msg.progress_token(),
                clean_field(&msg.text)
            );
        }
    }
    out
}

fn parse_contact(line: &str) -> Option<Contact> {
    let mut fields = line.splitn(5, '|');
    let callsign = Callsign::new(fields.next()?).ok()?;
    let status = fields.next()?;
    if status.chars().count() > MAX_STATUS {
        return None;
    }
    let last_heard: u64 = fields.next()?.trim().parse().ok()?;
    let frequency: u32 = fields.next()?.trim().parse().ok()?;
    let flags: u32 = fields.next()?.trim().parse().ok()?;
    if flags & CONTACT_DELETE != 0 {
        return None;
    }

    let mut contact = Contact::new(callsign);
    match (last_heard, frequency) {
        (0, 0) => {}
        (0, _) | (_, 0) => return None,
        (heard, frequency) => contact.heard(frequency, heard),
    }
    contact.set_status(status);
    contact.saved = flags & super::directory::CONTACT_SAVED != 0;
    Some(contact)
}

fn parse_message(line: &str) -> Option<Message> {
    let line = line.trim_start_matches(&[' ', '\t'][..]);
    let mut fields = line.splitn(5, '|');
    let created: u64 = fields.next()?.trim().parse().ok().filter(|&v| v != 0)?;
    let updated: u64 = fields.next()?.trim().parse().ok().filter(|&v| v != 0)?;
    let flags: u32 = fields.next()?.trim().parse().ok()?;
    let progress = fields.next()?.trim();
    let text = fields.next()?;
    if text.is_empty() || !text.chars().all(is_transmit_char) || check_length(text.len()).is_err() {
        return None;
    }
    let msg = Message::from_parts(created, updated, flags, progress, text)?;
    if msg.delete {
        return None;
    }
    Some(msg)
}

/// Rebuilds a directory from the text form, skipping whatever does not parse
pub fn decode(text: &str, max_contacts: Option<usize>) -> Directory {
    let mut directory = Directory::new(max_contacts);
    // callsign of the contact that message lines currently attach to
    let mut current: Option<Callsign> = None;

    for (number, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.len() < MIN_LINE_LEN {
            continue;
        }

        if line.starts_with(&[' ', '\t'][..]) {
            let Some(call) = current.as_ref() else {
                debug!(line = number + 1, "message line without a contact, skipped");
                continue;
            };
            match (parse_message(line), directory.get_mut(call.as_str())) {
                (Some(msg), Some(contact)) => contact.messages.push(msg),
                _ => warn!(line = number + 1, "skipping malformed message line"),
            }
            continue;
        }

        current = None;
        match parse_contact(line) {
            Some(contact) => {
                let call = contact.callsign.clone();
                match directory.push_back(contact) {
                    Ok(()) => current = Some(call),
                    Err(e) => warn!(line = number + 1, error = %e, "skipping contact"),
                }
            }
            None => warn!(line = number + 1, "skipping malformed contact line"),
        }
    }

    directory.take_changed();
    directory
}

/// The store file on disk
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the store; a missing file yields an empty directory
    pub async fn load(&self, max_contacts: Option<usize>) -> Result<Directory> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(decode(&text, max_contacts)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Directory::new(max_contacts)),
            Err(e) => Err(Error::persistence(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Writes already encoded text through a temporary sibling file
    pub async fn save_text(&self, text: &str) -> Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, text).await.map_err(|e| {
            Error::persistence(format!("failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::persistence(format!("failed to replace {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }

    /// Encodes and writes the directory
    pub async fn save(&self, directory: &Directory) -> Result<()> {
        self.save_text(&encode(directory)).await
    }
}
