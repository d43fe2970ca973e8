use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::core::{Error, Frequency};
use crate::protocol::Transmission;

/// Longest line accepted from the modem; anything longer is discarded
pub const MAX_LINE_LEN: usize = 256;

/// One packet decoded by the modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Audio offset the packet was heard at
    pub frequency: Frequency,
    /// Decoded packet text
    pub text: String,
}

impl From<Transmission> for Decoded {
    fn from(tx: Transmission) -> Self {
        Decoded {
            frequency: tx.frequency,
            text: tx.text,
        }
    }
}

impl From<Decoded> for Transmission {
    fn from(rx: Decoded) -> Self {
        Transmission {
            frequency: rx.frequency,
            text: rx.text,
        }
    }
}

/// Line codec for the modem link: `<frequency_hz> <text>\n` in both directions
#[derive(Debug, Clone)]
pub struct ModemCodec {
    lines: LinesCodec,
}

impl ModemCodec {
    /// Creates a new modem codec
    pub fn new() -> Self {
        ModemCodec {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LEN),
        }
    }

    fn parse_line(line: &str) -> Option<Decoded> {
        let (frequency, text) = line.split_once(' ')?;
        let frequency = frequency.parse().ok()?;
        Some(Decoded {
            frequency,
            text: text.to_string(),
        })
    }

    /// Pulls lines until one parses. Bad lines are logged and skipped, since
    /// a decoder error would end the framed stream.
    fn next_decoded(
        &mut self,
        src: &mut BytesMut,
        eof: bool,
    ) -> Result<Option<Decoded>, Error> {
        loop {
            let line = if eof {
                self.lines.decode_eof(src)
            } else {
                self.lines.decode(src)
            };
            match line {
                Ok(Some(line)) => match Self::parse_line(&line) {
                    Some(decoded) => return Ok(Some(decoded)),
                    None => warn!(line = %line, "skipping malformed modem line"),
                },
                Ok(None) => return Ok(None),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(max = MAX_LINE_LEN, "discarded overlong modem line");
                }
                Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!(error = %e, "skipping undecodable modem line");
                }
                Err(LinesCodecError::Io(e)) => return Err(e.into()),
            }
        }
    }
}

impl Default for ModemCodec {
    fn default() -> Self {
        ModemCodec::new()
    }
}

impl Decoder for ModemCodec {
    type Item = Decoded;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.next_decoded(src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.next_decoded(src, true)
    }
}

impl Encoder<Transmission> for ModemCodec {
    type Error = Error;

    fn encode(&mut self, item: Transmission, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.text.contains(&['\n', '\r'][..]) {
            return Err(Error::channel("Transmission text contains a line break"));
        }
        let line = format!("{} {}", item.frequency, item.text);
        self.lines.encode(line, dst).map_err(|e| match e {
            LinesCodecError::Io(e) => Error::Io(e),
            LinesCodecError::MaxLineLengthExceeded => Error::channel("Transmission line too long"),
        })
    }
}
