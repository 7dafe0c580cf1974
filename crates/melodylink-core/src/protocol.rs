//! Sync wire format.
//!
//! Every frame is a one-byte tag followed by the payload. Integers are
//! big-endian; content lengths use a VarInt of 7-bit groups, least
//! significant first, with the high bit marking continuation.
//!
//! | Tag | Message | Payload |
//! |---|---|---|
//! | 0 | Hello | - |
//! | 1 | ContentRequest | digest |
//! | 2 | ContentResponse | status, then digest + VarInt length + bytes when found |
//! | 3 | SessionInit | u32 session, instrument table, percussion table |
//! | 4 | SequenceChange | u32 session, digest, i64 tick, i64 micros |
//! | 5 | Stop | u32 session |
//! | 6 | SequencePull | u32 session |

use crate::catalog::{Instrument, InstrumentCatalog, Percussion, Timbre};
use crate::error::{Error, Result};
use crate::song::{Digest, DIGEST_LEN};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

const TAG_HELLO: u8 = 0x00;
const TAG_CONTENT_REQUEST: u8 = 0x01;
const TAG_CONTENT_RESPONSE: u8 = 0x02;
const TAG_SESSION_INIT: u8 = 0x03;
const TAG_SEQUENCE_CHANGE: u8 = 0x04;
const TAG_STOP: u8 = 0x05;
const TAG_SEQUENCE_PULL: u8 = 0x06;

const STATUS_NOT_FOUND: u8 = 0;
const STATUS_FOUND: u8 = 1;

/// Longest VarInt accepted.
const MAX_VARINT_BYTES: usize = 5;

/// Answer to a [`SyncMessage::ContentRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum ContentReply {
    NotFound,
    Found { digest: Digest, bytes: Arc<[u8]> },
}

/// Messages exchanged between conductor and listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    Hello,
    ContentRequest(Digest),
    ContentResponse(ContentReply),
    /// Catalog the session's songs are played with.
    SessionInit {
        session_id: u32,
        catalog: Arc<InstrumentCatalog>,
    },
    /// Authoritative song and position.
    SequenceChange {
        session_id: u32,
        digest: Digest,
        tick: i64,
        micros: i64,
    },
    Stop {
        session_id: u32,
    },
    /// Ask for a fresh [`SyncMessage::SequenceChange`].
    SequencePull {
        session_id: u32,
    },
}

impl SyncMessage {
    /// Serialize into one frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            SyncMessage::Hello => buf.write_u8(TAG_HELLO)?,
            SyncMessage::ContentRequest(digest) => {
                buf.write_u8(TAG_CONTENT_REQUEST)?;
                buf.write_all(digest.as_bytes())?;
            }
            SyncMessage::ContentResponse(ContentReply::NotFound) => {
                buf.write_u8(TAG_CONTENT_RESPONSE)?;
                buf.write_u8(STATUS_NOT_FOUND)?;
            }
            SyncMessage::ContentResponse(ContentReply::Found { digest, bytes }) => {
                buf.write_u8(TAG_CONTENT_RESPONSE)?;
                buf.write_u8(STATUS_FOUND)?;
                buf.write_all(digest.as_bytes())?;
                let len = u32::try_from(bytes.len()).map_err(|_| {
                    Error::Malformed(format!("content of {} bytes is too large", bytes.len()))
                })?;
                write_varint(&mut buf, len)?;
                buf.write_all(bytes)?;
            }
            SyncMessage::SessionInit { session_id, catalog } => {
                buf.write_u8(TAG_SESSION_INIT)?;
                buf.write_u32::<BigEndian>(*session_id)?;
                write_catalog(&mut buf, catalog)?;
            }
            SyncMessage::SequenceChange {
                session_id,
                digest,
                tick,
                micros,
            } => {
                buf.write_u8(TAG_SEQUENCE_CHANGE)?;
                buf.write_u32::<BigEndian>(*session_id)?;
                buf.write_all(digest.as_bytes())?;
                buf.write_i64::<BigEndian>(*tick)?;
                buf.write_i64::<BigEndian>(*micros)?;
            }
            SyncMessage::Stop { session_id } => {
                buf.write_u8(TAG_STOP)?;
                buf.write_u32::<BigEndian>(*session_id)?;
            }
            SyncMessage::SequencePull { session_id } => {
                buf.write_u8(TAG_SEQUENCE_PULL)?;
                buf.write_u32::<BigEndian>(*session_id)?;
            }
        }
        Ok(buf)
    }

    /// Parse one frame. Truncated frames and trailing bytes are malformed.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(frame);
        let message = read_message(&mut cursor).map_err(|e| match e {
            Error::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Error::Malformed("truncated frame".to_string())
            }
            other => other,
        })?;
        let consumed = cursor.position() as usize;
        if consumed != frame.len() {
            return Err(Error::Malformed(format!(
                "{} trailing byte(s) after message",
                frame.len() - consumed
            )));
        }
        Ok(message)
    }

    /// Session the message belongs to, if any.
    pub fn session_id(&self) -> Option<u32> {
        match self {
            SyncMessage::SessionInit { session_id, .. }
            | SyncMessage::SequenceChange { session_id, .. }
            | SyncMessage::Stop { session_id }
            | SyncMessage::SequencePull { session_id } => Some(*session_id),
            _ => None,
        }
    }
}

fn read_message(r: &mut Cursor<&[u8]>) -> Result<SyncMessage> {
    let tag = r.read_u8()?;
    let message = match tag {
        TAG_HELLO => SyncMessage::Hello,
        TAG_CONTENT_REQUEST => SyncMessage::ContentRequest(read_digest(r)?),
        TAG_CONTENT_RESPONSE => match r.read_u8()? {
            STATUS_NOT_FOUND => SyncMessage::ContentResponse(ContentReply::NotFound),
            STATUS_FOUND => {
                let digest = read_digest(r)?;
                let len = read_varint(r)? as usize;
                let remaining = r.get_ref().len() - r.position() as usize;
                if len > remaining {
                    return Err(Error::Malformed(format!(
                        "content length {} exceeds frame ({} bytes left)",
                        len, remaining
                    )));
                }
                let mut bytes = vec![0u8; len];
                r.read_exact(&mut bytes)?;
                SyncMessage::ContentResponse(ContentReply::Found {
                    digest,
                    bytes: bytes.into(),
                })
            }
            other => return Err(Error::Malformed(format!("unknown content status {}", other))),
        },
        TAG_SESSION_INIT => SyncMessage::SessionInit {
            session_id: r.read_u32::<BigEndian>()?,
            catalog: Arc::new(read_catalog(r)?),
        },
        TAG_SEQUENCE_CHANGE => SyncMessage::SequenceChange {
            session_id: r.read_u32::<BigEndian>()?,
            digest: read_digest(r)?,
            tick: r.read_i64::<BigEndian>()?,
            micros: r.read_i64::<BigEndian>()?,
        },
        TAG_STOP => SyncMessage::Stop {
            session_id: r.read_u32::<BigEndian>()?,
        },
        TAG_SEQUENCE_PULL => SyncMessage::SequencePull {
            session_id: r.read_u32::<BigEndian>()?,
        },
        other => return Err(Error::UnknownMessage(other)),
    };
    Ok(message)
}

fn read_digest(r: &mut impl Read) -> Result<Digest> {
    let mut bytes = [0u8; DIGEST_LEN];
    r.read_exact(&mut bytes)?;
    Ok(Digest::from_bytes(bytes))
}

/// Write `value` as 7-bit groups, least significant first.
pub fn write_varint(w: &mut impl Write, mut value: u32) -> Result<()> {
    loop {
        let group = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            w.write_u8(group)?;
            return Ok(());
        }
        w.write_u8(group | 0x80)?;
    }
}

/// Read a VarInt of at most five bytes.
pub fn read_varint(r: &mut impl Read) -> Result<u32> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_BYTES {
        let byte = r.read_u8()?;
        value |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return u32::try_from(value)
                .map_err(|_| Error::Malformed("VarInt overflows 32 bits".to_string()));
        }
    }
    Err(Error::Malformed(format!("VarInt longer than {} bytes", MAX_VARINT_BYTES)))
}

fn write_catalog(w: &mut impl Write, catalog: &InstrumentCatalog) -> Result<()> {
    let instruments: Vec<_> = catalog.instruments().collect();
    w.write_u16::<BigEndian>(instruments.len() as u16)?;
    for (program, instrument) in instruments {
        w.write_u16::<BigEndian>(program as u16)?;
        w.write_u8(instrument.timbre.index())?;
        w.write_i8(instrument.octave_shift)?;
        w.write_u8(instrument.sustain as u8)?;
    }

    let percussion: Vec<_> = catalog.percussion_keys().collect();
    w.write_u16::<BigEndian>(percussion.len() as u16)?;
    for (key, entry) in percussion {
        w.write_u16::<BigEndian>(key as u16)?;
        w.write_u8(entry.timbre.index())?;
        w.write_u8(entry.key)?;
    }
    Ok(())
}

fn read_catalog(r: &mut impl Read) -> Result<InstrumentCatalog> {
    let mut catalog = InstrumentCatalog::new();

    let count = r.read_u16::<BigEndian>()?;
    for _ in 0..count {
        let program = read_midi_number(r)?;
        let timbre = read_timbre(r)?;
        let octave_shift = r.read_i8()?;
        let sustain = r.read_u8()? != 0;
        catalog.insert_instrument(
            program,
            Instrument {
                timbre,
                octave_shift,
                sustain,
            },
        );
    }

    let count = r.read_u16::<BigEndian>()?;
    for _ in 0..count {
        let key = read_midi_number(r)?;
        let timbre = read_timbre(r)?;
        let played = r.read_u8()?;
        catalog.insert_percussion(key, Percussion { timbre, key: played });
    }
    Ok(catalog)
}

fn read_midi_number(r: &mut impl Read) -> Result<u8> {
    let value = r.read_u16::<BigEndian>()?;
    u8::try_from(value)
        .ok()
        .filter(|v| *v < 128)
        .ok_or_else(|| Error::Malformed(format!("MIDI number {} out of range", value)))
}

fn read_timbre(r: &mut impl Read) -> Result<Timbre> {
    let index = r.read_u8()?;
    Timbre::from_index(index).ok_or_else(|| Error::Malformed(format!("unknown timbre {}", index)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: SyncMessage) {
        let frame = message.encode().unwrap();
        assert_eq!(SyncMessage::decode(&frame).unwrap(), message);
    }

    #[test]
    fn test_sequence_change_layout() {
        let digest = Digest::of(b"song");
        let frame = SyncMessage::SequenceChange {
            session_id: 7,
            digest,
            tick: 480,
            micros: -1,
        }
        .encode()
        .unwrap();

        assert_eq!(frame.len(), 1 + 4 + 32 + 8 + 8);
        assert_eq!(frame[0], TAG_SEQUENCE_CHANGE);
        assert_eq!(&frame[1..5], &[0, 0, 0, 7]);
        assert_eq!(&frame[5..37], digest.as_bytes());
        assert_eq!(&frame[37..45], &480i64.to_be_bytes());
        assert_eq!(&frame[45..], &[0xFF; 8]);
    }

    #[test]
    fn test_content_response_roundtrip() {
        let bytes: Vec<u8> = (0..300).map(|i| i as u8).collect();
        roundtrip(SyncMessage::ContentResponse(ContentReply::Found {
            digest: Digest::of(&bytes),
            bytes: bytes.into(),
        }));
        roundtrip(SyncMessage::ContentResponse(ContentReply::NotFound));
    }

    #[test]
    fn test_session_init_carries_catalog() {
        let catalog = InstrumentCatalog::general_midi();
        let message = SyncMessage::SessionInit {
            session_id: 1,
            catalog: catalog.clone(),
        };
        let decoded = SyncMessage::decode(&message.encode().unwrap()).unwrap();
        let SyncMessage::SessionInit { catalog: decoded, .. } = decoded else {
            panic!("wrong message");
        };
        assert_eq!(*decoded, *catalog);
    }

    #[test]
    fn test_varint() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 300).unwrap();
        assert_eq!(buf, vec![0xAC, 0x02]);
        assert_eq!(read_varint(&mut &buf[..]).unwrap(), 300);

        let too_long = [0x80u8, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert!(matches!(read_varint(&mut &too_long[..]), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(SyncMessage::decode(&[]), Err(Error::Malformed(_))));
        assert!(matches!(SyncMessage::decode(&[0x42]), Err(Error::UnknownMessage(0x42))));
        assert!(matches!(SyncMessage::decode(&[TAG_STOP, 0, 0]), Err(Error::Malformed(_))));
        assert!(matches!(SyncMessage::decode(&[TAG_HELLO, 0]), Err(Error::Malformed(_))));

        // Length claims more than the frame holds.
        let mut frame = vec![TAG_CONTENT_RESPONSE, STATUS_FOUND];
        frame.extend_from_slice(Digest::of(b"x").as_bytes());
        frame.extend_from_slice(&[0xFF, 0x01]);
        assert!(matches!(SyncMessage::decode(&frame), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_session_id() {
        assert_eq!(SyncMessage::Stop { session_id: 4 }.session_id(), Some(4));
        assert_eq!(SyncMessage::Hello.session_id(), None);
    }
}
