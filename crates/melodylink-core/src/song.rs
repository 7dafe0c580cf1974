//! Content digests and verified song descriptors.

use crate::error::{Error, Result};
use crate::sequence::Sequence;
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::sync::Arc;

/// Length of a SHA-256 digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// SHA-256 digest identifying a sequence by its raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Hash `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Wrap a slice, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Parse lowercase or uppercase hex.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }

    /// Lowercase hex encoding, used as the cache file name.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..12])
    }
}

/// Immutable descriptor of one playable sequence.
///
/// Only constructed from bytes, so `digest` always matches `bytes`.
#[derive(Debug, Clone)]
pub struct SongInfo {
    bytes: Arc<[u8]>,
    sequence: Sequence,
    digest: Digest,
    path: String,
    sanitized_path: String,
}

impl SongInfo {
    /// Hash and parse `bytes`, labelling the song with a display path.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, path: impl Into<String>) -> Result<Self> {
        let bytes = bytes.into();
        let sequence = Sequence::parse(&bytes)?;
        let path = path.into();
        Ok(Self {
            digest: Digest::of(&bytes),
            sanitized_path: sanitize_path(&path),
            bytes,
            sequence,
            path,
        })
    }

    /// Like [`from_bytes`](Self::from_bytes), but the bytes must hash to `expected`.
    pub fn verified(
        expected: Digest,
        bytes: impl Into<Arc<[u8]>>,
        path: impl Into<String>,
    ) -> Result<Self> {
        let bytes = bytes.into();
        let actual = Digest::of(&bytes);
        if actual != expected {
            return Err(Error::DigestMismatch { expected, actual });
        }
        Self::from_bytes(bytes, path)
    }

    /// Raw sequence bytes.
    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    /// Parsed event timeline.
    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// Title from the file's first track name.
    pub fn title(&self) -> Option<&str> {
        self.sequence.title()
    }

    /// Path as given when the song was loaded.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path safe to display and match across systems.
    pub fn sanitized_path(&self) -> &str {
        &self.sanitized_path
    }

    /// Title when present, sanitized path otherwise.
    pub fn display_name(&self) -> &str {
        self.title().unwrap_or(&self.sanitized_path)
    }
}

/// Normalize separators to `/`, drop control characters and surrounding
/// whitespace, and collapse empty or `.` components.
pub fn sanitize_path(path: &str) -> String {
    let cleaned: String = path
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c == '\\' { '/' } else { c })
        .collect();
    cleaned
        .split('/')
        .map(str::trim)
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::testing::single_note;

    #[test]
    fn test_digest_hex() {
        let digest = Digest::of(b"abc");
        assert_eq!(
            digest.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(Digest::from_hex(&digest.to_hex()), Some(digest));
        assert_eq!(Digest::from_hex("abcd"), None);
        assert_eq!(Digest::from_slice(&[0u8; 31]), None);
    }

    #[test]
    fn test_song_info_from_bytes() {
        let bytes = single_note(1000);
        let song = SongInfo::from_bytes(bytes.clone(), "songs\\demo\\one.mid").unwrap();
        assert_eq!(song.digest(), Digest::of(&bytes));
        assert_eq!(song.title(), Some("Single Note"));
        assert_eq!(song.sanitized_path(), "songs/demo/one.mid");
        assert_eq!(song.path(), "songs\\demo\\one.mid");
    }

    #[test]
    fn test_verified_rejects_mismatch() {
        let bytes = single_note(1000);
        let wrong = Digest::of(b"something else");
        let err = SongInfo::verified(wrong, bytes, "x.mid").unwrap_err();
        assert!(matches!(err, Error::DigestMismatch { expected, .. } if expected == wrong));
    }

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("./a//b\\c.mid"), "a/b/c.mid");
        assert_eq!(sanitize_path("bad\u{7}name.mid"), "badname.mid");
        assert_eq!(sanitize_path(" spaced / song.mid "), "spaced/song.mid");
    }
}
