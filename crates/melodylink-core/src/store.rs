//! Content-addressed sequence cache.
//!
//! Songs are keyed by the SHA-256 digest of their raw bytes. The store has
//! a memory tier and an optional directory tier holding one file per
//! digest, named by its lowercase hex. Bytes are re-hashed whenever they
//! come from outside the memory tier, so a digest is never trusted blindly.

use crate::error::Result;
use crate::link::PeerLink;
use crate::protocol::SyncMessage;
use crate::song::{Digest, SongInfo};
use dashmap::{DashMap, DashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Fetches missing content from elsewhere, without blocking.
pub trait ContentPuller: Send + Sync {
    /// Ask for the bytes behind `digest`; they arrive later through
    /// [`ContentStore::put`].
    fn pull(&self, digest: &Digest) -> Result<()>;
}

/// Requests content from a peer with a [`SyncMessage::ContentRequest`].
pub struct LinkPuller<L>(pub Arc<L>);

impl<L: PeerLink + Send + Sync> ContentPuller for LinkPuller<L> {
    fn pull(&self, digest: &Digest) -> Result<()> {
        self.0.send(&SyncMessage::ContentRequest(*digest))
    }
}

/// Result of a [`ContentStore::get`].
#[derive(Debug, Clone)]
pub enum Lookup {
    Ready(Arc<SongInfo>),
    /// Not cached; the content may have been requested.
    Pending,
}

/// Two-tier content-addressed store.
#[derive(Default)]
pub struct ContentStore {
    memory: DashMap<Digest, Arc<SongInfo>>,
    dir: Option<PathBuf>,
    /// Digests with a request in flight.
    requested: DashSet<Digest>,
    puller: RwLock<Option<Arc<dyn ContentPuller>>>,
}

impl ContentStore {
    /// Memory-only store.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store persisting to `dir`; the directory is created on first write.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::default()
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Register where missing content is requested from.
    pub fn set_puller(&self, puller: Arc<dyn ContentPuller>) {
        let mut slot = self.puller.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(puller);
        self.requested.clear();
    }

    /// Drop the puller, e.g. after the conductor went away.
    pub fn clear_puller(&self) {
        let mut slot = self.puller.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
        self.requested.clear();
    }

    /// Look up `digest` in memory, then on disk. On a miss with `request`
    /// set, ask the puller for it once; repeated misses do not re-request
    /// until the content arrives.
    pub fn get(&self, digest: &Digest, request: bool) -> Lookup {
        if let Some(song) = self.memory.get(digest) {
            return Lookup::Ready(Arc::clone(song.value()));
        }
        if let Some(song) = self.load_file(digest) {
            let song = Arc::new(song);
            self.memory.insert(*digest, Arc::clone(&song));
            return Lookup::Ready(song);
        }
        if request {
            self.request(digest);
        }
        Lookup::Pending
    }

    /// Verify and store bytes received for `digest`.
    ///
    /// A digest mismatch or unparsable sequence is an error and leaves the
    /// store unchanged, apart from allowing `digest` to be requested again.
    /// Failing to write the file is only logged.
    pub fn put(&self, digest: Digest, bytes: impl Into<Arc<[u8]>>) -> Result<Arc<SongInfo>> {
        self.requested.remove(&digest);
        let song = Arc::new(SongInfo::verified(digest, bytes, digest.to_hex())?);
        self.memory.insert(digest, Arc::clone(&song));

        if let Some(path) = self.file_path(&digest) {
            if let Err(e) = write_file(&path, song.bytes()) {
                log::warn!("[STORE] Failed to cache {} at {}: {}", digest, path.display(), e);
            }
        }
        log::debug!("[STORE] Stored {} ({} bytes)", digest, song.bytes().len());
        Ok(song)
    }

    /// Allow the next miss on `digest` to request it again.
    pub fn forget_request(&self, digest: &Digest) {
        self.requested.remove(digest);
    }

    /// Seed the memory tier with an already verified song.
    pub fn insert(&self, song: Arc<SongInfo>) {
        self.memory.insert(song.digest(), song);
    }

    /// True if the memory tier holds `digest`.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.memory.contains_key(digest)
    }

    /// Forget `digest` in both tiers.
    pub fn invalidate(&self, digest: &Digest) {
        self.memory.remove(digest);
        let Some(path) = self.file_path(digest) else {
            return;
        };
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("[STORE] Failed to remove {}: {}", path.display(), e),
        }
    }

    /// Digests cached on disk.
    pub fn cached_digests(&self) -> Result<Vec<Digest>> {
        let Some(dir) = &self.dir else {
            return Ok(Vec::new());
        };
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut digests = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(digest) = entry.file_name().to_str().and_then(Digest::from_hex) {
                digests.push(digest);
            }
        }
        digests.sort();
        Ok(digests)
    }

    fn request(&self, digest: &Digest) {
        let puller = self
            .puller
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let Some(puller) = puller else {
            log::debug!("[STORE] {} missing and nobody to ask", digest);
            return;
        };
        if !self.requested.insert(*digest) {
            return;
        }
        log::debug!("[STORE] Requesting {}", digest);
        if let Err(e) = puller.pull(digest) {
            log::warn!("[STORE] Request for {} failed: {}", digest, e);
            self.requested.remove(digest);
        }
    }

    fn file_path(&self, digest: &Digest) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(digest.to_hex()))
    }

    fn load_file(&self, digest: &Digest) -> Option<SongInfo> {
        let path = self.file_path(digest)?;
        let bytes = fs::read(&path).ok()?;
        if Digest::of(&bytes) != *digest {
            log::warn!("[STORE] Removing corrupt cache file {}", path.display());
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("[STORE] Failed to remove {}: {}", path.display(), e);
            }
            return None;
        }
        match SongInfo::from_bytes(bytes, digest.to_hex()) {
            Ok(song) => Some(song),
            Err(e) => {
                log::warn!("[STORE] Cached {} is not a playable sequence: {}", digest, e);
                None
            }
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)
}
