//! Transport seam between a conductor and its listeners.
//!
//! The transport is assumed reliable, ordered and message-oriented. The
//! core only needs to push encoded frames at a peer; inbound frames are fed
//! to [`Conductor::handle`](crate::conductor::Conductor::handle) or
//! [`Listener::handle`](crate::listener::Listener::handle) by whoever owns
//! the connection.

use crate::error::{Error, Result};
use crate::protocol::SyncMessage;
use crossbeam_channel::{Receiver, Sender};

/// Identifies a connected listener on the conductor side.
pub type PeerId = u64;

/// Outbound half of a connection.
pub trait PeerLink {
    fn send(&self, message: &SyncMessage) -> Result<()>;
}

impl<L: PeerLink + ?Sized> PeerLink for std::sync::Arc<L> {
    fn send(&self, message: &SyncMessage) -> Result<()> {
        (**self).send(message)
    }
}

impl<L: PeerLink + ?Sized> PeerLink for Box<L> {
    fn send(&self, message: &SyncMessage) -> Result<()> {
        (**self).send(message)
    }
}

/// In-process link carrying encoded frames over a channel.
#[derive(Clone, Debug)]
pub struct ChannelLink {
    tx: Sender<Vec<u8>>,
}

impl ChannelLink {
    pub fn new(tx: Sender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

impl PeerLink for ChannelLink {
    fn send(&self, message: &SyncMessage) -> Result<()> {
        let frame = message.encode()?;
        self.tx.send(frame).map_err(|_| Error::RuntimeClosed)
    }
}

/// A link and the receiver its frames arrive on.
pub fn channel_link() -> (ChannelLink, Receiver<Vec<u8>>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (ChannelLink::new(tx), rx)
}

/// Link that keeps every sent message, for tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub(crate) struct RecordingLink(pub(crate) Arc<Mutex<Vec<SyncMessage>>>);

    impl RecordingLink {
        /// Take everything sent so far.
        pub(crate) fn take(&self) -> Vec<SyncMessage> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl PeerLink for RecordingLink {
        fn send(&self, message: &SyncMessage) -> Result<()> {
            // Round-trip through the codec so tests see what a peer would.
            let decoded = SyncMessage::decode(&message.encode()?)?;
            self.0.lock().unwrap().push(decoded);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_link_sends_frames() {
        let (link, rx) = channel_link();
        link.send(&SyncMessage::Hello).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![0x00]);

        drop(rx);
        assert!(matches!(link.send(&SyncMessage::Hello), Err(Error::RuntimeClosed)));
    }
}
