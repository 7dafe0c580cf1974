//! melodylink core - MIDI interpretation and playback sync for a bounded set
//! of timbres.
//!
//! This crate provides:
//!
//! - **Catalog** - General MIDI programs and percussion keys mapped to timbres
//! - **Synth** - Channel-voice state machine emitting [`TriggerEvent`]s
//! - **Tuning** - MIDI Tuning Standard tables and their registry
//! - **Sequence** - SMF parsing, tempo maps and a seekable sequencer
//! - **Playback** - A sequencer clock driving a synthesizer, with a playlist
//! - **Store** - Content-addressed cache of song bytes
//! - **Protocol** - Conductor/listener wire messages and reconciliation
//! - **Runtime** - Dedicated threads that own and tick playback state
//!
//! # Architecture
//!
//! Playback state is confined to one runtime thread per controller,
//! conductor or listener. Other threads talk to it through a FIFO task
//! queue; the thread drains the queue and ticks the state every period.
//! Conductor and listener exchange [`SyncMessage`] frames over any
//! [`PeerLink`].

pub mod catalog;
pub mod conductor;
pub mod config;
pub mod error;
pub mod event;
pub mod link;
pub mod listener;
pub mod pitch;
pub mod playback;
pub mod protocol;
pub mod runtime;
pub mod sequence;
pub mod sequencer;
pub mod song;
pub mod store;
pub mod synth;
pub mod trigger;
pub mod tuning;

// Re-export main types for convenience
pub use catalog::{Instrument, InstrumentCatalog, Percussion, Timbre};
pub use conductor::{Conductor, PeerState, SyncSession};
pub use config::Config;
pub use error::{Error, Result};
pub use event::{ChannelEvent, MetaEvent, SequenceEvent};
pub use link::{channel_link, ChannelLink, PeerId, PeerLink};
pub use listener::{needs_drift_correction, Listener};
pub use playback::{PlaybackController, TickOutcome};
pub use protocol::{ContentReply, SyncMessage};
pub use runtime::{
    Actor, ConductorCommand, ListenerCommand, PlaybackCommand, Runtime, RuntimeHandle,
};
pub use sequence::Sequence;
pub use sequencer::Sequencer;
pub use song::{Digest, SongInfo};
pub use store::{ContentStore, Lookup};
pub use synth::{GeneralMidiMode, Synthesizer};
pub use trigger::{NoteSink, NullSink, TriggerEvent};
pub use tuning::{TuningId, TuningRegistry, TuningTable};
