//! Trigger events and the sinks that receive them.

use crate::catalog::Timbre;
use crate::pitch;
use crossbeam_channel::Sender;

/// A single discrete play instruction for the output device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriggerEvent {
    pub timbre: Timbre,
    /// Two-octave register selecting the warped timbre variant.
    pub register: i8,
    /// Playback ratio within the playable window.
    pub pitch: f32,
    /// Volume in `[0, 1]`.
    pub volume: f32,
    /// Pan offset from center, `-64..=63`.
    pub pan: i8,
}

impl TriggerEvent {
    /// Quantize `key` shifted by `cents` and build the resulting trigger.
    pub fn new(timbre: Timbre, key: i32, cents: i32, volume: f32, pan: i8) -> Self {
        let q = pitch::quantize(key, cents);
        Self {
            timbre,
            register: q.register.clamp(i8::MIN as i32, i8::MAX as i32) as i8,
            pitch: q.ratio,
            volume: volume.clamp(0.0, 1.0),
            pan,
        }
    }

    /// Octave-warped sound identifier, e.g. `harp_-1`.
    pub fn sound_id(&self) -> String {
        pitch::warped_name(self.timbre.name(), self.register as i32)
    }
}

/// Receiver of trigger events.
pub trait NoteSink {
    /// Play one trigger event.
    fn emit(&mut self, event: TriggerEvent);
}

impl NoteSink for Vec<TriggerEvent> {
    fn emit(&mut self, event: TriggerEvent) {
        self.push(event);
    }
}

impl<S: NoteSink + ?Sized> NoteSink for Box<S> {
    fn emit(&mut self, event: TriggerEvent) {
        (**self).emit(event);
    }
}

/// Forwards triggers to another thread; a disconnected receiver drops them.
impl NoteSink for Sender<TriggerEvent> {
    fn emit(&mut self, event: TriggerEvent) {
        if self.send(event).is_err() {
            log::trace!("[SYNTH] Trigger receiver gone, dropping event");
        }
    }
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl NoteSink for NullSink {
    fn emit(&mut self, _event: TriggerEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sound_id_carries_register() {
        let low = TriggerEvent::new(Timbre::Flute, 12, 0, 0.5, 0);
        assert_eq!(low.register, -1);
        assert_eq!(low.sound_id(), "flute_-1");

        let mid = TriggerEvent::new(Timbre::Flute, 45, 0, 0.5, 0);
        assert_eq!(mid.sound_id(), "flute");
    }

    #[test]
    fn test_volume_is_clamped() {
        let event = TriggerEvent::new(Timbre::Harp, 45, 0, 1.7, -3);
        assert_eq!(event.volume, 1.0);
        assert_eq!(event.pan, -3);
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = tx;
        sink.emit(TriggerEvent::new(Timbre::Bell, 40, 0, 0.2, 0));
        assert_eq!(rx.try_recv().unwrap().timbre, Timbre::Bell);
    }
}
