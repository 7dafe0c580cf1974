//! Terminal output for trigger events.

use melodylink_core::{NoteSink, TriggerEvent};
use std::time::Instant;

/// Prints every trigger with the time since the sink was created.
pub struct PrintSink {
    label: String,
    started: Instant,
}

impl PrintSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            started: Instant::now(),
        }
    }
}

impl NoteSink for PrintSink {
    fn emit(&mut self, event: TriggerEvent) {
        println!(
            "{:>9.3}s {:<10} {:<14} pitch {:.3} vol {:.2} pan {:+}",
            self.started.elapsed().as_secs_f64(),
            self.label,
            event.sound_id(),
            event.pitch,
            event.volume,
            event.pan
        );
    }
}
