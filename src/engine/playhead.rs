// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::time::Duration;

use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};
use tracing::{debug, span, Instrument, Level};

use super::Tick;
use crate::prompts::sequencer::STEPS;

/// The tempo the playhead runs at when the model picks its own.
pub const DEFAULT_BPM: u32 = 120;

/// The time between two sixteenth notes.
pub fn step_interval(bpm: u32) -> Duration {
    Duration::from_secs_f64(60.0 / bpm.max(1) as f64 / 4.0)
}

/// Moves the sequencer playhead along while audio is playing. At most one timer task exists at a
/// time; it is replaced only when the tempo or the running flag changes.
#[derive(Default)]
pub struct Playhead {
    /// The tempo of the running timer, None when stopped.
    running_at: Option<u32>,
    /// Identifies the current timer. Ticks from older timers carry an older epoch.
    epoch: u64,
    handle: Option<JoinHandle<()>>,
}

impl Playhead {
    pub fn new() -> Playhead {
        Playhead::default()
    }

    /// Starts, restarts or stops the timer to match the given state. Returns true if the timer
    /// changed.
    pub fn sync(&mut self, running: bool, bpm: Option<u32>, ticks_tx: &UnboundedSender<Tick>) -> bool {
        let running_at = running.then(|| bpm.unwrap_or(DEFAULT_BPM));
        if running_at == self.running_at {
            return false;
        }

        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.running_at = running_at;
        self.epoch += 1;

        let Some(bpm) = running_at else {
            debug!(epoch = self.epoch, "Playhead stopped.");
            return true;
        };

        let epoch = self.epoch;
        let ticks_tx = ticks_tx.clone();
        debug!(epoch, bpm, "Playhead started.");
        self.handle = Some(tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(step_interval(bpm));
                let mut step = 0;
                loop {
                    interval.tick().await;
                    if ticks_tx.send(Tick::PlayheadStep { epoch, step }).is_err() {
                        return;
                    }
                    step = (step + 1) % STEPS;
                }
            }
            .instrument(span!(Level::DEBUG, "playhead", bpm)),
        ));
        true
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_running(&self) -> bool {
        self.running_at.is_some()
    }
}

impl Drop for Playhead {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
