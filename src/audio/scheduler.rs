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
//! Gapless scheduling of streamed chunks onto the audio clock.
//!
//! The scheduler keeps a cursor on the audio clock. The first chunk after a reset anchors the
//! cursor a fixed latency ahead of the clock to absorb network jitter; every chunk after that is
//! placed exactly where the previous one ends. If the clock overtakes the cursor, the stream has
//! starved and the cursor is reset so that the next chunk re-anchors.

use std::{fmt, sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use super::buffer::{self, AudioBuffer, DecodeError};
use super::Context;

/// What happened to a chunk handed to the scheduler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScheduleOutcome {
    /// The chunk anchored the cursor and was scheduled. Playback becomes audible once the buffer
    /// latency has elapsed; `generation` identifies this anchor.
    Anchored { generation: u64 },
    /// The chunk was scheduled directly after the previous one.
    Scheduled,
    /// The clock had already passed the cursor. The chunk was dropped and the cursor reset.
    Underrun,
}

/// Schedules decoded chunks back to back on an audio context.
pub struct AudioScheduler {
    context: Arc<dyn Context>,
    /// Where the next buffer starts on the audio clock. Zero means unanchored.
    next_start_time: f64,
    /// Bumped on every reset so that deferred work tied to an older anchor can be recognized.
    generation: u64,
    buffer_latency: Duration,
    gain_ramp: Duration,
}

impl AudioScheduler {
    /// Creates a new scheduler for the given context.
    pub fn new(context: Arc<dyn Context>, buffer_latency: Duration, gain_ramp: Duration) -> Self {
        AudioScheduler {
            context,
            next_start_time: 0.0,
            generation: 0,
            buffer_latency,
            gain_ramp,
        }
    }

    /// Decodes a base64 chunk and schedules it. A chunk that fails to decode is not scheduled and
    /// leaves the cursor untouched.
    pub fn schedule_chunk(&mut self, data: &str) -> Result<ScheduleOutcome, DecodeError> {
        let buffer = buffer::decode_chunk(data, buffer::SAMPLE_RATE, buffer::CHANNELS)?;
        Ok(self.schedule_buffer(buffer))
    }

    /// Schedules a decoded buffer according to the cursor policy.
    pub fn schedule_buffer(&mut self, buffer: AudioBuffer) -> ScheduleOutcome {
        let now = self.context.current_time();

        let outcome = if self.next_start_time == 0.0 {
            self.next_start_time = now + self.buffer_latency.as_secs_f64();
            info!(
                anchor = self.next_start_time,
                generation = self.generation,
                "Anchored playback cursor."
            );
            ScheduleOutcome::Anchored {
                generation: self.generation,
            }
        } else if self.next_start_time < now {
            warn!(
                cursor = self.next_start_time,
                now, "Audio underrun, rebuffering."
            );
            self.reset();
            return ScheduleOutcome::Underrun;
        } else {
            ScheduleOutcome::Scheduled
        };

        let duration = buffer.duration();
        debug!(start = self.next_start_time, duration, "Scheduling buffer.");
        self.context.start(Arc::new(buffer), self.next_start_time);
        self.next_start_time += duration;
        outcome
    }

    /// Unanchors the cursor. Everything already scheduled ends at or before the old cursor.
    pub fn reset(&mut self) {
        self.next_start_time = 0.0;
        self.generation += 1;
    }

    /// The current cursor. Zero means unanchored.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// The generation of the current anchor.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// How long after anchoring playback becomes audible.
    pub fn buffer_latency(&self) -> Duration {
        self.buffer_latency
    }

    /// Starts the clock and fades the output in.
    pub fn fade_in(&self) {
        self.context.resume();
        self.context.ramp_gain(0.0, 1.0, self.gain_ramp);
    }

    /// Fades the output to silence, unanchors the cursor and swaps in a fresh output node so that
    /// nothing scheduled before now can be heard after the next fade in.
    pub fn fade_out(&mut self) {
        self.context.ramp_gain(1.0, 0.0, self.gain_ramp);
        self.reset();
        self.context.replace_output();
    }
}

impl fmt::Display for AudioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scheduler on {} (cursor={:.3}, generation={})",
            self.context, self.next_start_time, self.generation
        )
    }
}
