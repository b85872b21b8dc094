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
use std::{error::Error, fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::config;

pub mod buffer;
pub mod cpal;
pub mod graph;
pub mod mock;
pub mod scheduler;

pub use buffer::{AudioBuffer, DecodeError};
pub use graph::Graph;

/// An audio context owns the hardware clock and the output graph that decoded buffers are
/// scheduled onto. Implementations only need to expose their graph; the clock and graph
/// operations are shared.
pub trait Context: fmt::Display + Send + Sync {
    /// The render graph driven by this context.
    fn graph(&self) -> &Mutex<Graph>;

    /// The current time of the audio clock in seconds.
    fn current_time(&self) -> f64 {
        self.graph().lock().current_time()
    }

    /// Starts (or keeps running) the audio clock.
    fn resume(&self) {
        self.graph().lock().resume();
    }

    /// Schedules a buffer on the current output node at the given clock time.
    fn start(&self, buffer: Arc<AudioBuffer>, at: f64) {
        self.graph().lock().start(buffer, at);
    }

    /// Ramps the current output node's gain linearly from `from` to `to`.
    fn ramp_gain(&self, from: f32, to: f32, over: Duration) {
        self.graph().lock().ramp_gain(from, to, over);
    }

    /// Replaces the current output node with a fresh one.
    fn replace_output(&self) {
        self.graph().lock().replace_output();
    }
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<cpal::Device>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets the audio context for the configured device. Devices whose name starts with "mock" get a
/// manually clocked mock context.
pub fn get_context(config: &config::Audio) -> Result<Arc<dyn Context>, Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Context::get(device)));
    }

    Ok(Arc::new(cpal::Device::get(config)?))
}
