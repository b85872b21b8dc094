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
use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

use super::buffer::{CHANNELS, SAMPLE_RATE};
use super::graph::Graph;

/// A mock context. Doesn't play anything; its clock only moves when advanced explicitly.
pub struct Context {
    name: String,
    graph: Mutex<Graph>,
}

impl Context {
    /// Gets the given mock context.
    pub fn get(name: &str) -> Context {
        Context {
            name: name.to_string(),
            graph: Mutex::new(Graph::new(SAMPLE_RATE, CHANNELS)),
        }
    }

    /// Renders the given number of seconds of audio, advancing the clock if it is running.
    /// Returns the interleaved rendered output.
    pub fn advance(&self, seconds: f64) -> Vec<f32> {
        let mut graph = self.graph.lock();
        let channels = graph.channels() as usize;
        let frames = (seconds * graph.sample_rate() as f64).round() as usize;
        let mut out = vec![0.0; frames * channels];
        graph.render(&mut out, channels);
        debug!(
            context = self.name,
            time = graph.current_time(),
            "Advanced mock clock."
        );
        out
    }

    /// Returns true if the clock is running.
    pub fn is_running(&self) -> bool {
        self.graph.lock().is_running()
    }

    /// The (start, end) times of every buffer that hasn't finished playing.
    pub fn scheduled(&self) -> Vec<(f64, f64)> {
        self.graph.lock().scheduled()
    }

    /// The gain of the current output node right now.
    pub fn output_gain(&self) -> f32 {
        self.graph.lock().output_gain()
    }

    /// The id of the current output node.
    pub fn output(&self) -> super::graph::NodeId {
        self.graph.lock().output()
    }
}

impl super::Context for Context {
    fn graph(&self) -> &Mutex<Graph> {
        &self.graph
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
