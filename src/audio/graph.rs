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
// Output graph rendering that can be used by both CPAL and mock contexts.
use std::sync::Arc;
use std::time::Duration;

use super::buffer::AudioBuffer;

/// Identifies a gain node in the graph.
pub type NodeId = u64;

/// A linear gain ramp between two frames on the graph clock.
#[derive(Clone, Copy, Debug)]
struct Ramp {
    from: f32,
    to: f32,
    start: u64,
    end: u64,
}

/// A gain stage that buffers are connected to.
struct GainNode {
    id: NodeId,
    /// The settled gain value once any ramp has finished.
    value: f32,
    ramp: Option<Ramp>,
    /// Retired nodes are disconnected from the output once their ramp finishes.
    retired: bool,
}

impl GainNode {
    fn new(id: NodeId) -> GainNode {
        GainNode {
            id,
            value: 1.0,
            ramp: None,
            retired: false,
        }
    }

    #[inline]
    fn gain_at(&self, frame: u64) -> f32 {
        match self.ramp {
            Some(ramp) if frame <= ramp.start => ramp.from,
            Some(ramp) if frame < ramp.end => {
                let progress = (frame - ramp.start) as f32 / (ramp.end - ramp.start) as f32;
                ramp.from + (ramp.to - ramp.from) * progress
            }
            Some(ramp) => ramp.to,
            None => self.value,
        }
    }
}

/// A buffer scheduled to start at an exact frame.
struct Source {
    node: NodeId,
    start: u64,
    /// Length in graph frames, after any rate conversion.
    length: u64,
    buffer: Arc<AudioBuffer>,
}

impl Source {
    #[inline]
    fn end(&self) -> u64 {
        self.start + self.length
    }

    /// Maps a graph frame onto a frame of the source buffer (nearest neighbour).
    #[inline]
    fn buffer_frame(&self, frame: u64, graph_rate: u32) -> usize {
        let offset = frame - self.start;
        let buffer_rate = self.buffer.sample_rate();
        let index = if buffer_rate == graph_rate {
            offset as usize
        } else {
            (offset * buffer_rate as u64 / graph_rate as u64) as usize
        };
        index.min(self.buffer.frames().saturating_sub(1))
    }
}

/// The render graph: a frame clock, gain nodes, and scheduled buffer sources. Rendering advances
/// the clock; a suspended graph renders silence and its clock stands still.
pub struct Graph {
    sample_rate: u32,
    channels: u16,
    /// The clock, in frames rendered while running.
    frame: u64,
    running: bool,
    nodes: Vec<GainNode>,
    current: NodeId,
    next_node_id: NodeId,
    sources: Vec<Source>,
}

impl Graph {
    /// Creates a new, suspended graph with a single output node at unity gain.
    pub fn new(sample_rate: u32, channels: u16) -> Graph {
        Graph {
            sample_rate,
            channels,
            frame: 0,
            running: false,
            nodes: vec![GainNode::new(0)],
            current: 0,
            next_node_id: 1,
            sources: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// The current clock time in seconds.
    pub fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts the clock.
    pub fn resume(&mut self) {
        self.running = true;
    }

    /// The node new buffers are connected to.
    pub fn output(&self) -> NodeId {
        self.current
    }

    /// Retires the current output node and connects a fresh one at unity gain. Buffers scheduled
    /// on the old node are disposed with it once its gain ramp settles.
    pub fn replace_output(&mut self) -> NodeId {
        let current = self.current;
        if let Some(node) = self.nodes.iter_mut().find(|node| node.id == current) {
            node.retired = true;
        }

        let id = self.next_node_id;
        self.next_node_id += 1;
        self.nodes.push(GainNode::new(id));
        self.current = id;
        self.collect();
        id
    }

    /// Sets the current node to `from` now and ramps it linearly to `to` over the given duration.
    pub fn ramp_gain(&mut self, from: f32, to: f32, over: Duration) {
        let start = self.frame;
        let end = start + self.frames_for(over.as_secs_f64());
        let current = self.current;
        if let Some(node) = self.nodes.iter_mut().find(|node| node.id == current) {
            node.value = to;
            node.ramp = if end > start {
                Some(Ramp {
                    from,
                    to,
                    start,
                    end,
                })
            } else {
                None
            };
        }
    }

    /// The gain of the current output node at the current clock time.
    pub fn output_gain(&self) -> f32 {
        self.nodes
            .iter()
            .find(|node| node.id == self.current)
            .map(|node| node.gain_at(self.frame))
            .unwrap_or(0.0)
    }

    /// Schedules the buffer on the current output node to start at the given clock time.
    pub fn start(&mut self, buffer: Arc<AudioBuffer>, at: f64) {
        let length = if buffer.sample_rate() == self.sample_rate {
            buffer.frames() as u64
        } else {
            (buffer.frames() as u64 * self.sample_rate as u64).div_ceil(buffer.sample_rate() as u64)
        };
        if length == 0 {
            return;
        }

        self.sources.push(Source {
            node: self.current,
            start: self.frames_for(at),
            length,
            buffer,
        });
    }

    /// The (start, end) times in seconds of all sources that have not finished playing.
    pub fn scheduled(&self) -> Vec<(f64, f64)> {
        let rate = self.sample_rate as f64;
        self.sources
            .iter()
            .map(|source| (source.start as f64 / rate, source.end() as f64 / rate))
            .collect()
    }

    /// Renders interleaved output for the given channel count, advancing the clock by the number
    /// of frames written. Renders silence without advancing when suspended.
    pub fn render(&mut self, out: &mut [f32], out_channels: usize) {
        out.fill(0.0);
        if !self.running || out_channels == 0 {
            return;
        }

        let block_start = self.frame;
        let block_end = block_start + (out.len() / out_channels) as u64;

        for source in self.sources.iter() {
            let Some(node) = self.nodes.iter().find(|node| node.id == source.node) else {
                continue;
            };

            let from = source.start.max(block_start);
            let to = source.end().min(block_end);
            let source_channels = source.buffer.channels() as usize;

            for frame in from..to {
                let gain = node.gain_at(frame);
                if gain == 0.0 {
                    continue;
                }
                let buffer_frame = source.buffer_frame(frame, self.sample_rate);
                let offset = (frame - block_start) as usize * out_channels;
                for (channel, sample) in out[offset..offset + out_channels].iter_mut().enumerate() {
                    *sample += source.buffer.sample(buffer_frame, channel % source_channels) * gain;
                }
            }
        }

        self.frame = block_end;
        self.collect();
    }

    /// Disposes of finished sources, settles completed ramps, and disconnects retired nodes.
    fn collect(&mut self) {
        let now = self.frame;
        self.sources.retain(|source| source.end() > now);

        for node in self.nodes.iter_mut() {
            if node.ramp.is_some_and(|ramp| ramp.end <= now) {
                node.ramp = None;
            }
        }

        self.nodes
            .retain(|node| !node.retired || node.ramp.is_some());
        let nodes = &self.nodes;
        self.sources
            .retain(|source| nodes.iter().any(|node| node.id == source.node));
    }

    fn frames_for(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }
}
