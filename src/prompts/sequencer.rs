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
//! The step sequencer grid and the prompt it is described by.
use serde::Serialize;

use super::WeightedPrompt;

/// The number of drum tracks.
pub const TRACKS: usize = 6;

/// The number of sixteenth note steps in one bar.
pub const STEPS: usize = 16;

/// The id of the prompt derived from the grid.
pub const SEQUENCER_PROMPT_ID: &str = "prompt-sequencer";

const PREAMBLE: &str = "A tight drum machine groove featuring";

const TRACK_NAMES: [&str; TRACKS] = [
    "kick",
    "snare",
    "closed hi-hat",
    "open hi-hat",
    "clap",
    "percussion",
];

const CLAUSES: [&str; TRACKS] = [
    "a deep punchy kick drum",
    "a crisp snare",
    "closed hi-hats",
    "open hi-hats",
    "sharp hand claps",
    "shuffling percussion",
];

/// Error types for grid edits.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("step {track}:{step} is outside of the 6x16 grid")]
pub struct StepOutOfRange {
    pub track: usize,
    pub step: usize,
}

/// A 6 track, 16 step drum grid.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SequencerGrid {
    cells: [[bool; STEPS]; TRACKS],
}

impl SequencerGrid {
    pub fn get(&self, track: usize, step: usize) -> bool {
        self.cells
            .get(track)
            .and_then(|steps| steps.get(step))
            .copied()
            .unwrap_or(false)
    }

    pub fn set(&mut self, track: usize, step: usize, on: bool) -> Result<(), StepOutOfRange> {
        let cell = self
            .cells
            .get_mut(track)
            .and_then(|steps| steps.get_mut(step))
            .ok_or(StepOutOfRange { track, step })?;
        *cell = on;
        Ok(())
    }

    /// Flips a step and returns its new value.
    pub fn toggle(&mut self, track: usize, step: usize) -> Result<bool, StepOutOfRange> {
        let on = !self.get(track, step);
        self.set(track, step, on)?;
        Ok(on)
    }

    /// Indices of tracks with at least one active step, in track order.
    pub fn active_tracks(&self) -> Vec<usize> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, steps)| steps.iter().any(|on| *on))
            .map(|(track, _)| track)
            .collect()
    }

    /// Describes the active tracks, or None if the grid is empty.
    pub fn prompt_text(&self) -> Option<String> {
        let clauses = self
            .active_tracks()
            .into_iter()
            .map(|track| CLAUSES[track])
            .collect::<Vec<_>>();
        if clauses.is_empty() {
            return None;
        }
        Some(format!("{} {}", PREAMBLE, clauses.join(", ")))
    }

    /// The synthetic prompt for this grid at the given weight. Only produced when it would be
    /// audible.
    pub fn prompt(&self, weight: f32) -> Option<WeightedPrompt> {
        if weight.is_nan() || weight <= 0.0 {
            return None;
        }
        self.prompt_text().map(|text| WeightedPrompt {
            id: SEQUENCER_PROMPT_ID.to_string(),
            text,
            weight,
            color: String::new(),
        })
    }

    /// Renders the grid one track per line, with the playhead column marked.
    pub fn render(&self, playhead: Option<usize>) -> String {
        let mut out = String::new();
        for (track, steps) in self.cells.iter().enumerate() {
            out.push_str(&format!("{:>13} ", TRACK_NAMES[track]));
            for (step, on) in steps.iter().enumerate() {
                out.push(match (*on, playhead == Some(step)) {
                    (true, _) => 'x',
                    (false, true) => '|',
                    (false, false) => '.',
                });
            }
            out.push('\n');
        }
        out
    }
}
