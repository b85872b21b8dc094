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
//! The authoritative set of weighted prompts.
//!
//! The store hands out immutable snapshots of the prompt list. Every mutation produces a new
//! snapshot, so anything holding an older one keeps a consistent view.
use std::{collections::BTreeSet, sync::Arc};

use rand::Rng;
use serde::Serialize;
use tracing::debug;

pub mod sequencer;

pub use sequencer::{SequencerGrid, StepOutOfRange, SEQUENCER_PROMPT_ID};

/// Prompts offered when nothing is configured.
const DEFAULT_PROMPTS: [(&str, &str); 16] = [
    ("Bossa Nova", "#9900ff"),
    ("Chillwave", "#5200ff"),
    ("Drum and Bass", "#ff25f6"),
    ("Post Punk", "#2af6de"),
    ("Shoegaze", "#ffdd28"),
    ("Funk", "#2af6de"),
    ("Chiptune", "#9900ff"),
    ("Lush Strings", "#3dffab"),
    ("Sparkling Arpeggios", "#d8ff3e"),
    ("Staccato Rhythms", "#d9b2ff"),
    ("Punchy Kick", "#3dffab"),
    ("Dubstep", "#ffdd28"),
    ("K Pop", "#ff25f6"),
    ("Neo Soul", "#d8ff3e"),
    ("Trip Hop", "#5200ff"),
    ("Thrash", "#d9b2ff"),
];

/// How many of the default prompts start out active.
const DEFAULT_ACTIVE: usize = 3;

/// The largest weight a prompt can carry.
pub const MAX_WEIGHT: f32 = 2.0;

/// A text prompt and how strongly it steers the generation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WeightedPrompt {
    pub id: String,
    pub text: String,
    /// 0 is inactive.
    pub weight: f32,
    /// Display tag, never interpreted.
    pub color: String,
}

/// Error types for prompt edits.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PromptError {
    #[error("prompt text cannot be empty")]
    InvalidEdit,

    #[error("prompt weight must be a number")]
    InvalidWeight,

    #[error("no prompt with id {0}")]
    UnknownPrompt(String),

    #[error(transparent)]
    Step(#[from] StepOutOfRange),
}

/// Computes the prompts to send: every active prompt whose text hasn't been filtered, in
/// insertion order, followed by the sequencer prompt when the grid is audible.
pub fn compute_payload(
    prompts: &[WeightedPrompt],
    filtered: &BTreeSet<String>,
    grid: &SequencerGrid,
    sequencer_weight: f32,
) -> Vec<WeightedPrompt> {
    prompts
        .iter()
        .filter(|prompt| prompt.weight != 0.0 && !filtered.contains(&prompt.text))
        .cloned()
        .chain(grid.prompt(sequencer_weight))
        .collect()
}

fn check_weight(weight: f32) -> Result<f32, PromptError> {
    if weight.is_finite() {
        Ok(weight)
    } else {
        Err(PromptError::InvalidWeight)
    }
}

/// Owns the prompts, the texts the service refused and the sequencer grid.
pub struct PromptStore {
    prompts: Arc<Vec<WeightedPrompt>>,
    next_id: u64,
    filtered: BTreeSet<String>,
    grid: SequencerGrid,
    sequencer_weight: f32,
}

impl Default for PromptStore {
    fn default() -> Self {
        PromptStore::new()
    }
}

impl PromptStore {
    /// Creates an empty store.
    pub fn new() -> PromptStore {
        PromptStore {
            prompts: Arc::new(Vec::new()),
            next_id: 0,
            filtered: BTreeSet::new(),
            grid: SequencerGrid::default(),
            sequencer_weight: 1.0,
        }
    }

    /// Creates a store holding the default prompts, with a few chosen at random to start active.
    pub fn with_defaults<R: Rng + ?Sized>(rng: &mut R) -> PromptStore {
        let mut store = PromptStore::new();
        let active = rand::seq::index::sample(rng, DEFAULT_PROMPTS.len(), DEFAULT_ACTIVE);
        for (i, (text, color)) in DEFAULT_PROMPTS.iter().enumerate() {
            let weight = if active.iter().any(|index| index == i) {
                1.0
            } else {
                0.0
            };
            store.push(text, weight, color);
        }
        store
    }

    fn push(&mut self, text: &str, weight: f32, color: &str) -> String {
        let id = format!("prompt-{}", self.next_id);
        self.next_id += 1;
        Arc::make_mut(&mut self.prompts).push(WeightedPrompt {
            id: id.clone(),
            text: text.to_string(),
            weight: weight.clamp(0.0, MAX_WEIGHT),
            color: color.to_string(),
        });
        id
    }

    /// Adds an inactive prompt and returns its id.
    pub fn add(&mut self, text: &str, color: &str) -> Result<String, PromptError> {
        self.add_weighted(text, 0.0, color)
    }

    /// Adds a prompt with the given weight and returns its id.
    pub fn add_weighted(
        &mut self,
        text: &str,
        weight: f32,
        color: &str,
    ) -> Result<String, PromptError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PromptError::InvalidEdit);
        }
        Ok(self.push(text, check_weight(weight)?, color))
    }

    /// Edits a prompt in place. Empty text or a weight that isn't a number is rejected and leaves
    /// the prompt untouched; other weights are clamped to [0, 2].
    pub fn edit(
        &mut self,
        id: &str,
        text: Option<&str>,
        weight: Option<f32>,
    ) -> Result<(), PromptError> {
        let index = self.index_of(id)?;
        let text = match text.map(str::trim) {
            Some("") => {
                debug!(id, "Rejected empty prompt text.");
                return Err(PromptError::InvalidEdit);
            }
            other => other,
        };
        let weight = weight.map(check_weight).transpose()?;

        let prompt = &mut Arc::make_mut(&mut self.prompts)[index];
        if let Some(text) = text {
            prompt.text = text.to_string();
        }
        if let Some(weight) = weight {
            prompt.weight = weight.clamp(0.0, MAX_WEIGHT);
        }
        Ok(())
    }

    /// Removes a prompt.
    pub fn remove(&mut self, id: &str) -> Result<WeightedPrompt, PromptError> {
        let index = self.index_of(id)?;
        Ok(Arc::make_mut(&mut self.prompts).remove(index))
    }

    fn index_of(&self, id: &str) -> Result<usize, PromptError> {
        self.prompts
            .iter()
            .position(|prompt| prompt.id == id)
            .ok_or_else(|| PromptError::UnknownPrompt(id.to_string()))
    }

    /// The current prompts, in insertion order.
    pub fn snapshot(&self) -> Arc<Vec<WeightedPrompt>> {
        self.prompts.clone()
    }

    pub fn grid(&self) -> &SequencerGrid {
        &self.grid
    }

    pub fn set_grid(&mut self, grid: SequencerGrid) {
        self.grid = grid;
    }

    /// Flips a sequencer step and returns its new value.
    pub fn toggle_step(&mut self, track: usize, step: usize) -> Result<bool, PromptError> {
        Ok(self.grid.toggle(track, step)?)
    }

    pub fn sequencer_weight(&self) -> f32 {
        self.sequencer_weight
    }

    /// Sets the sequencer prompt's weight, clamped to [0, 2].
    pub fn set_sequencer_weight(&mut self, weight: f32) -> Result<(), PromptError> {
        self.sequencer_weight = check_weight(weight)?.clamp(0.0, MAX_WEIGHT);
        Ok(())
    }

    /// Marks a text as refused by the service. Returns false if it already was.
    pub fn filter(&mut self, text: &str) -> bool {
        self.filtered.insert(text.to_string())
    }

    /// Forgets every refused text. A new session starts with a clean slate.
    pub fn clear_filtered(&mut self) {
        self.filtered.clear();
    }

    pub fn is_filtered(&self, prompt: &WeightedPrompt) -> bool {
        self.filtered.contains(&prompt.text)
    }

    pub fn filtered(&self) -> &BTreeSet<String> {
        &self.filtered
    }

    /// The prompts to send to the service right now.
    pub fn payload(&self) -> Vec<WeightedPrompt> {
        compute_payload(
            &self.prompts,
            &self.filtered,
            &self.grid,
            self.sequencer_weight,
        )
    }
}
