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
use serde::Deserialize;

use crate::session::{GenerationConfig, GenerationConfigError, Scale};

/// The starting generation settings. Anything left out uses the service's defaults.
#[derive(Deserialize, Clone, Default)]
pub struct Generation {
    temperature: Option<f32>,
    top_k: Option<u32>,
    guidance: Option<f32>,
    seed: Option<u32>,
    bpm: Option<u32>,
    density: Option<f32>,
    brightness: Option<f32>,
    scale: Option<Scale>,
    mute_bass: Option<bool>,
    mute_drums: Option<bool>,
    only_bass_and_drums: Option<bool>,
}

impl Generation {
    /// Converts to the settings sent to the service, checking every range.
    pub fn to_generation_config(&self) -> Result<GenerationConfig, GenerationConfigError> {
        let defaults = GenerationConfig::default();
        let config = GenerationConfig {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_k: self.top_k.unwrap_or(defaults.top_k),
            guidance: self.guidance.unwrap_or(defaults.guidance),
            seed: self.seed,
            bpm: self.bpm,
            density: self.density,
            brightness: self.brightness,
            scale: self.scale,
            mute_bass: self.mute_bass,
            mute_drums: self.mute_drums,
            only_bass_and_drums: self.only_bass_and_drums,
        };
        config.validate()?;
        Ok(config)
    }
}
