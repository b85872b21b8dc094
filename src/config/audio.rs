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
use std::{error::Error, time::Duration};

use duration_string::DurationString;
use serde::Deserialize;

const DEFAULT_BUFFER_LATENCY: Duration = Duration::from_secs(2);
const DEFAULT_GAIN_RAMP: Duration = Duration::from_millis(100);

/// A YAML representation of the audio configuration.
#[derive(Deserialize, Clone)]
pub struct Audio {
    /// The audio device. Names starting with "mock" get a mock device.
    device: String,

    /// How far ahead of the audio clock the first chunk after a reset is scheduled.
    buffer_latency: Option<String>,

    /// How long fades in and out take.
    gain_ramp: Option<String>,
}

impl Audio {
    /// New will create a new Audio configuration.
    pub fn new(device: &str) -> Audio {
        Audio {
            device: device.to_string(),
            buffer_latency: None,
            gain_ramp: None,
        }
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Returns the buffer latency (default: 2s).
    pub fn buffer_latency(&self) -> Result<Duration, Box<dyn Error>> {
        parse_duration(&self.buffer_latency, DEFAULT_BUFFER_LATENCY)
    }

    /// Returns the gain ramp (default: 100ms).
    pub fn gain_ramp(&self) -> Result<Duration, Box<dyn Error>> {
        parse_duration(&self.gain_ramp, DEFAULT_GAIN_RAMP)
    }
}

pub(super) fn parse_duration(
    value: &Option<String>,
    default: Duration,
) -> Result<Duration, Box<dyn Error>> {
    match value {
        Some(value) => Ok(DurationString::from_string(value.clone())?.into()),
        None => Ok(default),
    }
}
