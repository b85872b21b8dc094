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

use serde::Deserialize;

use super::audio::parse_duration;
use crate::throttle;

const DEFAULT_ADDRESS: &str = "127.0.0.1:9000";
const DEFAULT_MODEL: &str = "models/lyria-realtime-exp";

/// A YAML representation of the generation service session.
#[derive(Deserialize, Clone, Default)]
pub struct Session {
    /// The host:port the service listens on.
    address: Option<String>,

    /// The model to generate with.
    model: Option<String>,

    /// The minimum time between two prompt updates.
    sync_interval: Option<String>,
}

impl Session {
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(DEFAULT_ADDRESS)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Returns the sync interval (default: 200ms).
    pub fn sync_interval(&self) -> Result<Duration, Box<dyn Error>> {
        parse_duration(&self.sync_interval, throttle::DEFAULT_INTERVAL)
    }
}
