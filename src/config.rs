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
use std::{error::Error, path::Path, sync::Arc};

use config::{Config, File};
use rand::Rng;
use serde::Deserialize;
use tracing::info;

use crate::{
    audio::scheduler::AudioScheduler,
    controller::{keyboard, Controller},
    prompts::PromptStore,
    session::{json, GenerationConfig},
};

mod audio;
mod error;
mod generation;
mod session;

pub use audio::Audio;
pub use error::ConfigError;
pub use generation::Generation;
pub use session::Session;

/// A prompt to start with.
#[derive(Deserialize, Clone)]
pub struct Prompt {
    text: String,
    /// Defaults to 0, inactive.
    weight: Option<f32>,
    color: Option<String>,
}

/// The configuration for the engine.
#[derive(Deserialize)]
pub struct Engine {
    /// The audio output.
    audio: Audio,
    /// The generation service.
    #[serde(default)]
    session: Session,
    /// The starting generation settings.
    #[serde(default)]
    generation: Generation,
    /// The prompts to start with. The default genre list is used when unset.
    prompts: Option<Vec<Prompt>>,
    /// The starting weight of the sequencer prompt.
    sequencer_weight: Option<f32>,
}

impl Engine {
    /// Parse the engine configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Engine, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Engine>()?)
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The starting generation settings, range checked.
    pub fn generation_config(&self) -> Result<GenerationConfig, ConfigError> {
        Ok(self.generation.to_generation_config()?)
    }

    /// Builds the prompt store with the configured prompts, or the defaults if there are none.
    pub fn prompt_store<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<PromptStore, ConfigError> {
        let mut store = match &self.prompts {
            Some(prompts) => {
                let mut store = PromptStore::new();
                for prompt in prompts {
                    store
                        .add_weighted(
                            &prompt.text,
                            prompt.weight.unwrap_or(0.0),
                            prompt.color.as_deref().unwrap_or_default(),
                        )
                        .map_err(|source| ConfigError::Prompt {
                            text: prompt.text.clone(),
                            source,
                        })?;
                }
                store
            }
            None => PromptStore::with_defaults(rng),
        };
        if let Some(weight) = self.sequencer_weight {
            store
                .set_sequencer_weight(weight)
                .map_err(ConfigError::SequencerWeight)?;
        }
        Ok(store)
    }
}

/// Initializes the engine and the keyboard controller from the given config file. The controller
/// owns the engine, which can be waited on until it exits.
pub fn init_controller(path: &Path) -> Result<Controller, Box<dyn Error>> {
    let config = Engine::deserialize(path)?;
    let context = crate::audio::get_context(config.audio())?;
    info!(context = %context, "Audio context ready.");

    let scheduler = AudioScheduler::new(
        context,
        config.audio().buffer_latency()?,
        config.audio().gain_ramp()?,
    );
    let store = config.prompt_store(&mut rand::thread_rng())?;
    let generation = config.generation_config()?;
    let engine = crate::engine::Engine::new(
        json::Connector::new(config.session().address()),
        scheduler,
        store,
        generation.clone(),
        config.session().model(),
        config.session().sync_interval()?,
    );

    let driver = Arc::new(keyboard::Driver::new(engine.subscribe_render(), generation));
    Controller::new(engine, driver)
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs, time::Duration};

    use rand::{rngs::StdRng, SeedableRng};

    use super::Engine;

    #[test]
    fn test_full_config() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("promptdj.yaml");
        fs::write(
            &path,
            r##"
audio:
  device: mock-device
  buffer_latency: 1s
session:
  address: 127.0.0.1:9100
  model: models/test
generation:
  bpm: 110
sequencer_weight: 0.5
prompts:
  - text: Funk
    weight: 1.0
    color: "#2af6de"
  - text: Shoegaze
"##,
        )?;

        let config = Engine::deserialize(&path)?;
        assert_eq!("mock-device", config.audio().device());
        assert_eq!(Duration::from_secs(1), config.audio().buffer_latency()?);
        assert_eq!("127.0.0.1:9100", config.session().address());
        assert_eq!("models/test", config.session().model());
        assert_eq!(Some(110), config.generation_config()?.bpm);

        let store = config.prompt_store(&mut StdRng::seed_from_u64(1))?;
        let snapshot = store.snapshot();
        assert_eq!(2, snapshot.len());
        assert_eq!("#2af6de", snapshot[0].color);
        assert_eq!(0.0, snapshot[1].weight);
        assert_eq!(0.5, store.sequencer_weight());
        assert_eq!(1, store.payload().len());
        Ok(())
    }

    #[test]
    fn test_minimal_config_uses_defaults() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("promptdj.yaml");
        fs::write(&path, "audio:\n  device: mock-device\n")?;

        let config = Engine::deserialize(&path)?;
        assert_eq!("127.0.0.1:9000", config.session().address());
        assert_eq!(Duration::from_millis(200), config.session().sync_interval()?);

        let store = config.prompt_store(&mut StdRng::seed_from_u64(1))?;
        assert_eq!(16, store.snapshot().len());
        assert_eq!(3, store.payload().len());
        Ok(())
    }

    #[test]
    fn test_empty_prompt_is_rejected() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("promptdj.yaml");
        fs::write(
            &path,
            "audio:\n  device: mock-device\nprompts:\n  - text: \"\"\n",
        )?;

        let config = Engine::deserialize(&path)?;
        assert!(config.prompt_store(&mut StdRng::seed_from_u64(1)).is_err());
        Ok(())
    }

    #[test]
    fn test_missing_audio_is_an_error() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("promptdj.yaml");
        fs::write(&path, "sequencer_weight: 1.0\n")?;
        assert!(Engine::deserialize(&path).is_err());
        Ok(())
    }
}
