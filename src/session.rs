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
//! The session with the streaming generation service.
//!
//! A [`Connector`] opens a [`Session`]; server events are delivered through the channel handed to
//! `connect`. The engine receives the connector at construction time, so tests can substitute
//! the mock in [`mock`].
use std::{future::Future, io};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;

use crate::prompts::WeightedPrompt;

pub mod json;
pub mod mock;

/// The message the service uses to reject a payload without any active prompts.
pub const NO_ACTIVE_PROMPTS: &str = "There needs to be one active prompt to play.";

/// Error types for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unable to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("session I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("session is closed")]
    Closed,

    #[error("{0}")]
    Rejected(String),

    #[error("unable to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Events delivered by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The service accepted the session setup.
    SetupComplete,
    /// The service refused to use a prompt's text.
    FilteredPrompt { text: String, reason: String },
    /// Base64 encoded PCM chunks, in stream order.
    AudioChunks(Vec<String>),
    /// The transport failed.
    Error(String),
    /// The transport closed.
    Close,
}

/// A message from the service, as it appears on the wire.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    filtered_prompt: Option<FilteredPrompt>,
    server_content: Option<ServerContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilteredPrompt {
    text: String,
    #[serde(default)]
    filtered_reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    audio_chunks: Vec<AudioChunk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioChunk {
    data: String,
    #[serde(default)]
    #[allow(dead_code)]
    mime_type: Option<String>,
}

impl ServerMessage {
    /// Splits the message into the events it carries, in the order the engine should see them.
    pub fn into_events(self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.setup_complete.is_some() {
            events.push(SessionEvent::SetupComplete);
        }
        if let Some(filtered) = self.filtered_prompt {
            events.push(SessionEvent::FilteredPrompt {
                text: filtered.text,
                reason: filtered.filtered_reason,
            });
        }
        if let Some(content) = self.server_content {
            if !content.audio_chunks.is_empty() {
                events.push(SessionEvent::AudioChunks(
                    content
                        .audio_chunks
                        .into_iter()
                        .map(|chunk| chunk.data)
                        .collect(),
                ));
            }
        }
        events
    }
}

/// The musical scales the service can be steered towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scale {
    CMajorAMinor,
    DFlatMajorBFlatMinor,
    DMajorBMinor,
    EFlatMajorCMinor,
    EMajorDFlatMinor,
    FMajorDMinor,
    GFlatMajorEFlatMinor,
    GMajorEMinor,
    AFlatMajorFMinor,
    AMajorGFlatMinor,
    BFlatMajorGMinor,
    BMajorAFlatMinor,
}

/// Error types for generation settings outside of the ranges the service accepts.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GenerationConfigError {
    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Generation settings, in the shape the service expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub guidance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    /// Unset lets the model choose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<u32>,
    /// Unset lets the model choose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density: Option<f32>,
    /// Unset lets the model choose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<Scale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mute_bass: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mute_drums: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_bass_and_drums: Option<bool>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            temperature: 1.1,
            top_k: 40,
            guidance: 4.0,
            seed: None,
            bpm: None,
            density: None,
            brightness: None,
            scale: None,
            mute_bass: None,
            mute_drums: None,
            only_bass_and_drums: None,
        }
    }
}

impl GenerationConfig {
    /// Verifies that every set value is within the service's accepted range.
    pub fn validate(&self) -> Result<(), GenerationConfigError> {
        check_range("temperature", self.temperature as f64, 0.0, 3.0)?;
        check_range("topK", self.top_k as f64, 1.0, 100.0)?;
        check_range("guidance", self.guidance as f64, 0.0, 6.0)?;
        if let Some(bpm) = self.bpm {
            check_range("bpm", bpm as f64, 60.0, 180.0)?;
        }
        if let Some(density) = self.density {
            check_range("density", density as f64, 0.0, 1.0)?;
        }
        if let Some(brightness) = self.brightness {
            check_range("brightness", brightness as f64, 0.0, 1.0)?;
        }
        Ok(())
    }

    /// The service only picks up bpm and scale changes after its context is reset.
    pub fn needs_context_reset(&self, previous: &GenerationConfig) -> bool {
        self.bpm != previous.bpm || self.scale != previous.scale
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), GenerationConfigError> {
    if value.is_nan() || value < min || value > max {
        return Err(GenerationConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Rejects payloads the service refuses before they go out on the wire.
pub fn validate_payload(prompts: &[WeightedPrompt]) -> Result<(), SessionError> {
    if prompts.iter().all(|prompt| prompt.weight == 0.0) {
        return Err(SessionError::Rejected(NO_ACTIVE_PROMPTS.to_string()));
    }
    Ok(())
}

/// An open session with the generation service.
pub trait Session: Send + Sync + 'static {
    /// Replaces the weighted prompts steering the generation.
    fn set_weighted_prompts(
        &self,
        prompts: &[WeightedPrompt],
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Replaces the generation settings.
    fn set_music_generation_config(
        &self,
        config: &GenerationConfig,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Starts or resumes streaming.
    fn play(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Pauses streaming.
    fn pause(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Stops streaming.
    fn stop(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Discards the generation context so bpm and scale changes take effect.
    fn reset_context(&self) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// Opens sessions with the generation service.
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    /// Connects to the service using the given model. Every event of the new session is sent to
    /// `events_tx`; the transport closing is reported as [`SessionEvent::Close`].
    fn connect(
        &self,
        model: &str,
        events_tx: Sender<SessionEvent>,
    ) -> impl Future<Output = Result<Self::Session, SessionError>> + Send;
}
