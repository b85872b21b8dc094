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
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::mpsc::Sender;

use super::{validate_payload, GenerationConfig, SessionError, SessionEvent};
use crate::prompts::WeightedPrompt;

/// A call made against the mock service.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(String),
    SetWeightedPrompts(Vec<(String, f32)>),
    SetConfig(GenerationConfig),
    Play,
    Pause,
    Stop,
    ResetContext,
}

#[derive(Default)]
struct State {
    calls: Mutex<Vec<Call>>,
    events_tx: Mutex<Option<Sender<SessionEvent>>>,
    reject_prompts: AtomicBool,
    refuse_connect: AtomicBool,
    hold_setup: AtomicBool,
}

/// A connector that records every call made by the sessions it opens. Clones share state.
#[derive(Clone, Default)]
pub struct Connector {
    state: Arc<State>,
}

impl Connector {
    pub fn new() -> Connector {
        Connector::default()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().clone()
    }

    /// Forgets the recorded calls.
    pub fn clear_calls(&self) {
        self.state.calls.lock().clear();
    }

    /// The last prompt payload sent.
    pub fn last_prompts(&self) -> Option<Vec<(String, f32)>> {
        self.state.calls.lock().iter().rev().find_map(|call| match call {
            Call::SetWeightedPrompts(prompts) => Some(prompts.clone()),
            _ => None,
        })
    }

    /// The number of prompt payloads sent.
    pub fn prompt_sends(&self) -> usize {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|call| matches!(call, Call::SetWeightedPrompts(_)))
            .count()
    }

    /// Makes the service reject every prompt payload.
    pub fn reject_prompts(&self, reject: bool) {
        self.state.reject_prompts.store(reject, Ordering::Relaxed);
    }

    /// Makes new connections fail.
    pub fn refuse_connect(&self, refuse: bool) {
        self.state.refuse_connect.store(refuse, Ordering::Relaxed);
    }

    /// Keeps new sessions from reporting that their setup completed.
    pub fn hold_setup(&self, hold: bool) {
        self.state.hold_setup.store(hold, Ordering::Relaxed);
    }

    /// Delivers an event to the most recently opened session.
    pub async fn emit(&self, event: SessionEvent) {
        let events_tx = self.state.events_tx.lock().clone();
        if let Some(events_tx) = events_tx {
            let _ = events_tx.send(event).await;
        }
    }
}

impl super::Connector for Connector {
    type Session = Session;

    async fn connect(
        &self,
        model: &str,
        events_tx: Sender<SessionEvent>,
    ) -> Result<Session, SessionError> {
        if self.state.refuse_connect.load(Ordering::Relaxed) {
            return Err(SessionError::Connect {
                address: "mock".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }

        self.state.calls.lock().push(Call::Connect(model.to_string()));
        if !self.state.hold_setup.load(Ordering::Relaxed) {
            let _ = events_tx.send(SessionEvent::SetupComplete).await;
        }
        *self.state.events_tx.lock() = Some(events_tx);
        Ok(Session {
            state: self.state.clone(),
        })
    }
}

/// A session opened by the mock connector.
pub struct Session {
    state: Arc<State>,
}

impl Session {
    fn record(&self, call: Call) {
        self.state.calls.lock().push(call);
    }
}

impl super::Session for Session {
    async fn set_weighted_prompts(&self, prompts: &[WeightedPrompt]) -> Result<(), SessionError> {
        validate_payload(prompts)?;
        if self.state.reject_prompts.load(Ordering::Relaxed) {
            return Err(SessionError::Rejected("Prompts rejected.".to_string()));
        }
        self.record(Call::SetWeightedPrompts(
            prompts
                .iter()
                .map(|prompt| (prompt.text.clone(), prompt.weight))
                .collect(),
        ));
        Ok(())
    }

    async fn set_music_generation_config(
        &self,
        config: &GenerationConfig,
    ) -> Result<(), SessionError> {
        self.record(Call::SetConfig(config.clone()));
        Ok(())
    }

    async fn play(&self) -> Result<(), SessionError> {
        self.record(Call::Play);
        Ok(())
    }

    async fn pause(&self) -> Result<(), SessionError> {
        self.record(Call::Pause);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SessionError> {
        self.record(Call::Stop);
        Ok(())
    }

    async fn reset_context(&self) -> Result<(), SessionError> {
        self.record(Call::ResetContext);
        Ok(())
    }
}
