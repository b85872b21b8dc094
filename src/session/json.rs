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
//! A session transport that exchanges newline delimited JSON messages over TCP.
use std::time::Duration;

use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{mpsc::Sender, Mutex},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, span, warn, Instrument, Level};

use super::{validate_payload, GenerationConfig, ServerMessage, SessionError, SessionEvent};
use crate::prompts::WeightedPrompt;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum ClientMessage<'a> {
    Setup {
        model: &'a str,
    },
    ClientContent {
        #[serde(rename = "weightedPrompts")]
        weighted_prompts: Vec<WirePrompt<'a>>,
    },
    MusicGenerationConfig(&'a GenerationConfig),
    PlaybackControl(PlaybackControl),
}

#[derive(Serialize)]
struct WirePrompt<'a> {
    text: &'a str,
    weight: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum PlaybackControl {
    Play,
    Pause,
    Stop,
    ResetContext,
}

/// Connects to a service listening on a TCP address.
pub struct Connector {
    address: String,
}

impl Connector {
    pub fn new(address: &str) -> Connector {
        Connector {
            address: address.to_string(),
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
        let connect_error = |source| SessionError::Connect {
            address: self.address.clone(),
            source,
        };
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                connect_error(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out connecting",
                ))
            })?
            .map_err(connect_error)?;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        let session = Session {
            writer: Mutex::new(writer),
            reader_handle: tokio::spawn(
                read_events(reader, events_tx).instrument(span!(Level::INFO, "session reader")),
            ),
        };
        session.send(&ClientMessage::Setup { model }).await?;
        info!(address = self.address, model, "Session connected.");
        Ok(session)
    }
}

/// Reads server messages until the stream ends and forwards their events.
async fn read_events(reader: OwnedReadHalf, events_tx: Sender<SessionEvent>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let event = match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<ServerMessage>(line) {
                    Ok(message) => {
                        for event in message.into_events() {
                            if events_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!(err = e.to_string(), "Ignoring malformed server message."),
                }
                continue;
            }
            Ok(None) => SessionEvent::Close,
            Err(e) => SessionEvent::Error(e.to_string()),
        };

        debug!(?event, "Session stream ended.");
        let _ = events_tx.send(event).await;
        return;
    }
}

/// A live session. Dropping it closes the connection.
pub struct Session {
    writer: Mutex<OwnedWriteHalf>,
    reader_handle: JoinHandle<()>,
}

impl Session {
    async fn send(&self, message: &ClientMessage<'_>) -> Result<(), SessionError> {
        let line = serde_json::to_string(message)? + "\n";
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl super::Session for Session {
    async fn set_weighted_prompts(&self, prompts: &[WeightedPrompt]) -> Result<(), SessionError> {
        validate_payload(prompts)?;
        let weighted_prompts = prompts
            .iter()
            .map(|prompt| WirePrompt {
                text: &prompt.text,
                weight: prompt.weight,
            })
            .collect();
        self.send(&ClientMessage::ClientContent { weighted_prompts })
            .await
    }

    async fn set_music_generation_config(
        &self,
        config: &GenerationConfig,
    ) -> Result<(), SessionError> {
        self.send(&ClientMessage::MusicGenerationConfig(config))
            .await
    }

    async fn play(&self) -> Result<(), SessionError> {
        self.send(&ClientMessage::PlaybackControl(PlaybackControl::Play))
            .await
    }

    async fn pause(&self) -> Result<(), SessionError> {
        self.send(&ClientMessage::PlaybackControl(PlaybackControl::Pause))
            .await
    }

    async fn stop(&self) -> Result<(), SessionError> {
        self.send(&ClientMessage::PlaybackControl(PlaybackControl::Stop))
            .await
    }

    async fn reset_context(&self) -> Result<(), SessionError> {
        self.send(&ClientMessage::PlaybackControl(
            PlaybackControl::ResetContext,
        ))
        .await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}
