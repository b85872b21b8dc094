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
use std::error::Error;
use std::io;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{error, info, span, warn, Instrument, Level};

use crate::engine::{Engine, RenderState, UiEvent};
use crate::notify::Notification;
use crate::session::Connector;

pub mod keyboard;

const UI_EVENTS: usize = 16;

/// Turns user input into engine events.
pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<UiEvent>) -> JoinHandle<Result<(), io::Error>>;
}

/// Runs an engine on behalf of a driver.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new<C: Connector>(
        engine: Engine<C>,
        driver: Arc<dyn Driver>,
    ) -> Result<Controller, Box<dyn Error>> {
        Ok(Controller {
            handle: tokio::spawn(
                Controller::run(engine, driver).instrument(span!(Level::INFO, "controller")),
            ),
        })
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    async fn run<C: Connector>(engine: Engine<C>, driver: Arc<dyn Driver>) {
        let (events_tx, events_rx) = mpsc::channel(UI_EVENTS);
        let join_handle = driver.monitor_events(events_tx);
        let reporter = tokio::spawn(report(
            engine.notifier().subscribe(),
            engine.subscribe_render(),
        ));

        info!("Controller started.");
        engine.run(events_rx).await;
        reporter.abort();

        info!("Controller closing.");
        match join_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(err = e.to_string(), "Event monitor failed."),
            Err(e) => error!("Error waiting for event monitor to stop: {}", e),
        }
    }
}

/// Prints notifications and playback state changes for the user.
async fn report(
    mut notifications: broadcast::Receiver<Notification>,
    mut render_rx: watch::Receiver<RenderState>,
) {
    let mut state = render_rx.borrow_and_update().state;
    loop {
        tokio::select! {
            notification = notifications.recv() => match notification {
                Ok(notification) => println!("! {}", notification.message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Dropped notifications.")
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            changed = render_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let current = render_rx.borrow_and_update().state;
                if current != state {
                    state = current;
                    println!("[{}]", state);
                }
            }
        }
    }
}
