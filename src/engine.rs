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
//! The coordinator.
//!
//! A single task owns the prompt store, the audio scheduler, the playback state and the session.
//! User events, session events and timer ticks are funneled into one loop and each is handled to
//! completion before the next one is looked at. Timers never touch state themselves; they send a
//! tick back into the loop, tagged so that ticks from an outdated timer can be recognized.
use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{
        mpsc::{self, Receiver, UnboundedReceiver, UnboundedSender},
        watch,
    },
    time::Instant,
};
use tracing::{debug, info, span, warn, Instrument, Level};

use crate::{
    audio::scheduler::{AudioScheduler, ScheduleOutcome},
    notify::Notifier,
    playback::{Input, PlaybackState, PlaybackStateMachine},
    prompts::{PromptStore, SequencerGrid, WeightedPrompt},
    session::{Connector, GenerationConfig, Session, SessionEvent},
    throttle::RateLimiter,
};

pub mod playhead;

use playhead::Playhead;

/// The notification shown when the session goes away.
pub const CONNECTION_LOST: &str = "Connection error, please restart audio.";

const SESSION_EVENTS: usize = 64;

/// Changes requested by the user.
#[derive(Clone, Debug, PartialEq)]
pub enum UiEvent {
    /// Edits a prompt. Fields left unset keep their value.
    PromptChanged {
        id: String,
        text: Option<String>,
        weight: Option<f32>,
    },
    PromptAdded {
        text: String,
        color: String,
    },
    PromptRemoved {
        id: String,
    },
    /// Replaces the whole sequencer.
    SequencerChanged {
        grid: SequencerGrid,
        weight: f32,
    },
    SequencerStepToggled {
        track: usize,
        step: usize,
    },
    SequencerWeightChanged(f32),
    SettingsChanged(GenerationConfig),
    PlayPause,
    Stop,
    Shutdown,
}

/// Deferred work the coordinator scheduled for itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Tick {
    /// The buffer latency of the anchor with the given generation has elapsed.
    BufferAnchored { generation: u64 },
    /// A throttled prompt push may be due.
    FlushPrompts,
    /// The playhead moved.
    PlayheadStep { epoch: u64, step: usize },
}

/// Everything the presentation layer needs to draw.
#[derive(Clone, Debug, Default)]
pub struct RenderState {
    pub prompts: Arc<Vec<WeightedPrompt>>,
    /// What was last computed for the service, filtered and sequencer prompts applied.
    pub payload: Vec<WeightedPrompt>,
    pub filtered: Vec<String>,
    pub grid: SequencerGrid,
    pub sequencer_weight: f32,
    pub generation: GenerationConfig,
    pub state: PlaybackState,
    pub connection_error: bool,
    pub playhead: Option<usize>,
}

/// Waits for the next session event, or forever if there is no session.
async fn next_session_event(rx: &mut Option<Receiver<SessionEvent>>) -> Option<SessionEvent> {
    let Some(receiver) = rx else {
        return std::future::pending().await;
    };
    let event = receiver.recv().await;
    if event.is_none() {
        *rx = None;
    }
    event
}

/// Drives a session, the audio scheduler and the prompt store from user input.
pub struct Engine<C: Connector> {
    connector: C,
    model: String,
    session: Option<C::Session>,
    session_rx: Option<Receiver<SessionEvent>>,
    connection_error: bool,

    store: PromptStore,
    generation: GenerationConfig,
    scheduler: AudioScheduler,
    playback: PlaybackStateMachine,
    limiter: RateLimiter<Vec<WeightedPrompt>>,
    /// A flush tick is already on its way.
    flush_armed: bool,
    playhead: Playhead,
    playhead_step: Option<usize>,

    ticks_tx: UnboundedSender<Tick>,
    ticks_rx: UnboundedReceiver<Tick>,
    render_tx: watch::Sender<RenderState>,
    prompts_tx: watch::Sender<Arc<Vec<WeightedPrompt>>>,
    notifier: Notifier,
}

impl<C: Connector> Engine<C> {
    /// Creates a new engine. Nothing is connected until the engine runs.
    pub fn new(
        connector: C,
        scheduler: AudioScheduler,
        store: PromptStore,
        generation: GenerationConfig,
        model: &str,
        sync_interval: Duration,
    ) -> Engine<C> {
        let (ticks_tx, ticks_rx) = mpsc::unbounded_channel();
        let (render_tx, _) = watch::channel(RenderState::default());
        let (prompts_tx, _) = watch::channel(store.snapshot());
        let engine = Engine {
            connector,
            model: model.to_string(),
            session: None,
            session_rx: None,
            connection_error: true,
            store,
            generation,
            scheduler,
            playback: PlaybackStateMachine::new(),
            limiter: RateLimiter::new(sync_interval),
            flush_armed: false,
            playhead: Playhead::new(),
            playhead_step: None,
            ticks_tx,
            ticks_rx,
            render_tx,
            prompts_tx,
            notifier: Notifier::new(),
        };
        engine.publish();
        engine
    }

    /// Render data, republished after every handled event.
    pub fn subscribe_render(&self) -> watch::Receiver<RenderState> {
        self.render_tx.subscribe()
    }

    /// The full prompt map, republished whenever it changes.
    pub fn subscribe_prompts(&self) -> watch::Receiver<Arc<Vec<WeightedPrompt>>> {
        self.prompts_tx.subscribe()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Connects and processes events until a shutdown is requested or the UI goes away.
    pub async fn run(mut self, mut ui_rx: Receiver<UiEvent>) {
        let span = span!(Level::INFO, "engine");
        async move {
            info!(scheduler = %self.scheduler, "Engine started.");
            self.connect().await;
            self.publish();

            loop {
                tokio::select! {
                    event = ui_rx.recv() => match event {
                        Some(UiEvent::Shutdown) | None => break,
                        Some(event) => self.handle_ui(event).await,
                    },
                    Some(event) = next_session_event(&mut self.session_rx) => {
                        self.handle_session(event).await
                    }
                    Some(tick) = self.ticks_rx.recv() => self.handle_tick(tick).await,
                }
                self.publish();
            }

            self.shutdown().await;
            info!("Engine stopped.");
        }
        .instrument(span)
        .await
    }

    async fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.stop().await {
                debug!(err = e.to_string(), "Unable to stop session on shutdown.");
            }
        }
        self.scheduler.fade_out();
        self.playhead.sync(false, None, &self.ticks_tx);
    }

    async fn handle_ui(&mut self, event: UiEvent) {
        debug!(?event, "UI event.");
        match event {
            UiEvent::PromptChanged { id, text, weight } => {
                if let Err(e) = self.store.edit(&id, text.as_deref(), weight) {
                    // The UI reverts to the published value.
                    debug!(id, err = e.to_string(), "Rejected prompt edit.");
                    return;
                }
                self.prompts_changed().await;
            }
            UiEvent::PromptAdded { text, color } => match self.store.add(&text, &color) {
                Ok(id) => {
                    debug!(id, "Added prompt.");
                    self.prompts_changed().await;
                }
                Err(e) => debug!(err = e.to_string(), "Rejected new prompt."),
            },
            UiEvent::PromptRemoved { id } => match self.store.remove(&id) {
                Ok(_) => self.prompts_changed().await,
                Err(e) => debug!(err = e.to_string(), "Unable to remove prompt."),
            },
            UiEvent::SequencerChanged { grid, weight } => {
                if let Err(e) = self.store.set_sequencer_weight(weight) {
                    debug!(err = e.to_string(), "Rejected sequencer change.");
                    return;
                }
                self.store.set_grid(grid);
                self.sync_prompts().await;
            }
            UiEvent::SequencerStepToggled { track, step } => {
                match self.store.toggle_step(track, step) {
                    Ok(_) => self.sync_prompts().await,
                    Err(e) => debug!(err = e.to_string(), "Ignoring step toggle."),
                }
            }
            UiEvent::SequencerWeightChanged(weight) => {
                match self.store.set_sequencer_weight(weight) {
                    Ok(()) => self.sync_prompts().await,
                    Err(e) => debug!(err = e.to_string(), "Rejected sequencer weight."),
                }
            }
            UiEvent::SettingsChanged(config) => self.change_settings(config).await,
            UiEvent::PlayPause => match self.playback.state() {
                PlaybackState::Playing => self.pause().await,
                PlaybackState::Loading => self.stop(Input::PlayPause).await,
                PlaybackState::Stopped | PlaybackState::Paused => self.play().await,
            },
            UiEvent::Stop => self.stop(Input::Stop).await,
            // Handled by the run loop.
            UiEvent::Shutdown => {}
        }
    }

    async fn handle_session(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::SetupComplete => {
                info!("Session setup complete.");
                self.connection_error = false;
            }
            SessionEvent::FilteredPrompt { text, reason } => {
                info!(text, reason, "Prompt was filtered.");
                self.store.filter(&text);
                self.notifier.notify(reason);
            }
            SessionEvent::AudioChunks(chunks) => self.schedule_chunks(chunks),
            SessionEvent::Error(message) => {
                warn!(message, "Session error.");
                self.session_lost();
            }
            SessionEvent::Close => {
                warn!("Session closed.");
                self.session_lost();
            }
        }
    }

    async fn handle_tick(&mut self, tick: Tick) {
        match tick {
            Tick::BufferAnchored { generation } => {
                if generation != self.scheduler.generation() {
                    debug!(
                        generation,
                        current = self.scheduler.generation(),
                        "Ignoring stale anchor."
                    );
                    return;
                }
                if self.playback.apply(Input::BufferAnchored).is_some() {
                    self.sync_playhead();
                }
            }
            Tick::FlushPrompts => {
                self.flush_armed = false;
                match self.limiter.poll() {
                    Some(payload) => self.push_prompts(payload).await,
                    None => self.arm_flush(),
                }
            }
            Tick::PlayheadStep { epoch, step } => {
                if epoch == self.playhead.epoch() && self.playhead.is_running() {
                    self.playhead_step = Some(step);
                }
            }
        }
    }

    /// Opens a new session and brings it up to date: the filtered set starts empty, the full
    /// payload and the generation settings are sent. Returns false if anything failed.
    async fn connect(&mut self) -> bool {
        self.session = None;
        self.session_rx = None;

        let (events_tx, events_rx) = mpsc::channel(SESSION_EVENTS);
        match self.connector.connect(&self.model, events_tx).await {
            Ok(session) => {
                // The connection error clears once the service reports its setup complete.
                self.session = Some(session);
                self.session_rx = Some(events_rx);
            }
            Err(e) => {
                warn!(err = e.to_string(), "Unable to connect.");
                self.connection_error = true;
                self.notifier.notify(e.to_string());
                return false;
            }
        }
        self.store.clear_filtered();

        let payload = self.store.payload();
        let result = match &self.session {
            Some(session) => {
                match session.set_weighted_prompts(&payload).await {
                    Ok(()) => session.set_music_generation_config(&self.generation).await,
                    Err(e) => Err(e),
                }
            }
            None => return false,
        };
        if let Err(e) = result {
            warn!(err = e.to_string(), "Unable to bring the session up to date.");
            self.notifier.notify(e.to_string());
            return false;
        }
        true
    }

    async fn play(&mut self) {
        if self.connection_error || self.session.is_none() {
            info!("Reconnecting before playing.");
            if !self.connect().await {
                return;
            }
        }

        if self.playback.apply(Input::PlayPause).is_none() {
            return;
        }
        self.scheduler.fade_in();
        let result = match &self.session {
            Some(session) => session.play().await,
            None => return,
        };
        if let Err(e) = result {
            warn!(err = e.to_string(), "Unable to start playback.");
            self.notifier.notify(e.to_string());
        }
        self.sync_playhead();
    }

    async fn pause(&mut self) {
        if self.playback.apply(Input::PlayPause).is_some() {
            self.pause_effects().await;
        }
    }

    async fn pause_effects(&mut self) {
        if let Some(session) = &self.session {
            if let Err(e) = session.pause().await {
                warn!(err = e.to_string(), "Unable to pause session.");
            }
        }
        self.scheduler.fade_out();
        self.sync_playhead();
    }

    async fn stop(&mut self, input: Input) {
        if self.playback.apply(input).is_none() {
            return;
        }
        if let Some(session) = &self.session {
            if let Err(e) = session.stop().await {
                warn!(err = e.to_string(), "Unable to stop session.");
            }
        }
        self.scheduler.fade_out();
        self.sync_playhead();
    }

    /// The transport failed or closed. Playback stops and the next play reconnects.
    fn session_lost(&mut self) {
        self.connection_error = true;
        self.session = None;
        self.session_rx = None;
        self.playback.apply(Input::SessionLost);
        self.scheduler.fade_out();
        self.sync_playhead();
        self.notifier.notify(CONNECTION_LOST);
    }

    async fn change_settings(&mut self, config: GenerationConfig) {
        if let Err(e) = config.validate() {
            warn!(err = e.to_string(), "Rejected generation settings.");
            self.notifier.notify(e.to_string());
            return;
        }

        let reset = config.needs_context_reset(&self.generation);
        self.generation = config;
        self.sync_playhead();

        let result = match &self.session {
            Some(session) => match session.set_music_generation_config(&self.generation).await {
                Ok(()) if reset => session.reset_context().await,
                other => other,
            },
            // Sent with the next connection.
            None => return,
        };
        if let Err(e) = result {
            warn!(err = e.to_string(), "Unable to update generation settings.");
            self.notifier.notify(e.to_string());
        }
    }

    fn schedule_chunks(&mut self, chunks: Vec<String>) {
        let state = self.playback.state();
        if !state.accepts_audio() {
            debug!(%state, chunks = chunks.len(), "Discarding audio.");
            return;
        }

        for chunk in chunks {
            match self.scheduler.schedule_chunk(&chunk) {
                Ok(ScheduleOutcome::Anchored { generation }) => {
                    let at = Instant::now() + self.scheduler.buffer_latency();
                    self.schedule_tick(at, Tick::BufferAnchored { generation });
                }
                Ok(ScheduleOutcome::Scheduled) => {}
                Ok(ScheduleOutcome::Underrun) => {
                    self.playback.apply(Input::Underrun);
                    self.sync_playhead();
                }
                Err(e) => warn!(err = e.to_string(), "Dropping undecodable chunk."),
            }
        }
    }

    async fn prompts_changed(&mut self) {
        self.prompts_tx.send_replace(self.store.snapshot());
        self.sync_prompts().await;
    }

    /// Pushes the payload through the rate limiter.
    async fn sync_prompts(&mut self) {
        match self.limiter.call(self.store.payload()) {
            Some(payload) => self.push_prompts(payload).await,
            None => self.arm_flush(),
        }
    }

    async fn push_prompts(&mut self, payload: Vec<WeightedPrompt>) {
        let result = match &self.session {
            Some(session) => session.set_weighted_prompts(&payload).await,
            None => {
                debug!("No session, prompts will be sent on reconnect.");
                return;
            }
        };

        if let Err(e) = result {
            warn!(err = e.to_string(), "Prompt update rejected.");
            self.notifier.notify(e.to_string());
            if self.playback.apply(Input::SendRejected).is_some() {
                self.pause_effects().await;
            }
        }
    }

    fn arm_flush(&mut self) {
        if self.flush_armed {
            return;
        }
        if let Some(deadline) = self.limiter.deadline() {
            self.flush_armed = true;
            self.schedule_tick(deadline, Tick::FlushPrompts);
        }
    }

    fn schedule_tick(&self, at: Instant, tick: Tick) {
        let ticks_tx = self.ticks_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            let _ = ticks_tx.send(tick);
        });
    }

    fn sync_playhead(&mut self) {
        let running = self.playback.state() == PlaybackState::Playing;
        if self
            .playhead
            .sync(running, self.generation.bpm, &self.ticks_tx)
            && !running
        {
            self.playhead_step = None;
        }
    }

    fn publish(&self) {
        let render = RenderState {
            prompts: self.store.snapshot(),
            payload: self.store.payload(),
            filtered: self.store.filtered().iter().cloned().collect(),
            grid: self.store.grid().clone(),
            sequencer_weight: self.store.sequencer_weight(),
            generation: self.generation.clone(),
            state: self.playback.state(),
            connection_error: self.connection_error,
            playhead: self.playhead_step,
        };
        self.render_tx.send_replace(render);
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use tokio::{
        sync::{broadcast, mpsc, watch},
        task::JoinHandle,
        time::timeout,
    };

    use crate::{
        audio::{buffer::encode_chunk, mock, scheduler::AudioScheduler},
        playback::PlaybackState,
        prompts::{sequencer::SequencerGrid, PromptStore, WeightedPrompt},
        session::{
            mock::{Call, Connector},
            GenerationConfig, SessionEvent, NO_ACTIVE_PROMPTS,
        },
        testutil::eventually_async,
    };

    use super::{Engine, RenderState, UiEvent, CONNECTION_LOST};
    use crate::notify::Notification;

    const KICK: &str = "A tight drum machine groove featuring a deep punchy kick drum";

    struct Harness {
        connector: Connector,
        context: Arc<mock::Context>,
        ui_tx: mpsc::Sender<UiEvent>,
        render_rx: watch::Receiver<RenderState>,
        prompts_rx: watch::Receiver<Arc<Vec<WeightedPrompt>>>,
        notifications: broadcast::Receiver<Notification>,
        handle: JoinHandle<()>,
    }

    impl Harness {
        fn start(store: PromptStore) -> Harness {
            let connector = Connector::new();
            let context = Arc::new(mock::Context::get("mock-engine"));
            let scheduler = AudioScheduler::new(
                context.clone(),
                Duration::from_secs(2),
                Duration::from_millis(100),
            );
            let engine = Engine::new(
                connector.clone(),
                scheduler,
                store,
                GenerationConfig::default(),
                "models/test",
                Duration::from_millis(200),
            );
            let render_rx = engine.subscribe_render();
            let prompts_rx = engine.subscribe_prompts();
            let notifications = engine.notifier().subscribe();
            let (ui_tx, ui_rx) = mpsc::channel(32);
            let handle = tokio::spawn(engine.run(ui_rx));
            Harness {
                connector,
                context,
                ui_tx,
                render_rx,
                prompts_rx,
                notifications,
                handle,
            }
        }

        async fn send(&self, event: UiEvent) {
            self.ui_tx.send(event).await.expect("engine gone");
        }

        async fn wait_for_state(&mut self, state: PlaybackState) {
            let result = timeout(
                Duration::from_secs(10),
                self.render_rx.wait_for(|render| render.state == state),
            )
            .await;
            assert!(
                matches!(result, Ok(Ok(_))),
                "playback never reached {}",
                state
            );
        }

        /// Waits until the initial connection sent its state and the service finished setup.
        async fn ready(&self) {
            self.wait_for_calls(3).await;
            let mut render_rx = self.render_rx.clone();
            let result = timeout(
                Duration::from_secs(10),
                render_rx.wait_for(|render| !render.connection_error),
            )
            .await;
            assert!(matches!(result, Ok(Ok(_))), "setup never completed");
        }

        async fn wait_for_calls(&self, expected: usize) {
            let connector = self.connector.clone();
            eventually_async(
                || {
                    let connector = connector.clone();
                    async move { connector.calls().len() >= expected }
                },
                "Expected session calls never happened",
            )
            .await;
        }

        /// Waits until the given payload is the last one sent.
        async fn wait_for_prompts(&self, expected: &[(&str, f32)]) {
            let connector = self.connector.clone();
            let expected: Vec<(String, f32)> = expected
                .iter()
                .map(|(text, weight)| (text.to_string(), *weight))
                .collect();
            eventually_async(
                || {
                    let connector = connector.clone();
                    let expected = expected.clone();
                    async move { connector.last_prompts() == Some(expected) }
                },
                "Expected prompts were never sent",
            )
            .await;
        }

        async fn next_notification(&mut self) -> String {
            timeout(Duration::from_secs(10), self.notifications.recv())
                .await
                .expect("no notification")
                .expect("notifier closed")
                .message
        }

        async fn shutdown(self) {
            self.send(UiEvent::Shutdown).await;
            self.handle.await.expect("engine panicked");
        }
    }

    fn store(prompts: &[(&str, f32)]) -> PromptStore {
        let mut store = PromptStore::new();
        for (text, weight) in prompts {
            store.add_weighted(text, *weight, "").expect("add");
        }
        store
    }

    fn chunk() -> String {
        // A tenth of a second of stereo silence.
        encode_chunk(&vec![0i16; 9600])
    }

    fn sent(prompts: &[(&str, f32)]) -> Call {
        Call::SetWeightedPrompts(
            prompts
                .iter()
                .map(|(text, weight)| (text.to_string(), *weight))
                .collect(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_sends_state() {
        let harness = Harness::start(store(&[("A", 1.0), ("B", 0.0)]));
        harness.ready().await;
        assert_eq!(
            vec![
                Call::Connect("models/test".to_string()),
                sent(&[("A", 1.0)]),
                Call::SetConfig(GenerationConfig::default()),
            ],
            harness.connector.calls()
        );
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_before_play() {
        let mut harness = Harness::start(store(&[("A", 1.0), ("B", 0.5)]));
        harness.ready().await;

        harness.connector.emit(SessionEvent::Close).await;
        harness.wait_for_state(PlaybackState::Stopped).await;
        assert_eq!(CONNECTION_LOST, harness.next_notification().await);
        assert!(
            harness
                .render_rx
                .wait_for(|render| render.connection_error)
                .await
                .is_ok()
        );

        harness.connector.clear_calls();
        harness.send(UiEvent::PlayPause).await;
        harness.wait_for_calls(4).await;
        assert_eq!(
            vec![
                Call::Connect("models/test".to_string()),
                sent(&[("A", 1.0), ("B", 0.5)]),
                Call::SetConfig(GenerationConfig::default()),
                Call::Play,
            ],
            harness.connector.calls()
        );
        harness.wait_for_state(PlaybackState::Loading).await;
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnect_does_not_play() {
        let mut harness = Harness::start(store(&[("A", 1.0)]));
        harness.ready().await;

        harness.connector.emit(SessionEvent::Error("reset".to_string())).await;
        assert_eq!(CONNECTION_LOST, harness.next_notification().await);

        harness.connector.refuse_connect(true);
        harness.send(UiEvent::PlayPause).await;
        harness.next_notification().await;
        assert_eq!(PlaybackState::Stopped, harness.render_rx.borrow().state);
        assert!(!harness.connector.calls().contains(&Call::Play));
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_filtered_prompt_is_left_out() {
        let mut harness = Harness::start(store(&[("A", 1.0), ("B", 0.5)]));
        harness.ready().await;

        harness
            .connector
            .emit(SessionEvent::FilteredPrompt {
                text: "B".to_string(),
                reason: "B is not allowed".to_string(),
            })
            .await;
        assert_eq!("B is not allowed", harness.next_notification().await);

        let id = harness.render_rx.borrow().prompts[0].id.clone();
        harness
            .send(UiEvent::PromptChanged {
                id,
                text: None,
                weight: Some(0.75),
            })
            .await;
        harness.wait_for_calls(4).await;
        assert_eq!(
            Some(vec![("A".to_string(), 0.75)]),
            harness.connector.last_prompts()
        );
        assert_eq!(vec!["B".to_string()], harness.render_rx.borrow().filtered);

        // New text makes the prompt eligible again.
        let id = harness.render_rx.borrow().prompts[1].id.clone();
        harness
            .send(UiEvent::PromptChanged {
                id: id.clone(),
                text: Some("C".to_string()),
                weight: None,
            })
            .await;
        harness.wait_for_prompts(&[("A", 0.75), ("C", 0.5)]).await;

        harness
            .send(UiEvent::PromptChanged {
                id: id.clone(),
                text: None,
                weight: Some(0.0),
            })
            .await;
        harness.wait_for_prompts(&[("A", 0.75)]).await;

        harness
            .send(UiEvent::PromptChanged {
                id,
                text: None,
                weight: Some(1.2),
            })
            .await;
        harness.wait_for_prompts(&[("A", 0.75), ("C", 1.2)]).await;
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_reconnects_until_setup_completes() {
        let mut harness = Harness::start(store(&[("A", 1.0)]));
        // The engine task hasn't run yet, so this applies to its first connection.
        harness.connector.hold_setup(true);
        harness.wait_for_calls(3).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(harness.render_rx.borrow().connection_error);

        harness.send(UiEvent::PlayPause).await;
        harness.wait_for_calls(7).await;
        let calls = harness.connector.calls();
        assert_eq!(Call::Connect("models/test".to_string()), calls[3]);
        assert_eq!(Call::Play, calls[6]);
        harness.wait_for_state(PlaybackState::Loading).await;

        // Once setup completes, play goes straight to the session.
        harness.connector.emit(SessionEvent::SetupComplete).await;
        assert!(harness
            .render_rx
            .wait_for(|render| !render.connection_error)
            .await
            .is_ok());
        harness.send(UiEvent::Stop).await;
        harness.wait_for_state(PlaybackState::Stopped).await;
        harness.connector.clear_calls();
        harness.send(UiEvent::PlayPause).await;
        harness.wait_for_state(PlaybackState::Loading).await;
        assert_eq!(vec![Call::Play], harness.connector.calls());
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_only_sequencer() {
        let mut harness = Harness::start(PromptStore::new());
        // Nothing is active yet.
        assert_eq!(NO_ACTIVE_PROMPTS, harness.next_notification().await);

        for step in [0, 4, 8, 12] {
            harness
                .send(UiEvent::SequencerStepToggled { track: 0, step })
                .await;
        }

        let connector = harness.connector.clone();
        eventually_async(
            || {
                let connector = connector.clone();
                async move { connector.prompt_sends() == 2 }
            },
            "Trailing sequencer push never happened",
        )
        .await;
        assert_eq!(
            Some(vec![(KICK.to_string(), 1.0)]),
            harness.connector.last_prompts()
        );
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_edits_is_throttled() {
        let harness = Harness::start(store(&[("A", 1.0)]));
        harness.ready().await;
        harness.connector.clear_calls();

        let id = harness.render_rx.borrow().prompts[0].id.clone();
        for i in 0..10 {
            harness
                .send(UiEvent::PromptChanged {
                    id: id.clone(),
                    text: None,
                    weight: Some(0.1 * (i + 1) as f32),
                })
                .await;
        }

        let connector = harness.connector.clone();
        eventually_async(
            || {
                let connector = connector.clone();
                async move { connector.prompt_sends() == 2 }
            },
            "Trailing push never happened",
        )
        .await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        // The first edit goes out immediately, the last one when the interval reopens.
        assert_eq!(
            vec![sent(&[("A", 0.1)]), sent(&[("A", 0.1 * 10.0)])],
            harness.connector.calls()
        );
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_only_scheduled_while_playing() {
        let mut harness = Harness::start(store(&[("A", 1.0)]));
        harness.ready().await;

        // Stopped.
        harness
            .connector
            .emit(SessionEvent::AudioChunks(vec![chunk()]))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(harness.context.scheduled().is_empty());

        harness.send(UiEvent::PlayPause).await;
        harness.wait_for_state(PlaybackState::Loading).await;
        harness
            .connector
            .emit(SessionEvent::AudioChunks(vec![chunk(), chunk()]))
            .await;
        harness.wait_for_state(PlaybackState::Playing).await;
        assert_eq!(vec![(2.0, 2.1), (2.1, 2.2)], harness.context.scheduled());

        harness.send(UiEvent::PlayPause).await;
        harness.wait_for_state(PlaybackState::Paused).await;
        let before = harness.context.scheduled().len();
        harness
            .connector
            .emit(SessionEvent::AudioChunks(vec![chunk()]))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(before, harness.context.scheduled().len());
        assert!(harness.connector.calls().contains(&Call::Pause));
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_underrun_rebuffers() {
        let mut harness = Harness::start(store(&[("A", 1.0)]));
        harness.ready().await;

        harness.send(UiEvent::PlayPause).await;
        harness.wait_for_state(PlaybackState::Loading).await;
        harness
            .connector
            .emit(SessionEvent::AudioChunks(vec![chunk()]))
            .await;
        harness.wait_for_state(PlaybackState::Playing).await;

        // The audio clock runs past everything that was buffered.
        harness.context.advance(3.0);
        harness
            .connector
            .emit(SessionEvent::AudioChunks(vec![chunk()]))
            .await;
        harness.wait_for_state(PlaybackState::Loading).await;
        assert!(harness.context.scheduled().is_empty());

        harness
            .connector
            .emit(SessionEvent::AudioChunks(vec![chunk()]))
            .await;
        harness.wait_for_state(PlaybackState::Playing).await;
        assert_eq!(vec![(5.0, 5.1)], harness.context.scheduled());
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_anchor_is_ignored() {
        let mut harness = Harness::start(store(&[("A", 1.0)]));
        harness.ready().await;

        harness.send(UiEvent::PlayPause).await;
        harness.wait_for_state(PlaybackState::Loading).await;
        harness
            .connector
            .emit(SessionEvent::AudioChunks(vec![chunk()]))
            .await;
        let context = harness.context.clone();
        eventually_async(
            || {
                let context = context.clone();
                async move { !context.scheduled().is_empty() }
            },
            "Chunk was never scheduled",
        )
        .await;

        // Still loading, so this stops before the buffer latency elapses.
        harness.send(UiEvent::PlayPause).await;
        harness.wait_for_state(PlaybackState::Stopped).await;
        harness.send(UiEvent::PlayPause).await;
        harness.wait_for_state(PlaybackState::Loading).await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(PlaybackState::Loading, harness.render_rx.borrow().state);
        assert!(harness.connector.calls().contains(&Call::Stop));
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_push_pauses() {
        let mut harness = Harness::start(store(&[("A", 1.0)]));
        harness.ready().await;

        harness.send(UiEvent::PlayPause).await;
        harness.wait_for_state(PlaybackState::Loading).await;
        harness
            .connector
            .emit(SessionEvent::AudioChunks(vec![chunk()]))
            .await;
        harness.wait_for_state(PlaybackState::Playing).await;

        harness.connector.reject_prompts(true);
        harness
            .send(UiEvent::PromptAdded {
                text: "Funk".to_string(),
                color: "#2af6de".to_string(),
            })
            .await;
        assert_eq!("Prompts rejected.", harness.next_notification().await);
        harness.wait_for_state(PlaybackState::Paused).await;
        assert!(harness.connector.calls().contains(&Call::Pause));
        // The edit itself stays.
        assert_eq!(2, harness.render_rx.borrow().prompts.len());
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings() {
        let mut harness = Harness::start(store(&[("A", 1.0)]));
        harness.ready().await;
        harness.connector.clear_calls();

        let warmer = GenerationConfig {
            temperature: 2.0,
            ..Default::default()
        };
        harness.send(UiEvent::SettingsChanged(warmer.clone())).await;
        let faster = GenerationConfig {
            bpm: Some(100),
            ..warmer.clone()
        };
        harness.send(UiEvent::SettingsChanged(faster.clone())).await;
        harness.wait_for_calls(3).await;
        assert_eq!(
            vec![
                Call::SetConfig(warmer),
                Call::SetConfig(faster),
                Call::ResetContext
            ],
            harness.connector.calls()
        );

        harness
            .send(UiEvent::SettingsChanged(GenerationConfig {
                guidance: 9.0,
                ..Default::default()
            }))
            .await;
        assert!(harness.next_notification().await.contains("guidance"));
        assert_eq!(3, harness.connector.calls().len());
        assert_eq!(Some(100), harness.render_rx.borrow().generation.bpm);
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_map_changes() {
        let mut harness = Harness::start(store(&[("A", 1.0)]));
        harness.ready().await;
        let _ = harness.prompts_rx.borrow_and_update();

        harness
            .send(UiEvent::PromptAdded {
                text: "Funk".to_string(),
                color: "#2af6de".to_string(),
            })
            .await;
        harness.prompts_rx.changed().await.expect("engine gone");
        let added = harness.prompts_rx.borrow_and_update().clone();
        assert_eq!(
            vec!["A", "Funk"],
            added
                .iter()
                .map(|prompt| prompt.text.as_str())
                .collect::<Vec<_>>()
        );
        assert_eq!(0.0, added[1].weight);

        // Empty text reverts, the published map doesn't change.
        harness
            .send(UiEvent::PromptChanged {
                id: added[1].id.clone(),
                text: Some(String::new()),
                weight: Some(1.0),
            })
            .await;
        harness
            .send(UiEvent::PromptRemoved {
                id: added[0].id.clone(),
            })
            .await;
        harness.prompts_rx.changed().await.expect("engine gone");
        let removed = harness.prompts_rx.borrow_and_update().clone();
        assert_eq!(1, removed.len());
        assert_eq!("Funk", removed[0].text);
        assert_eq!(0.0, removed[0].weight);
        harness.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequencer_replacement() {
        let harness = Harness::start(store(&[("A", 1.0)]));
        harness.ready().await;

        let mut grid = SequencerGrid::default();
        grid.set(1, 0, true).expect("in range");
        harness
            .send(UiEvent::SequencerChanged { grid, weight: 0.5 })
            .await;
        harness.wait_for_calls(4).await;
        let last = harness.connector.last_prompts().expect("prompts");
        assert_eq!(2, last.len());
        assert_eq!(
            "A tight drum machine groove featuring a crisp snare",
            last[1].0
        );
        assert_eq!(0.5, last[1].1);

        // Weights that aren't numbers are ignored.
        harness
            .send(UiEvent::SequencerWeightChanged(f32::NAN))
            .await;
        let id = harness.render_rx.borrow().prompts[0].id.clone();
        harness
            .send(UiEvent::PromptChanged {
                id,
                text: None,
                weight: Some(f32::NAN),
            })
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(0.5, harness.render_rx.borrow().sequencer_weight);
        assert_eq!(1.0, harness.render_rx.borrow().prompts[0].weight);
        assert_eq!(4, harness.connector.calls().len());
        harness.shutdown().await;
    }
}
