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
use std::fmt;

use tracing::{debug, info};

/// Where playback currently stands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Stopped,
    /// Waiting for enough audio to be buffered.
    Loading,
    Playing,
    Paused,
}

impl PlaybackState {
    /// Incoming audio is only scheduled while loading or playing.
    pub fn accepts_audio(&self) -> bool {
        matches!(self, PlaybackState::Loading | PlaybackState::Playing)
    }

    /// Returns the state the input leads to, or None if the input doesn't apply here.
    pub fn next(&self, input: Input) -> Option<PlaybackState> {
        use PlaybackState::*;

        match (*self, input) {
            (Stopped | Paused, Input::PlayPause) => Some(Loading),
            (Loading, Input::PlayPause) => Some(Stopped),
            (Playing, Input::PlayPause) => Some(Paused),
            (Loading, Input::BufferAnchored) => Some(Playing),
            (Loading | Playing, Input::Underrun) => Some(Loading),
            (_, Input::SessionLost) => Some(Stopped),
            (Loading | Playing, Input::SendRejected) => Some(Paused),
            (Loading | Playing | Paused, Input::Stop) => Some(Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        write!(f, "{}", name)
    }
}

/// Everything that can move playback from one state to another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Input {
    /// The user toggled play.
    PlayPause,
    /// The user stopped playback.
    Stop,
    /// Enough audio is buffered for the current anchor.
    BufferAnchored,
    /// The audio clock overtook the scheduling cursor.
    Underrun,
    /// The session errored or closed.
    SessionLost,
    /// The service refused a prompt update.
    SendRejected,
}

/// Tracks the playback state and applies inputs to it.
#[derive(Debug, Default)]
pub struct PlaybackStateMachine {
    state: PlaybackState,
}

impl PlaybackStateMachine {
    pub fn new() -> PlaybackStateMachine {
        PlaybackStateMachine::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Applies an input. Returns the new state, or None if the input was ignored.
    pub fn apply(&mut self, input: Input) -> Option<PlaybackState> {
        match self.state.next(input) {
            Some(next) => {
                info!(from = %self.state, to = %next, ?input, "Playback state changed.");
                self.state = next;
                Some(next)
            }
            None => {
                debug!(state = %self.state, ?input, "Ignoring input.");
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Input, PlaybackState, PlaybackStateMachine};

    const STATES: [PlaybackState; 4] = [
        PlaybackState::Stopped,
        PlaybackState::Loading,
        PlaybackState::Playing,
        PlaybackState::Paused,
    ];

    const INPUTS: [Input; 6] = [
        Input::PlayPause,
        Input::Stop,
        Input::BufferAnchored,
        Input::Underrun,
        Input::SessionLost,
        Input::SendRejected,
    ];

    fn exits(state: PlaybackState) -> Vec<Input> {
        INPUTS
            .into_iter()
            .filter(|input| {
                state
                    .next(*input)
                    .is_some_and(|next| next != state)
            })
            .collect()
    }

    #[test]
    fn test_stopped_only_leaves_on_play() {
        assert_eq!(vec![Input::PlayPause], exits(PlaybackState::Stopped));
        assert_eq!(
            Some(PlaybackState::Loading),
            PlaybackState::Stopped.next(Input::PlayPause)
        );
    }

    #[test]
    fn test_playing_exits() {
        assert_eq!(
            vec![
                Input::PlayPause,
                Input::Stop,
                Input::Underrun,
                Input::SessionLost,
                Input::SendRejected
            ],
            exits(PlaybackState::Playing)
        );
        assert_eq!(None, PlaybackState::Playing.next(Input::BufferAnchored));
    }

    #[test]
    fn test_transition_table() {
        use PlaybackState::*;

        let table = [
            (Paused, Input::PlayPause, Some(Loading)),
            (Loading, Input::PlayPause, Some(Stopped)),
            (Playing, Input::PlayPause, Some(Paused)),
            (Loading, Input::BufferAnchored, Some(Playing)),
            (Loading, Input::Underrun, Some(Loading)),
            (Playing, Input::Underrun, Some(Loading)),
            (Paused, Input::SessionLost, Some(Stopped)),
            (Loading, Input::SendRejected, Some(Paused)),
            (Paused, Input::SendRejected, None),
            (Paused, Input::Stop, Some(Stopped)),
            (Stopped, Input::Stop, None),
            (Stopped, Input::BufferAnchored, None),
            (Paused, Input::Underrun, None),
        ];
        for (from, input, to) in table {
            assert_eq!(to, from.next(input), "{} on {:?}", from, input);
        }
    }

    #[test]
    fn test_only_loading_and_playing_accept_audio() {
        let accepting: Vec<PlaybackState> = STATES
            .into_iter()
            .filter(|state| state.accepts_audio())
            .collect();
        assert_eq!(
            vec![PlaybackState::Loading, PlaybackState::Playing],
            accepting
        );
    }

    #[test]
    fn test_machine_ignores_invalid_inputs() {
        let mut machine = PlaybackStateMachine::new();
        assert_eq!(None, machine.apply(Input::BufferAnchored));
        assert_eq!(PlaybackState::Stopped, machine.state());

        assert_eq!(Some(PlaybackState::Loading), machine.apply(Input::PlayPause));
        assert_eq!(Some(PlaybackState::Playing), machine.apply(Input::BufferAnchored));
        assert_eq!(Some(PlaybackState::Paused), machine.apply(Input::PlayPause));
        assert_eq!(None, machine.apply(Input::Underrun));
        assert_eq!(PlaybackState::Paused, machine.state());
    }
}
