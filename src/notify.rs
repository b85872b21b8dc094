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
use tokio::sync::broadcast;
use tracing::info;

const CAPACITY: usize = 16;

/// A short, user facing message.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub message: String,
}

/// The single channel user visible failures are reported through.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Notifier::new()
    }
}

impl Notifier {
    pub fn new() -> Notifier {
        let (tx, _) = broadcast::channel(CAPACITY);
        Notifier { tx }
    }

    /// Shows a message. Messages sent with nobody listening are dropped.
    pub fn notify(&self, message: impl Into<String>) {
        let message = message.into();
        info!(message, "Notifying.");
        let _ = self.tx.send(Notification { message });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}
