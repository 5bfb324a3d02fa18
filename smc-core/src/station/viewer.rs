use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeZone};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

pub const VIEWER_QUEUE_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewerId(Uuid);

impl ViewerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ViewerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Instruction pushed to a viewer: start playing now, or wait until an instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ViewerAction {
    Start,
    Wait { wait: String },
}

impl ViewerAction {
    pub fn wait_until<Tz: TimeZone>(at: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self::Wait {
            wait: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// The client side of a viewer session.
#[derive(Debug)]
pub struct Viewer {
    id: ViewerId,
    actions: mpsc::Receiver<ViewerAction>,
}

impl Viewer {
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Next action in arrival order; `None` once the station dropped the session.
    pub async fn next_action(&mut self) -> Option<ViewerAction> {
        self.actions.recv().await
    }
}

/// The station side of a viewer session.
#[derive(Debug, Clone)]
pub(crate) struct ViewerSession {
    pub(crate) id: ViewerId,
    sender: mpsc::Sender<ViewerAction>,
}

impl ViewerSession {
    /// Delivers without blocking. A full or closed queue means the session is gone.
    pub(crate) fn deliver(&self, action: &ViewerAction) -> bool {
        match self.sender.try_send(action.clone()) {
            Ok(()) => true,
            Err(error) => {
                debug!(viewer = %self.id, %error, "dropping viewer");
                false
            }
        }
    }
}

pub(crate) fn session() -> (ViewerSession, Viewer) {
    let id = ViewerId::new();
    let (sender, actions) = mpsc::channel(VIEWER_QUEUE_CAPACITY);
    (ViewerSession { id, sender }, Viewer { id, actions })
}
