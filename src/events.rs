use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;
use serde::Serialize;
use std::convert::Infallible;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{debug, trace, warn};

use crate::auth::CurrentUser;
use crate::models::FileRecord;
use crate::AppState;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub enum FileEvent {
    Uploaded(FileRecord),
    /// `was_public` is the visibility before the edit.
    Updated { file: FileRecord, was_public: bool },
    Deleted { file_id: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeletedPayload<'a> {
    file_id: &'a str,
}

impl FileEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FileEvent::Uploaded(_) => "file:uploaded",
            FileEvent::Updated { .. } => "file:updated",
            FileEvent::Deleted { .. } => "file:deleted",
        }
    }

    /// JSON payload: the file record, or `{fileId}` for deletions.
    pub fn data(&self) -> serde_json::Result<String> {
        match self {
            FileEvent::Uploaded(file) | FileEvent::Updated { file, .. } => serde_json::to_string(file),
            FileEvent::Deleted { file_id } => serde_json::to_string(&DeletedPayload { file_id }),
        }
    }

    /// The event as `viewer_id` should see it, or `None` if it must not see it.
    ///
    /// A public file turned private reaches other viewers as a deletion;
    /// edits to a file that was already private reach only its owner.
    pub fn for_viewer(self, viewer_id: &str) -> Option<FileEvent> {
        match self {
            FileEvent::Uploaded(file) => file.is_visible_to(viewer_id).then_some(FileEvent::Uploaded(file)),
            FileEvent::Updated { file, was_public } if file.is_visible_to(viewer_id) => {
                Some(FileEvent::Updated { file, was_public })
            }
            FileEvent::Updated { file, was_public: true } => Some(FileEvent::Deleted { file_id: file.id }),
            FileEvent::Updated { .. } => None,
            deleted @ FileEvent::Deleted { .. } => Some(deleted),
        }
    }
}

/// Fan-out handle for file change notifications.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FileEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    pub fn publish(&self, event: FileEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => trace!(event = name, receivers, "published"),
            Err(_) => trace!(event = name, "no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileEvent> {
        self.tx.subscribe()
    }
}

/// Events visible to `viewer_id`; lagged subscribers skip what they missed.
pub fn viewer_stream(
    rx: broadcast::Receiver<FileEvent>,
    viewer_id: String,
) -> impl Stream<Item = FileEvent> + Send + 'static {
    BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) => event.for_viewer(&viewer_id),
        Err(err) => {
            warn!(viewer = %viewer_id, %err, "event subscriber lagged");
            None
        }
    })
}

pub async fn events_handler(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(user = %user.id, "event stream opened");
    let stream = viewer_stream(state.events.subscribe(), user.id.clone()).filter_map(|event| {
        match event.data() {
            Ok(data) => Some(Ok(Event::default().event(event.name()).data(data))),
            Err(err) => {
                warn!(event = event.name(), %err, "dropping unserializable event");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
