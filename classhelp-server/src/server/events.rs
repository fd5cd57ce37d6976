use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use classhelp_shared::api::ServerEvent;
use classhelp_shared::domain::ClassRef;
use futures::{Stream, StreamExt};
use tokio::sync::{Mutex, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use super::{AppError, AppState, auth::AuthCtx};

/// Per-class fan-out of change notifications. A notification names what
/// changed; subscribers re-query the affected resource instead of receiving
/// payloads, so a lagged or reconnecting board never sees stale data.
#[derive(Clone, Default)]
pub struct EventHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<ServerEvent>>>>,
}

const CHANNEL_CAPACITY: usize = 64;

impl EventHub {
    pub async fn publish(&self, class: ClassRef, event: ServerEvent) {
        let sender = self.sender(&class.to_string()).await;
        // Zero receivers is normal (no board is watching this class).
        let delivered = sender.send(event.clone()).unwrap_or(0);
        debug!(%class, ?event, delivered, "event published");
    }

    pub async fn subscribe(&self, class: &str) -> broadcast::Receiver<ServerEvent> {
        self.sender(class).await.subscribe()
    }

    async fn sender(&self, class: &str) -> broadcast::Sender<ServerEvent> {
        let mut map = self.channels.lock().await;
        map.entry(class.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

pub async fn api_class_events(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(class): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let _: ClassRef = class
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid class: {class}")))?;
    let rx = state.events.subscribe(&class).await;
    let shutdown = state.shutdown_token();
    let stream = BroadcastStream::new(rx)
        .filter_map(|item| async move {
            match item {
                Ok(event) => {
                    let json = serde_json::to_string(&event).ok()?;
                    Some(Ok(Event::default().data(json)))
                }
                // Lagged receiver: skip; the consumer re-queries on the next
                // event anyway.
                Err(_) => None,
            }
        })
        .take_until(shutdown.cancelled_owned());
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_only_see_their_class() {
        let hub = EventHub::default();
        let mut rx_31 = hub.subscribe("3-1").await;
        let mut rx_41 = hub.subscribe("4-1").await;

        hub.publish(
            ClassRef {
                grade: 3,
                class_number: 1,
            },
            ServerEvent::PointsUpdated {
                student_id: "3101".into(),
            },
        )
        .await;

        let got = rx_31.recv().await.unwrap();
        assert!(matches!(got, ServerEvent::PointsUpdated { student_id } if student_id == "3101"));
        assert!(rx_41.try_recv().is_err());
    }
}
