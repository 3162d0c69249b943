//! Live ranked-view stream over WebSocket.
//!
//! On connect the client gets the current view, then one message per
//! broadcast. Client frames other than close are ignored. During a store
//! outage the client simply hears nothing; a client that connected during
//! one gets its first view as soon as the store is readable again.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use trendcast_core::RankedView;
use trendcast_engine::{Shutdown, TrendPublisher};

use super::AppState;

const SNAPSHOT_RETRY: Duration = Duration::from_secs(2);

pub(super) async fn subscribe(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_trends(socket, state.publisher, state.shutdown))
}

async fn stream_trends(socket: WebSocket, publisher: Arc<TrendPublisher>, mut shutdown: Shutdown) {
    let (mut tx, mut rx) = socket.split();

    let (mut updates, mut needs_snapshot) = match publisher.on_subscriber_connect().await {
        Ok((view, updates)) => {
            if send_view(&mut tx, &view).await.is_err() {
                return;
            }
            (updates, false)
        }
        Err(e) => {
            tracing::warn!(error = %e, "publisher: initial view unavailable; retrying");
            (publisher.subscribe_without_snapshot().await, true)
        }
    };
    let mut retry = tokio::time::interval(SNAPSHOT_RETRY);
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    retry.reset();
    tracing::info!(
        subscribers = publisher.subscriber_count(),
        "publisher: subscriber connected"
    );

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(view) => {
                    needs_snapshot = false;
                    if send_view(&mut tx, &view).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "publisher: slow subscriber skipped stale views");
                }
                Err(RecvError::Closed) => break,
            },
            _ = retry.tick(), if needs_snapshot => match publisher.current_view().await {
                Ok(view) => {
                    needs_snapshot = false;
                    if send_view(&mut tx, &view).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "publisher: initial view still unavailable");
                }
            },
            incoming = rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "publisher: subscriber socket error");
                    break;
                }
            },
            () = shutdown.wait() => {
                let _ = tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    tracing::info!("publisher: subscriber disconnected");
}

async fn send_view(
    tx: &mut SplitSink<WebSocket, Message>,
    view: &RankedView,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(view) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "publisher: failed to encode ranked view");
            return Ok(());
        }
    };
    tx.send(Message::Text(json.into())).await
}
