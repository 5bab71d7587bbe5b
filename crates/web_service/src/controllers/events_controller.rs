//! Push channel endpoint
//!
//! Bridges a room subscription onto Server-Sent Events. The room stays
//! subscribable after a stop so late Bus deliveries can be routed and
//! discarded client-side by instance id.

use std::time::Duration;

use actix_web::{
    web::{Data, Path},
    Result,
};
use actix_web_lab::{sse, util::InfallibleStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::server::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const KEEP_ALIVE: Duration = Duration::from_secs(15);

pub async fn subscribe_room(
    path: Path<String>,
    state: Data<AppState>,
) -> Result<sse::Sse<InfallibleStream<ReceiverStream<sse::Event>>>> {
    let room = path.into_inner();
    tracing::info!(room = %room, "Push subscription requested");

    let mut event_rx = state.fanout.subscribe(&room).await;
    let (tx, rx) = mpsc::channel::<sse::Event>(32);

    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                maybe = event_rx.recv() => {
                    match maybe {
                        Some(event) => {
                            let Ok(data) = sse::Data::new_json(&event) else {
                                continue;
                            };
                            if tx.send(sse::Event::Data(data.event("push"))).await.is_err() {
                                tracing::debug!(room = %room, "Push client disconnected");
                                break;
                            }
                        }
                        None => {
                            // Fanout flushed (logout); end the stream
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    let payload = serde_json::json!({
                        "type": "heartbeat",
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                    });
                    if let Ok(data) = sse::Data::new_json(&payload) {
                        if tx.send(sse::Event::Data(data.event("heartbeat"))).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(room = %room, "Push stream closed");
    });

    Ok(sse::Sse::from_infallible_receiver(rx).with_keep_alive(KEEP_ALIVE))
}

pub fn config(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.service(actix_web::web::resource("/events/{room}").route(actix_web::web::get().to(subscribe_room)));
}
