//! WebSocket front door: one socket pair per endpoint, every inbound
//! frame dispatched through the coordinator.

use std::time::Duration;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::error::SignalError;
use crate::protocol::{ClientEvent, ServerEvent};

#[derive(Clone)]
struct AppState {
    coordinator: Coordinator,
}

pub fn router(coordinator: Coordinator) -> Router {
    Router::new()
        .route("/signal", get(ws_handler))
        .with_state(AppState { coordinator })
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let coordinator = Coordinator::new(config.invite_ttl);
    let app = router(coordinator);

    info!(addr = %config.bind_addr, "signal node listening");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let conn = Uuid::new_v4();
    let mut identifier: Option<String> = None;

    // Task 1: forward coordinator events to the wire, with a keepalive.
    let send_task = tokio::spawn(async move {
        let mut ping_interval = time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                Some(event) = rx.recv() => {
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() { break; }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(vec![].into())).await.is_err() { break; }
                }
            }
        }
    });

    // Task 2: receive and dispatch
    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Text(text) = msg {
            match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => dispatch(&state.coordinator, conn, &mut identifier, &tx, event),
                Err(err) => {
                    debug!(%conn, %err, "dropping malformed frame");
                    let _ = tx.send(ServerEvent::Error {
                        code: "MALFORMED".to_string(),
                        message: "frame is not a valid signaling event".to_string(),
                    });
                }
            }
        }
    }

    // Cleanup: calls first, then the binding, then presence fan-out.
    state.coordinator.disconnect(conn, identifier.as_deref());
    if let Some(identifier) = identifier.as_deref() {
        info!(%conn, identifier, "endpoint disconnected");
    }
    send_task.abort();
}

fn dispatch(
    coordinator: &Coordinator,
    conn: Uuid,
    identifier: &mut Option<String>,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    event: ClientEvent,
) {
    match event {
        ClientEvent::Register {
            identifier: requested,
        } => {
            if let Some(current) = identifier.as_deref() {
                if current != requested {
                    let _ = tx.send(ServerEvent::Rejected {
                        reason: "ALREADY_REGISTERED".to_string(),
                    });
                    return;
                }
            }
            match coordinator.register(conn, &requested, tx.clone()) {
                Ok(()) => *identifier = Some(requested),
                Err(err) => {
                    let _ = tx.send(ServerEvent::Rejected {
                        reason: err.code().to_string(),
                    });
                }
            }
        }
        event => {
            // Everything else requires a registered identity.
            let Some(from) = identifier.as_deref() else {
                let err = SignalError::NotRegistered;
                let _ = tx.send(ServerEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                return;
            };
            let outcome = match event {
                ClientEvent::Invite { target, offer } => coordinator.invite(from, &target, offer),
                ClientEvent::Accept { peer, answer } => coordinator.accept(from, &peer, answer),
                ClientEvent::Decline { peer } => coordinator.decline(from, &peer),
                ClientEvent::Candidate { peer, candidate } => {
                    coordinator.candidate(from, &peer, candidate)
                }
                ClientEvent::Hangup { peer } => coordinator.hangup(from, &peer),
                ClientEvent::Register { .. } => return,
            };
            if let Err(err) = outcome {
                warn!(from, %err, "signaling request rejected");
                let _ = tx.send(ServerEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
            }
        }
    }
}
