//! Gateway HTTP + WebSocket server (single port).

use crate::address;
use crate::config::{self, Config};
use crate::dispatch::{ClientSink, Dispatcher};
use crate::error::Error;
use crate::gateway::connections::Connections;
use crate::gateway::protocol::{self, RoomParams, WsRequest, WsResponse};
use crate::ingest::{self, Ingested, Provider};
use crate::message::{MessageRecord, StoredMessage};
use crate::rooms::RoomRegistry;
use crate::store::MailboxStore;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

/// Shared state for the gateway (config, store, rooms, dispatcher).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub store: Arc<MailboxStore>,
    pub rooms: Arc<RoomRegistry>,
    pub connections: Arc<Connections>,
    pub dispatcher: Arc<Dispatcher>,
    /// Persisted messages awaiting fan-out. Drained by a single task, so
    /// delivery order follows persist order.
    pub ingest_tx: mpsc::Sender<StoredMessage>,
    /// Broadcasts process-wide events (shutdown) to every socket task.
    pub event_tx: broadcast::Sender<String>,
    /// Accepted root domain, resolved once at startup.
    pub accepted_domain: Option<String>,
    pub started_at: Instant,
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// An unreachable mailbox store is fatal: the process must not serve
/// traffic without one. Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let config = Arc::new(config);

    let db_path = config::resolve_database_path(&config);
    let ttl = Duration::from_secs(config.mailbox.ttl_seconds);
    let store = Arc::new(
        MailboxStore::open(&db_path, ttl)
            .await
            .context("mailbox store must be reachable before serving traffic")?,
    );
    log::info!(
        "mailbox store at {} (ttl {}s)",
        db_path.display(),
        config.mailbox.ttl_seconds
    );

    let rooms = Arc::new(RoomRegistry::new());
    let connections = Arc::new(Connections::new());
    let dispatcher = Arc::new(Dispatcher::new(
        rooms.clone(),
        store.clone(),
        connections.clone() as Arc<dyn ClientSink>,
        config.mailbox.history_limit,
    ));

    let (event_tx, _) = broadcast::channel(64);
    let (ingest_tx, mut ingest_rx) = mpsc::channel::<StoredMessage>(256);

    {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            while let Some(stored) = ingest_rx.recv().await {
                dispatcher.on_ingested(&stored).await;
            }
        });
    }

    {
        let store = store.clone();
        let every = Duration::from_secs(config.mailbox.sweep_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.tick().await;
            loop {
                tick.tick().await;
                match store.sweep_expired().await {
                    Ok(0) => {}
                    Ok(n) => log::info!("expired {} stored message(s)", n),
                    Err(e) => log::warn!("expiry sweep failed: {}", e),
                }
            }
        });
    }

    let accepted_domain = config::resolve_accepted_domain(&config);
    match &accepted_domain {
        Some(d) => log::info!("accepting mail for {} and its subdomains", d),
        None => log::warn!("no accepted domain configured; ingesting mail for any domain"),
    }

    let state = GatewayState {
        config: config.clone(),
        store,
        rooms,
        connections,
        dispatcher,
        ingest_tx,
        event_tx: event_tx.clone(),
        accepted_domain,
        started_at: Instant::now(),
    };

    let app = Router::new()
        .route("/", get(health_http))
        .route("/ws", get(ws_handler))
        .route("/webhook/mailgun", post(mailgun_webhook))
        .route("/webhook/sendgrid", post(sendgrid_webhook))
        .route("/messages/:key", get(history_http).delete(delete_http))
        .route("/stats", get(stats_http))
        .with_state(state);

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(event_tx))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or
/// SIGTERM). Broadcasts a shutdown event so socket tasks drain cleanly.
async fn shutdown_signal(event_tx: broadcast::Sender<String>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, notifying subscribers");
    let _ = event_tx.send(protocol::SHUTDOWN_EVENT_JSON.to_string());
}

/// Adapt + persist + enqueue for fan-out. `Ok(None)` is a domain-policy
/// discard: acknowledged to the provider, never stored, never dispatched.
async fn ingest_one(
    state: &GatewayState,
    provider: Provider,
    fields: &HashMap<String, String>,
) -> Result<Option<String>, Error> {
    let msg = match ingest::adapt(provider, fields, state.accepted_domain.as_deref(), Utc::now())? {
        Ingested::Accepted(msg) => msg,
        Ingested::OffDomain(addr) => {
            log::info!(
                "{}: discarding mail for {} (outside accepted domain)",
                provider.name(),
                addr
            );
            return Ok(None);
        }
    };
    let id = state.store.save(&msg).await?;
    log::debug!("{}: stored {} for {}", provider.name(), id, msg.recipient);
    let stored = StoredMessage {
        id: id.clone(),
        message: msg,
    };
    if state.ingest_tx.send(stored).await.is_err() {
        log::warn!("ingest queue closed; {} not dispatched", id);
    }
    Ok(Some(id))
}

/// POST /webhook/mailgun — primary provider flavor: JSON acknowledgment.
/// Domain mismatch still acknowledges with 200 so the provider does not
/// retry; only a missing recipient is the caller's error.
async fn mailgun_webhook(
    State(state): State<GatewayState>,
    Form(fields): Form<HashMap<String, String>>,
) -> (StatusCode, Json<serde_json::Value>) {
    match ingest_one(&state, Provider::Mailgun, &fields).await {
        Ok(Some(id)) => (StatusCode::OK, Json(json!({ "status": "stored", "id": id }))),
        Ok(None) => (StatusCode::OK, Json(json!({ "status": "discarded" }))),
        Err(e @ Error::MissingRecipient) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
        }
        Err(e) => {
            log::error!("mailgun webhook failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "storage failure" })),
            )
        }
    }
}

/// POST /webhook/sendgrid — secondary provider flavor: bare `200 OK` text
/// regardless of internal outcome (the provider retries anything else);
/// only a missing recipient is reported as a 400.
async fn sendgrid_webhook(
    State(state): State<GatewayState>,
    Form(fields): Form<HashMap<String, String>>,
) -> (StatusCode, &'static str) {
    match ingest_one(&state, Provider::Sendgrid, &fields).await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(Error::MissingRecipient) => (StatusCode::BAD_REQUEST, "missing recipient"),
        Err(e) => {
            log::error!("sendgrid webhook failed: {}", e);
            (StatusCode::OK, "OK")
        }
    }
}

/// GET /messages/{address} — the address's non-expired messages,
/// most-recent-first, in the stable client record shape.
async fn history_http(State(state): State<GatewayState>, Path(address): Path<String>) -> Response {
    let addr = match address::normalize(&address) {
        Ok(a) => a,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
                .into_response();
        }
    };
    match state
        .store
        .find_by_address(&addr, state.config.mailbox.history_limit)
        .await
    {
        Ok(found) => {
            let records: Vec<MessageRecord> = found
                .iter()
                .map(|m| MessageRecord::from_stored(m, state.store.ttl()))
                .collect();
            Json(records).into_response()
        }
        Err(e) => {
            log::error!("history query for {} failed: {}", addr, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "storage failure" })),
            )
                .into_response()
        }
    }
}

/// DELETE /messages/{id} — not-found and success are reported distinctly.
async fn delete_http(State(state): State<GatewayState>, Path(id): Path<String>) -> Response {
    match state.store.delete_by_id(&id).await {
        Ok(true) => Json(json!({ "deleted": true })).into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, Json(json!({ "deleted": false }))).into_response(),
        Err(e) => {
            log::error!("delete {} failed: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "storage failure" })),
            )
                .into_response()
        }
    }
}

/// GET /stats — aggregate counters, read-only.
async fn stats_http(State(state): State<GatewayState>) -> Response {
    let messages = match state.store.count().await {
        Ok(n) => n,
        Err(e) => {
            log::error!("stats query failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "storage failure" })),
            )
                .into_response();
        }
    };
    Json(json!({
        "rooms": state.rooms.room_count().await,
        "messages": messages,
        "connections": state.connections.count().await,
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
    }))
}

/// GET /ws upgrades to WebSocket; clients then issue join/leave requests.
async fn ws_handler(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let conn_id = format!("conn-{}", uuid::Uuid::new_v4());
    let mut push_rx = state.connections.register(&conn_id).await;
    let mut event_rx = state.event_tx.subscribe();
    log::debug!("ws client {} connected", conn_id);

    loop {
        tokio::select! {
            biased;

            event = event_rx.recv() => {
                match event {
                    Ok(text) => {
                        let is_shutdown = text == protocol::SHUTDOWN_EVENT_JSON;
                        let _ = socket.send(Message::Text(text)).await;
                        if is_shutdown {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("ws client {} lagged {} broadcast events", conn_id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            frame = push_rx.recv() => {
                let Some(frame) = frame else { break };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(req): Result<WsRequest, _> = serde_json::from_str(&text) else { continue };
                if req.typ != "req" {
                    continue;
                }
                let res = handle_request(&state, &conn_id, &req).await;
                let _ = socket
                    .send(Message::Text(serde_json::to_string(&res).unwrap_or_default()))
                    .await;
            }
        }
    }

    // Exactly once per termination, whatever the cause: drop the push
    // channel first so dispatch snapshots taken from here on cannot reach
    // this connection, then clear its memberships.
    state.connections.unregister(&conn_id).await;
    let left = state.rooms.disconnect(&conn_id).await;
    log::debug!("ws client {} disconnected (left {} room(s))", conn_id, left.len());
}

async fn handle_request(state: &GatewayState, conn_id: &str, req: &WsRequest) -> WsResponse {
    match req.method.as_str() {
        "join" => {
            let params: RoomParams = match serde_json::from_value(req.params.clone()) {
                Ok(p) => p,
                Err(_) => return WsResponse::err(&req.id, "invalid join params"),
            };
            match state.dispatcher.on_join(conn_id, &params.address).await {
                Ok(addr) => WsResponse::ok(&req.id, json!({ "joined": addr })),
                Err(e @ Error::InvalidAddress) => WsResponse::err(&req.id, e.to_string()),
                Err(e) => {
                    // History replay failed after membership was recorded;
                    // this connection alone is told.
                    log::warn!("join {} for {} failed: {}", params.address, conn_id, e);
                    let _ = state
                        .connections
                        .push(conn_id, protocol::error_event(&e.to_string()))
                        .await;
                    WsResponse::err(&req.id, e.to_string())
                }
            }
        }
        "leave" => {
            let params: RoomParams = match serde_json::from_value(req.params.clone()) {
                Ok(p) => p,
                Err(_) => return WsResponse::err(&req.id, "invalid leave params"),
            };
            match state.rooms.leave(conn_id, &params.address).await {
                Ok(was_member) => WsResponse::ok(&req.id, json!({ "left": was_member })),
                Err(e) => WsResponse::err(&req.id, e.to_string()),
            }
        }
        other => WsResponse::err(&req.id, format!("unknown method: {}", other)),
    }
}
