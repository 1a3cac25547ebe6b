use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use chrono::Weekday;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::engine::Engine;
use crate::limits::{MAX_LINE_LEN, MAX_SUBS_PER_CONNECTION};
use crate::model::SlotKind;
use crate::protocol::{self, ClientMessage};

/// Per-connection state: the authenticated account plus the court
/// subscriptions, each with the forwarder task feeding this connection.
struct Session {
    account: Option<Uuid>,
    subs: HashMap<Uuid, JoinHandle<()>>,
}

impl Session {
    fn new() -> Self {
        Self {
            account: None,
            subs: HashMap::new(),
        }
    }

    /// Drop every subscription. Called on disconnect.
    fn clear(&mut self) {
        for (_, handle) in self.subs.drain() {
            handle.abort();
        }
    }
}

pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    auth: Arc<dyn Authenticator>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    match tls {
        Some(acceptor) => {
            let stream = acceptor.accept(socket).await?;
            handle_stream(stream, engine, auth).await
        }
        None => handle_stream(socket, engine, auth).await,
    }
}

async fn handle_stream<S>(
    stream: S,
    engine: Arc<Engine>,
    auth: Arc<dyn Authenticator>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    // Broadcast forwarders push into this outbox; the select loop below is
    // the only writer to the socket.
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<String>(64);
    let mut session = Session::new();

    loop {
        tokio::select! {
            inbound = framed.next() => {
                let line = match inbound {
                    None => break,
                    Some(Err(e)) => {
                        debug!("line decode error: {e}");
                        break;
                    }
                    Some(Ok(line)) => line,
                };
                // Requests on one connection are handled strictly in
                // arrival order.
                let reply =
                    handle_line(&engine, auth.as_ref(), &mut session, &outbox_tx, &line).await;
                if framed.send(reply.to_string()).await.is_err() {
                    break;
                }
            }
            Some(push) = outbox_rx.recv() => {
                if framed.send(push).await.is_err() {
                    break;
                }
            }
        }
    }

    session.clear();
    Ok(())
}

async fn handle_line(
    engine: &Arc<Engine>,
    auth: &dyn Authenticator,
    session: &mut Session,
    outbox: &mpsc::Sender<String>,
    line: &str,
) -> Value {
    let msg = match protocol::parse_client_message(line) {
        Ok(msg) => msg,
        Err(e) => return protocol::error("invalid", format!("malformed message: {e}")),
    };
    let label = crate::observability::message_label(&msg);
    let reply = dispatch(engine, auth, session, outbox, msg).await;
    let status = if reply["status"] == "success" { "success" } else { "error" };
    metrics::counter!(
        crate::observability::MESSAGES_TOTAL,
        "message" => label,
        "status" => status
    )
    .increment(1);
    reply
}

async fn dispatch(
    engine: &Arc<Engine>,
    auth: &dyn Authenticator,
    session: &mut Session,
    outbox: &mpsc::Sender<String>,
    msg: ClientMessage,
) -> Value {
    match msg {
        ClientMessage::Auth { token } => match auth.authenticate(&token).await {
            Some(id) if engine.account(id).is_some() => {
                session.account = Some(id);
                protocol::success()
            }
            _ => {
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                protocol::error("unauthorized", "invalid token")
            }
        },
        ClientMessage::Register { email, first_name, last_name } => {
            match engine.create_account(email, first_name, last_name, false).await {
                Ok(account) => protocol::success_with(json!({"account_id": account.id})),
                Err(e) => protocol::engine_error(&e),
            }
        }
        msg => {
            let Some(account_id) = session.account else {
                return protocol::error("unauthorized", "authentication required");
            };
            dispatch_authed(engine, session, outbox, account_id, msg).await
        }
    }
}

async fn dispatch_authed(
    engine: &Arc<Engine>,
    session: &mut Session,
    outbox: &mpsc::Sender<String>,
    account_id: Uuid,
    msg: ClientMessage,
) -> Value {
    match msg {
        ClientMessage::Sub { court_id } => subscribe(engine, session, outbox, court_id),
        ClientMessage::Unsub { court_id } => {
            // Idempotent: unsubscribing twice is a no-op the second time.
            if let Some(handle) = session.subs.remove(&court_id) {
                handle.abort();
            }
            protocol::success()
        }
        ClientMessage::Book { court_id, start_time, duration } => {
            match engine.create_booking(court_id, account_id, start_time, duration).await {
                Ok(b) => protocol::success_with(json!({
                    "booking_id": b.id,
                    "start_time": b.start_time,
                    "end_time": b.end_time,
                })),
                Err(e) => protocol::engine_error(&e),
            }
        }
        ClientMessage::Reschedule { booking_id, start_time, duration } => {
            match engine
                .reschedule_booking(booking_id, account_id, start_time, duration)
                .await
            {
                Ok(b) => protocol::success_with(json!({
                    "booking_id": b.id,
                    "start_time": b.start_time,
                    "end_time": b.end_time,
                })),
                Err(e) => protocol::engine_error(&e),
            }
        }
        ClientMessage::Cancel { booking_id } => {
            match engine.cancel_booking(booking_id, account_id).await {
                Ok(()) => protocol::success(),
                Err(e) => protocol::engine_error(&e),
            }
        }
        ClientMessage::Courts => {
            protocol::success_with(json!({"courts": engine.list_courts().await}))
        }
        ClientMessage::Bookings => {
            protocol::success_with(json!({"bookings": engine.account_bookings(account_id).await}))
        }
        ClientMessage::Availability { court_id, date, timezone, buffer_minutes } => {
            match engine.court_availability(court_id, date, &timezone, buffer_minutes).await {
                Ok(slots) => protocol::success_with(json!({"slots": slots})),
                Err(e) => protocol::engine_error(&e),
            }
        }

        // ── Management: admin accounts only ──────────────
        admin_msg => {
            if !engine.account(account_id).is_some_and(|a| a.is_admin) {
                return protocol::error("unauthorized", "admin only");
            }
            dispatch_admin(engine, admin_msg).await
        }
    }
}

async fn dispatch_admin(engine: &Arc<Engine>, msg: ClientMessage) -> Value {
    match msg {
        ClientMessage::CreateCourt { name, location, open, close } => {
            match engine.create_court(name, location, open, close).await {
                Ok(id) => protocol::success_with(json!({"court_id": id})),
                Err(e) => protocol::engine_error(&e),
            }
        }
        ClientMessage::DeleteCourt { court_id } => match engine.delete_court(court_id).await {
            Ok(()) => protocol::success(),
            Err(e) => protocol::engine_error(&e),
        },
        ClientMessage::AddWorker { court_id, name, email } => {
            match engine.add_worker(court_id, name, email).await {
                Ok(id) => protocol::success_with(json!({"worker_id": id})),
                Err(e) => protocol::engine_error(&e),
            }
        }
        ClientMessage::AddSlot { court_id, weekday, date, opening, closing } => {
            let kind = match (weekday, date) {
                (Some(day), None) => match day.parse::<Weekday>() {
                    Ok(w) => SlotKind::Weekly(w),
                    Err(_) => {
                        return protocol::error("invalid", format!("unknown weekday: {day}"))
                    }
                },
                (None, Some(d)) => SlotKind::DateOverride(d),
                _ => return protocol::error("invalid", "provide exactly one of weekday or date"),
            };
            match engine.add_slot(court_id, kind, opening, closing).await {
                Ok(id) => protocol::success_with(json!({"slot_id": id})),
                Err(e) => protocol::engine_error(&e),
            }
        }
        ClientMessage::RemoveSlot { slot_id } => match engine.remove_slot(slot_id).await {
            Ok(()) => protocol::success(),
            Err(e) => protocol::engine_error(&e),
        },
        ClientMessage::CreateEquipment { name } => match engine.create_equipment(name).await {
            Ok(id) => protocol::success_with(json!({"equipment_id": id})),
            Err(e) => protocol::engine_error(&e),
        },
        ClientMessage::AssignEquipment { equipment_id, account_id } => {
            match engine.assign_equipment(equipment_id, account_id).await {
                Ok(()) => protocol::success(),
                Err(e) => protocol::engine_error(&e),
            }
        }
        ClientMessage::ReturnEquipment { equipment_id, account_id } => {
            match engine.return_equipment(equipment_id, account_id).await {
                Ok(()) => protocol::success(),
                Err(e) => protocol::engine_error(&e),
            }
        }
        ClientMessage::Equipment => {
            protocol::success_with(json!({"equipment": engine.list_equipment()}))
        }
        // Non-admin variants never reach here.
        _ => protocol::error("invalid", "unsupported message"),
    }
}

/// Join a court's broadcast group and spawn the forwarder that copies its
/// messages into this connection's outbox.
fn subscribe(
    engine: &Arc<Engine>,
    session: &mut Session,
    outbox: &mpsc::Sender<String>,
    court_id: Uuid,
) -> Value {
    if session.subs.contains_key(&court_id) {
        return protocol::success();
    }
    if session.subs.len() >= MAX_SUBS_PER_CONNECTION {
        return protocol::error("invalid", "too many subscriptions");
    }

    let mut rx = engine.notify.subscribe(court_id);
    let tx = outbox.clone();
    let handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(broadcast) => {
                    let Ok(line) = serde_json::to_string(&broadcast) else { continue };
                    if tx.send(line).await.is_err() {
                        break; // connection gone
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("subscriber lagged, dropped {skipped} broadcasts");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    session.subs.insert(court_id, handle);
    protocol::success()
}
