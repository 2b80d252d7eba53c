//! Newline-delimited JSON protocol. One request per line, one reply per
//! request, push frames interleaved for subscribed users.
//!
//! The handshake password decides the connection's [`Role`]. Only upstream
//! connections may send `sync_apartment` and `sync_approval`, since those
//! feed the approval check that guards `request_appointment`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::auth::{Authenticator, Role};
use crate::catalog::Catalog;
use crate::limits::MAX_FRAME_LEN;
use crate::model::*;
use crate::notify::{NotifyHub, Push};
use crate::observability::{self, AUTH_FAILURES_TOTAL, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::service::{ErrorKind, SchedulingService, ServiceError};

const PUSH_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Auth {
        password: String,
    },
    RequestAppointment {
        actor: UserId,
        apartment_id: ApartmentId,
        starts_at: NaiveDateTime,
        #[serde(default)]
        notes: Option<String>,
    },
    MyAppointmentsAsTenant {
        actor: UserId,
    },
    MyAppointmentsAsLandlord {
        actor: UserId,
    },
    UpdateStatus {
        actor: UserId,
        appointment_id: Ulid,
        status: AppointmentStatus,
        #[serde(default)]
        landlord_notes: Option<String>,
    },
    Cancel {
        actor: UserId,
        appointment_id: Ulid,
    },
    Slots {
        apartment_id: ApartmentId,
        date: NaiveDate,
    },
    GetAvailability {
        actor: UserId,
    },
    SetAvailability {
        actor: UserId,
        windows: Vec<WindowSpec>,
    },
    SyncApartment {
        apartment: Apartment,
    },
    SyncApproval {
        tenant_id: UserId,
        apartment_id: ApartmentId,
        approved: bool,
    },
    Subscribe {
        actor: UserId,
    },
    Unsubscribe {
        actor: UserId,
    },
}

impl Request {
    /// Catalog updates from the listing and application systems.
    pub fn is_sync(&self) -> bool {
        matches!(self, Request::SyncApartment { .. } | Request::SyncApproval { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Ok { data: Value },
    Error { kind: ErrorKind, message: String },
    Push(Push),
}

impl Reply {
    fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Reply::Error {
            kind,
            message: message.into(),
        }
    }
}

impl From<Result<Value, ServiceError>> for Reply {
    fn from(result: Result<Value, ServiceError>) -> Self {
        match result {
            Ok(data) => Reply::Ok { data },
            Err(e) => Reply::error(e.kind(), e.to_string()),
        }
    }
}

#[derive(Debug)]
pub enum WireError {
    Codec(LinesCodecError),
    Encode(serde_json::Error),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Codec(e) => write!(f, "codec error: {e}"),
            WireError::Encode(e) => write!(f, "encode error: {e}"),
        }
    }
}

impl std::error::Error for WireError {}

/// Everything a connection needs, shared across connections.
pub struct WireContext {
    pub service: Arc<SchedulingService>,
    pub catalog: Arc<Catalog>,
    pub hub: Arc<NotifyHub>,
    pub authenticator: Authenticator,
}

type Subscriptions = HashMap<UserId, JoinHandle<()>>;

/// Serve one client until it disconnects. The first frame must authenticate.
pub async fn process_connection<S>(socket: S, ctx: Arc<WireContext>) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_LEN));

    let Some(role) = handshake(&mut framed, &ctx).await? else {
        return Ok(());
    };

    let (push_tx, mut push_rx) = mpsc::channel::<Push>(PUSH_BUFFER);
    let mut subscriptions = Subscriptions::new();

    let result = loop {
        tokio::select! {
            frame = framed.next() => {
                let line = match frame {
                    None => break Ok(()),
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let reply = Reply::error(ErrorKind::Validation, "frame too long");
                        if let Err(e) = send(&mut framed, &reply).await {
                            break Err(e);
                        }
                        continue;
                    }
                    Some(Err(e)) => break Err(WireError::Codec(e)),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = match serde_json::from_str::<Request>(&line) {
                    Ok(req) => handle_request(&ctx, role, req, &push_tx, &mut subscriptions).await,
                    Err(e) => Reply::error(ErrorKind::Validation, format!("malformed request: {e}")),
                };
                if let Err(e) = send(&mut framed, &reply).await {
                    break Err(e);
                }
            }
            Some(push) = push_rx.recv() => {
                if let Err(e) = send(&mut framed, &Reply::Push(push)).await {
                    break Err(e);
                }
            }
        }
    };

    for (_, handle) in subscriptions {
        handle.abort();
    }
    ctx.hub.prune();
    result
}

async fn handshake<S>(
    framed: &mut Framed<S, LinesCodec>,
    ctx: &WireContext,
) -> Result<Option<Role>, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = match framed.next().await {
        None => return Ok(None),
        Some(frame) => frame.map_err(WireError::Codec)?,
    };
    let reply = match serde_json::from_str::<Request>(&line) {
        Ok(Request::Auth { password }) => match ctx.authenticator.verify(&password) {
            Some(role) => {
                let upstream = role == Role::Upstream;
                send(framed, &Reply::Ok {
                    data: json!({ "authenticated": true, "upstream": upstream }),
                })
                .await?;
                return Ok(Some(role));
            }
            None => {
                metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
                Reply::error(ErrorKind::Unauthorized, "password authentication failed")
            }
        },
        Ok(_) => Reply::error(ErrorKind::Unauthorized, "authenticate first"),
        Err(e) => Reply::error(ErrorKind::Validation, format!("malformed request: {e}")),
    };
    send(framed, &reply).await?;
    Ok(None)
}

async fn handle_request(
    ctx: &WireContext,
    role: Role,
    req: Request,
    push_tx: &mpsc::Sender<Push>,
    subscriptions: &mut Subscriptions,
) -> Reply {
    let op = observability::request_label(&req);
    let start = Instant::now();
    let reply: Reply = execute(ctx, role, req, push_tx, subscriptions).await.into();
    let status = match &reply {
        Reply::Ok { .. } => "ok",
        _ => "error",
    };
    metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
    debug!("{op} -> {status}");
    reply
}

async fn execute(
    ctx: &WireContext,
    role: Role,
    req: Request,
    push_tx: &mpsc::Sender<Push>,
    subscriptions: &mut Subscriptions,
) -> Result<Value, ServiceError> {
    if req.is_sync() && role != Role::Upstream {
        return Err(ServiceError::Unauthorized(
            "catalog sync requires the upstream credential".into(),
        ));
    }
    let service = &ctx.service;
    match req {
        Request::Auth { .. } => Err(ServiceError::Validation("already authenticated".into())),
        Request::RequestAppointment {
            actor,
            apartment_id,
            starts_at,
            notes,
        } => encode(
            service
                .request_appointment(actor, apartment_id, starts_at, notes)
                .await?,
        ),
        Request::MyAppointmentsAsTenant { actor } => {
            encode(service.my_appointments_as_tenant(actor).await)
        }
        Request::MyAppointmentsAsLandlord { actor } => {
            encode(service.my_appointments_as_landlord(actor).await)
        }
        Request::UpdateStatus {
            actor,
            appointment_id,
            status,
            landlord_notes,
        } => encode(
            service
                .update_status(actor, appointment_id, status, landlord_notes)
                .await?,
        ),
        Request::Cancel {
            actor,
            appointment_id,
        } => encode(service.cancel(actor, appointment_id).await?),
        Request::Slots { apartment_id, date } => {
            encode(service.available_slots(apartment_id, date).await?)
        }
        Request::GetAvailability { actor } => encode(service.my_availability(actor).await),
        Request::SetAvailability { actor, windows } => {
            encode(service.set_my_availability(actor, windows).await?)
        }
        Request::SyncApartment { apartment } => {
            let id = apartment.id;
            ctx.catalog.upsert_apartment(apartment);
            Ok(json!({ "apartment_id": id }))
        }
        Request::SyncApproval {
            tenant_id,
            apartment_id,
            approved,
        } => {
            ctx.catalog.set_approval(tenant_id, apartment_id, approved);
            Ok(json!({ "approved": approved }))
        }
        Request::Subscribe { actor } => {
            subscriptions
                .entry(actor)
                .or_insert_with(|| forward_pushes(&ctx.hub, actor, push_tx.clone()));
            Ok(json!({ "subscribed": actor }))
        }
        Request::Unsubscribe { actor } => {
            if let Some(handle) = subscriptions.remove(&actor) {
                handle.abort();
                ctx.hub.prune();
            }
            Ok(json!({ "unsubscribed": actor }))
        }
    }
}

/// Subscribes synchronously, so pushes sent after this returns are not missed.
fn forward_pushes(hub: &NotifyHub, user: UserId, tx: mpsc::Sender<Push>) -> JoinHandle<()> {
    let mut rx = hub.subscribe(user);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(push) => {
                    if tx.send(push).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("push subscriber for {user} lagged, {n} pushes lost");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn encode<T: Serialize>(value: T) -> Result<Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::Storage(format!("encode reply: {e}")))
}

async fn send<S>(framed: &mut Framed<S, LinesCodec>, reply: &Reply) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = serde_json::to_string(reply).map_err(WireError::Encode)?;
    framed.send(line).await.map_err(WireError::Codec)
}
