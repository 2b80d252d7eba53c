//! Caller-facing scheduling API. Resolves apartments and approvals through the
//! collaborator gates, delegates state changes to the engine and queues
//! best-effort notifications.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::engine::{self, AppointmentRequest, Engine, EngineError};
use crate::gates::{ApartmentDirectory, ApprovalGate, GateError, NotificationGate};
use crate::model::*;
use crate::observability::{NOTIFICATIONS_DROPPED_TOTAL, NOTIFICATIONS_FAILED_TOTAL};

#[derive(Debug)]
pub enum ServiceError {
    Validation(String),
    NotFound(String),
    Unauthorized(String),
    Conflict(String),
    Upstream(String),
    Storage(String),
}

/// Stable error category exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Unauthorized,
    Conflict,
    Upstream,
    Internal,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Unauthorized(_) => ErrorKind::Unauthorized,
            ServiceError::Conflict(_) => ErrorKind::Conflict,
            ServiceError::Upstream(_) => ErrorKind::Upstream,
            ServiceError::Storage(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Validation(msg)
            | ServiceError::NotFound(msg)
            | ServiceError::Unauthorized(msg)
            | ServiceError::Conflict(msg)
            | ServiceError::Upstream(msg) => f.write_str(msg),
            ServiceError::Storage(msg) => write!(f, "storage failure: {msg}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Validation(msg) => ServiceError::Validation(msg),
            EngineError::LimitExceeded(_) => ServiceError::Validation(e.to_string()),
            EngineError::NotFound(_) => ServiceError::NotFound(e.to_string()),
            EngineError::Unauthorized(msg) => ServiceError::Unauthorized(msg),
            EngineError::Conflict { .. } => ServiceError::Conflict(e.to_string()),
            EngineError::WalError(msg) => ServiceError::Storage(msg),
        }
    }
}

impl From<GateError> for ServiceError {
    fn from(e: GateError) -> Self {
        ServiceError::Upstream(e.to_string())
    }
}

// ── Notification dispatch ────────────────────────────────

#[derive(Debug, Clone)]
pub enum Notice {
    Requested {
        appointment: Appointment,
        apartment: Apartment,
    },
    StatusChanged {
        appointment: Appointment,
        recipient: UserId,
    },
}

/// Hands notices to a background task so a slow gate never stalls a booking.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Notice>,
}

impl NotificationDispatcher {
    /// Spawn the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(gate: Arc<dyn NotificationGate>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(dispatch_loop(gate, rx));
        Self { tx }
    }

    pub fn dispatch(&self, notice: Notice) {
        match self.tx.try_send(notice) {
            Ok(()) => {}
            Err(TrySendError::Full(notice)) => {
                metrics::counter!(NOTIFICATIONS_DROPPED_TOTAL).increment(1);
                warn!("notification queue full, dropping {}", describe(&notice));
            }
            Err(TrySendError::Closed(notice)) => {
                metrics::counter!(NOTIFICATIONS_DROPPED_TOTAL).increment(1);
                warn!("notification task gone, dropping {}", describe(&notice));
            }
        }
    }
}

fn describe(notice: &Notice) -> String {
    match notice {
        Notice::Requested { appointment, .. } => {
            format!("request notice for appointment {}", appointment.id)
        }
        Notice::StatusChanged {
            appointment,
            recipient,
        } => format!(
            "status notice for appointment {} to {recipient}",
            appointment.id
        ),
    }
}

async fn dispatch_loop(gate: Arc<dyn NotificationGate>, mut rx: mpsc::Receiver<Notice>) {
    while let Some(notice) = rx.recv().await {
        let result = match &notice {
            Notice::Requested {
                appointment,
                apartment,
            } => gate.notify_landlord_of_request(appointment, apartment).await,
            Notice::StatusChanged {
                appointment,
                recipient,
            } => gate.notify_status_change(appointment, *recipient).await,
        };
        if let Err(e) = result {
            metrics::counter!(NOTIFICATIONS_FAILED_TOTAL).increment(1);
            warn!("{} failed: {e}", describe(&notice));
        }
    }
    debug!("notification dispatcher stopped");
}

// ── Service ──────────────────────────────────────────────

pub struct SchedulingService {
    engine: Arc<Engine>,
    directory: Arc<dyn ApartmentDirectory>,
    approvals: Arc<dyn ApprovalGate>,
    notices: NotificationDispatcher,
}

impl SchedulingService {
    pub fn new(
        engine: Arc<Engine>,
        directory: Arc<dyn ApartmentDirectory>,
        approvals: Arc<dyn ApprovalGate>,
        notices: NotificationDispatcher,
    ) -> Self {
        Self {
            engine,
            directory,
            approvals,
            notices,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    async fn resolve_apartment(&self, apartment_id: ApartmentId) -> Result<Apartment, ServiceError> {
        self.directory
            .get_apartment(apartment_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("apartment not found: {apartment_id}")))
    }

    /// Tenant books a viewing. Requires an approved rental application.
    pub async fn request_appointment(
        &self,
        actor: UserId,
        apartment_id: ApartmentId,
        starts_at: NaiveDateTime,
        tenant_notes: Option<String>,
    ) -> Result<Appointment, ServiceError> {
        engine::validate_future(starts_at, engine::now())?;
        let apartment = self.resolve_apartment(apartment_id).await?;
        if !self
            .approvals
            .has_approved_application(actor, apartment_id)
            .await?
        {
            return Err(ServiceError::Unauthorized(format!(
                "tenant {actor} has no approved application for apartment {apartment_id}"
            )));
        }

        let appointment = self
            .engine
            .create_appointment(AppointmentRequest {
                apartment_id,
                tenant_id: actor,
                landlord_id: apartment.landlord_id,
                starts_at,
                tenant_notes,
                created_by: actor,
            })
            .await?;
        info!(
            "appointment {} requested by {actor} for {apartment_id} at {starts_at}",
            appointment.id
        );

        self.notices.dispatch(Notice::Requested {
            appointment: appointment.clone(),
            apartment,
        });
        Ok(appointment)
    }

    pub async fn my_appointments_as_tenant(&self, actor: UserId) -> Vec<Appointment> {
        self.engine.appointments_for_tenant(actor).await
    }

    pub async fn my_appointments_as_landlord(&self, actor: UserId) -> Vec<Appointment> {
        self.engine.appointments_for_landlord(actor).await
    }

    pub async fn update_status(
        &self,
        actor: UserId,
        appointment_id: Ulid,
        status: AppointmentStatus,
        landlord_notes: Option<String>,
    ) -> Result<Appointment, ServiceError> {
        let transition = self
            .engine
            .update_status(appointment_id, status, actor, landlord_notes)
            .await?;
        let appointment = transition.appointment;
        info!(
            "appointment {appointment_id}: {} -> {}",
            transition.previous, appointment.status
        );
        self.notices.dispatch(Notice::StatusChanged {
            recipient: appointment.tenant_id,
            appointment: appointment.clone(),
        });
        Ok(appointment)
    }

    /// Either party cancels. The other party is notified once.
    pub async fn cancel(
        &self,
        actor: UserId,
        appointment_id: Ulid,
    ) -> Result<Appointment, ServiceError> {
        let transition = self.engine.cancel_appointment(appointment_id, actor).await?;
        let changed = transition.changed();
        let appointment = transition.appointment;
        if changed {
            info!("appointment {appointment_id} cancelled by {actor}");
            let recipient = if actor == appointment.tenant_id {
                appointment.landlord_id
            } else {
                appointment.tenant_id
            };
            self.notices.dispatch(Notice::StatusChanged {
                appointment: appointment.clone(),
                recipient,
            });
        }
        Ok(appointment)
    }

    /// Viewing slots of one apartment on `date`, using its landlord's windows.
    pub async fn available_slots(
        &self,
        apartment_id: ApartmentId,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, ServiceError> {
        let apartment = self.resolve_apartment(apartment_id).await?;
        Ok(self
            .engine
            .available_slots(apartment_id, apartment.landlord_id, date)
            .await)
    }

    pub async fn my_availability(&self, actor: UserId) -> Vec<AvailabilityWindow> {
        self.engine.get_availability(actor).await
    }

    pub async fn set_my_availability(
        &self,
        actor: UserId,
        windows: Vec<WindowSpec>,
    ) -> Result<Vec<AvailabilityWindow>, ServiceError> {
        let windows = self.engine.set_availability(actor, windows).await?;
        info!("landlord {actor} replaced availability ({} windows)", windows.len());
        Ok(windows)
    }
}
