use chrono::NaiveDateTime;
use tokio::sync::oneshot;
use ulid::Ulid;
use uuid::Uuid;

use crate::limits::*;
use crate::model::*;

use super::availability::{sort_windows, validate_windows};
use super::conflict::{check_slot_free, now, validate_future, validate_notes};
use super::{Engine, EngineError, SharedApartmentBook, SharedSchedule, WalCommand};

/// Input for `create_appointment`. The landlord comes from the apartment's
/// catalog record, resolved by the caller.
#[derive(Debug, Clone)]
pub struct AppointmentRequest {
    pub apartment_id: ApartmentId,
    pub tenant_id: UserId,
    pub landlord_id: UserId,
    pub starts_at: NaiveDateTime,
    pub tenant_notes: Option<String>,
    pub created_by: UserId,
}

/// Result of a status write: the stored appointment and the status it left.
#[derive(Debug, Clone)]
pub struct Transition {
    pub appointment: Appointment,
    pub previous: AppointmentStatus,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.previous != self.appointment.status
    }
}

impl Engine {
    /// Replace the landlord's whole window set in one WAL event.
    pub async fn set_availability(
        &self,
        landlord_id: UserId,
        windows: Vec<WindowSpec>,
    ) -> Result<Vec<AvailabilityWindow>, EngineError> {
        validate_windows(&windows)?;
        let created_at = now();
        let mut windows: Vec<AvailabilityWindow> = windows
            .into_iter()
            .map(|w| AvailabilityWindow {
                id: Ulid::new(),
                landlord_id,
                day_of_week: w.day_of_week,
                start_time: w.start_time,
                end_time: w.end_time,
                is_active: true,
                created_at,
            })
            .collect();
        sort_windows(&mut windows);

        let _commit = self.commit_gate.read().await;
        let schedule = self.schedule_entry(landlord_id);
        let mut guard = schedule.write().await;
        let event = Event::AvailabilityReplaced {
            landlord_id,
            windows: windows.clone(),
        };
        self.persist_to_schedule(&mut guard, &event).await?;
        Ok(windows)
    }

    pub async fn create_appointment(
        &self,
        request: AppointmentRequest,
    ) -> Result<Appointment, EngineError> {
        self.create_appointment_at(request, now()).await
    }

    /// `create_appointment` against an explicit clock reading.
    pub async fn create_appointment_at(
        &self,
        request: AppointmentRequest,
        now: NaiveDateTime,
    ) -> Result<Appointment, EngineError> {
        validate_future(request.starts_at, now)?;
        validate_notes(&request.tenant_notes)?;

        let _commit = self.commit_gate.read().await;
        let book = self.book_entry(request.apartment_id);
        let mut guard = book.write().await;
        if guard.holding_count() >= MAX_ACTIVE_APPOINTMENTS_PER_APARTMENT {
            return Err(EngineError::LimitExceeded("too many open appointments on apartment"));
        }

        check_slot_free(&guard, request.starts_at, None)?;

        let appointment = Appointment {
            id: Ulid::new(),
            correlation_id: Uuid::new_v4(),
            apartment_id: request.apartment_id,
            tenant_id: request.tenant_id,
            landlord_id: request.landlord_id,
            starts_at: request.starts_at,
            duration_minutes: SLOT_MINUTES as u32,
            status: AppointmentStatus::Pending,
            tenant_notes: request.tenant_notes,
            landlord_notes: None,
            created_at: now,
            created_by: request.created_by,
        };
        let event = Event::AppointmentRequested {
            appointment: appointment.clone(),
        };
        self.persist_to_book(&mut guard, &event).await?;
        metrics::counter!(crate::observability::APPOINTMENTS_CREATED_TOTAL).increment(1);
        Ok(appointment)
    }

    /// Landlord-only status overwrite. Any target status is accepted, but
    /// reactivating a freed slot still has to win the slot.
    pub async fn update_status(
        &self,
        id: Ulid,
        status: AppointmentStatus,
        acting_landlord: UserId,
        landlord_notes: Option<String>,
    ) -> Result<Transition, EngineError> {
        validate_notes(&landlord_notes)?;

        let _commit = self.commit_gate.read().await;
        let mut guard = self.resolve_appointment_write(&id).await?;
        let current = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if current.landlord_id != acting_landlord {
            return Err(EngineError::Unauthorized(format!(
                "only the landlord can update appointment status: {acting_landlord} is not the landlord"
            )));
        }
        let previous = current.status;
        if status.holds_slot() && !previous.holds_slot() {
            check_slot_free(&guard, current.starts_at, Some(id))?;
        }

        let event = Event::AppointmentStatusChanged {
            id,
            apartment_id: guard.apartment_id,
            status,
            landlord_notes,
        };
        self.persist_to_book(&mut guard, &event).await?;
        let appointment = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        Ok(Transition { appointment, previous })
    }

    /// Tenant- or landlord-initiated cancellation. Cancelled and Rejected are
    /// terminal, so cancelling either is a no-op.
    pub async fn cancel_appointment(
        &self,
        id: Ulid,
        acting_user: UserId,
    ) -> Result<Transition, EngineError> {
        let _commit = self.commit_gate.read().await;
        let mut guard = self.resolve_appointment_write(&id).await?;
        let current = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if !current.is_party(acting_user) {
            return Err(EngineError::Unauthorized(format!(
                "{acting_user} is neither the tenant nor the landlord of this appointment"
            )));
        }
        let previous = current.status;
        if !previous.holds_slot() {
            return Ok(Transition {
                appointment: current.clone(),
                previous,
            });
        }

        let event = Event::AppointmentCancelled {
            id,
            apartment_id: guard.apartment_id,
        };
        self.persist_to_book(&mut guard, &event).await?;
        let appointment = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        Ok(Transition { appointment, previous })
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // No mutation can append while we hold the gate exclusively.
        let _exclusive = self.commit_gate.write().await;
        let mut events = Vec::new();

        let schedules: Vec<SharedSchedule> =
            self.schedules.iter().map(|e| e.value().clone()).collect();
        for schedule in schedules {
            let guard = schedule.read().await;
            if !guard.windows.is_empty() {
                events.push(Event::AvailabilityReplaced {
                    landlord_id: guard.landlord_id,
                    windows: guard.windows.clone(),
                });
            }
        }

        // Each appointment is re-emitted with its current status folded in.
        let books: Vec<SharedApartmentBook> =
            self.apartments.iter().map(|e| e.value().clone()).collect();
        for book in books {
            let guard = book.read().await;
            for appointment in &guard.appointments {
                events.push(Event::AppointmentRequested {
                    appointment: appointment.clone(),
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
