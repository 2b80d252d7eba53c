mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod slots;

pub use availability::validate_windows;
pub use conflict::now;
pub(crate) use conflict::validate_future;
pub use error::EngineError;
pub use mutations::{AppointmentRequest, Transition};
pub use slots::{fallback_window, generate_slots, tile_window};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedApartmentBook = Arc<RwLock<ApartmentBook>>;
pub type SharedSchedule = Arc<RwLock<LandlordSchedule>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// In-memory scheduling state backed by the WAL.
///
/// Appointments are grouped per apartment behind one `RwLock` each; every
/// mutation on an apartment holds its write lock from validation through the
/// WAL append, which is what keeps two requests from booking the same slot.
pub struct Engine {
    pub apartments: DashMap<ApartmentId, SharedApartmentBook>,
    pub schedules: DashMap<UserId, SharedSchedule>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: appointment id → apartment id
    pub(super) appointment_index: DashMap<Ulid, ApartmentId>,
    /// Held shared by mutations, exclusively by compaction.
    pub(super) commit_gate: RwLock<()>,
}

fn apply_to_book(book: &mut ApartmentBook, event: &Event, index: &DashMap<Ulid, ApartmentId>) {
    match event {
        Event::AppointmentRequested { appointment } => {
            index.insert(appointment.id, appointment.apartment_id);
            book.insert_appointment(appointment.clone());
        }
        Event::AppointmentStatusChanged {
            id,
            status,
            landlord_notes,
            ..
        } => {
            if let Some(appointment) = book.get_mut(*id) {
                appointment.status = *status;
                appointment.landlord_notes = landlord_notes.clone();
            }
        }
        Event::AppointmentCancelled { id, .. } => {
            if let Some(appointment) = book.get_mut(*id) {
                appointment.status = AppointmentStatus::Cancelled;
            }
        }
        // Availability lives on the landlord schedule, not the apartment
        Event::AvailabilityReplaced { .. } => {}
    }
}

fn apply_to_schedule(schedule: &mut LandlordSchedule, event: &Event) {
    if let Event::AvailabilityReplaced { windows, .. } = event {
        schedule.windows = windows.clone();
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            apartments: DashMap::new(),
            schedules: DashMap::new(),
            wal_tx,
            appointment_index: DashMap::new(),
            commit_gate: RwLock::new(()),
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never use blocking_write here: this may run inside an async context.
        let mut replayed = 0usize;
        for event in &events {
            match event {
                Event::AvailabilityReplaced { landlord_id, .. } => {
                    let schedule = engine.schedule_entry(*landlord_id);
                    let Ok(mut guard) = schedule.try_write() else {
                        continue;
                    };
                    apply_to_schedule(&mut guard, event);
                }
                other => {
                    let Some(apartment_id) = event_apartment_id(other) else {
                        continue;
                    };
                    let book = engine.book_entry(apartment_id);
                    let Ok(mut guard) = book.try_write() else {
                        continue;
                    };
                    apply_to_book(&mut guard, other, &engine.appointment_index);
                }
            }
            replayed += 1;
        }
        if replayed > 0 {
            tracing::info!("replayed {replayed} events from {}", wal_path.display());
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_book(&self, apartment_id: &ApartmentId) -> Option<SharedApartmentBook> {
        self.apartments.get(apartment_id).map(|e| e.value().clone())
    }

    pub fn get_schedule(&self, landlord_id: &UserId) -> Option<SharedSchedule> {
        self.schedules.get(landlord_id).map(|e| e.value().clone())
    }

    pub(super) fn book_entry(&self, apartment_id: ApartmentId) -> SharedApartmentBook {
        self.apartments
            .entry(apartment_id)
            .or_insert_with(|| Arc::new(RwLock::new(ApartmentBook::new(apartment_id))))
            .value()
            .clone()
    }

    pub(super) fn schedule_entry(&self, landlord_id: UserId) -> SharedSchedule {
        self.schedules
            .entry(landlord_id)
            .or_insert_with(|| Arc::new(RwLock::new(LandlordSchedule::new(landlord_id))))
            .value()
            .clone()
    }

    /// WAL-append + apply on an apartment book the caller has write-locked.
    pub(super) async fn persist_to_book(
        &self,
        book: &mut ApartmentBook,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_book(book, event, &self.appointment_index);
        Ok(())
    }

    /// WAL-append + apply on a landlord schedule the caller has write-locked.
    pub(super) async fn persist_to_schedule(
        &self,
        schedule: &mut LandlordSchedule,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_schedule(schedule, event);
        Ok(())
    }

    /// Lookup appointment → apartment, acquire the apartment's write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ApartmentBook>, EngineError> {
        let apartment_id = self
            .appointment_index
            .get(appointment_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*appointment_id))?;
        let book = self
            .get_book(&apartment_id)
            .ok_or(EngineError::NotFound(*appointment_id))?;
        Ok(book.write_owned().await)
    }
}

/// Extract the apartment id from an appointment event.
fn event_apartment_id(event: &Event) -> Option<ApartmentId> {
    match event {
        Event::AppointmentRequested { appointment } => Some(appointment.apartment_id),
        Event::AppointmentStatusChanged { apartment_id, .. }
        | Event::AppointmentCancelled { apartment_id, .. } => Some(*apartment_id),
        Event::AvailabilityReplaced { .. } => None,
    }
}
