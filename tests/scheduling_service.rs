use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use viewings::catalog::Catalog;
use viewings::engine::{self, Engine};
use viewings::gates::{ApartmentDirectory, GateError, NotificationGate};
use viewings::model::*;
use viewings::service::{ErrorKind, Notice, NotificationDispatcher, SchedulingService};

// ── Test infrastructure ──────────────────────────────────────

/// Forwards every notice it is handed to the test.
struct RecordingNotifier {
    tx: mpsc::UnboundedSender<Notice>,
}

#[async_trait]
impl NotificationGate for RecordingNotifier {
    async fn notify_landlord_of_request(
        &self,
        appointment: &Appointment,
        apartment: &Apartment,
    ) -> Result<(), GateError> {
        let _ = self.tx.send(Notice::Requested {
            appointment: appointment.clone(),
            apartment: apartment.clone(),
        });
        Ok(())
    }

    async fn notify_status_change(
        &self,
        appointment: &Appointment,
        recipient: UserId,
    ) -> Result<(), GateError> {
        let _ = self.tx.send(Notice::StatusChanged {
            appointment: appointment.clone(),
            recipient,
        });
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait]
impl NotificationGate for FailingNotifier {
    async fn notify_landlord_of_request(
        &self,
        _appointment: &Appointment,
        _apartment: &Apartment,
    ) -> Result<(), GateError> {
        Err(GateError("smtp relay unreachable".into()))
    }

    async fn notify_status_change(
        &self,
        _appointment: &Appointment,
        _recipient: UserId,
    ) -> Result<(), GateError> {
        Err(GateError("smtp relay unreachable".into()))
    }
}

struct UnreachableDirectory;

#[async_trait]
impl ApartmentDirectory for UnreachableDirectory {
    async fn get_apartment(&self, _apartment_id: ApartmentId) -> Result<Option<Apartment>, GateError> {
        Err(GateError("listing service timed out".into()))
    }
}

struct Harness {
    service: SchedulingService,
    catalog: Arc<Catalog>,
    apartment: Apartment,
    landlord: UserId,
    tenant: UserId,
}

fn wal_path() -> PathBuf {
    let dir = std::env::temp_dir().join("viewings_test_service");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(format!("{}.wal", Ulid::new()))
}

/// Catalog with one apartment and one approved tenant.
fn harness(gate: Arc<dyn NotificationGate>) -> Harness {
    let catalog = Arc::new(Catalog::new());
    let landlord = Ulid::new();
    let tenant = Ulid::new();
    let apartment = Apartment {
        id: Ulid::new(),
        landlord_id: landlord,
        title: "Bright two-room flat".into(),
        address: "Canal Street 12".into(),
    };
    catalog.upsert_apartment(apartment.clone());
    catalog.set_approval(tenant, apartment.id, true);

    let engine = Arc::new(Engine::new(wal_path()).unwrap());
    let service = SchedulingService::new(
        engine,
        catalog.clone(),
        catalog.clone(),
        NotificationDispatcher::spawn(gate, 16),
    );
    Harness {
        service,
        catalog,
        apartment,
        landlord,
        tenant,
    }
}

fn recording_harness() -> (Harness, mpsc::UnboundedReceiver<Notice>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (harness(Arc::new(RecordingNotifier { tx })), rx)
}

async fn next_notice(rx: &mut mpsc::UnboundedReceiver<Notice>) -> Notice {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("notice not delivered in time")
        .expect("dispatcher stopped")
}

fn next_tuesday_at(h: u32, m: u32) -> NaiveDateTime {
    let mut date: NaiveDate = engine::now().date() + chrono::Duration::days(1);
    while date.weekday() != Weekday::Tue {
        date = date + chrono::Duration::days(1);
    }
    date.and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn request_notifies_the_landlord() {
    let (h, mut rx) = recording_harness();
    let starts_at = next_tuesday_at(14, 0);

    let appointment = assert_ok!(
        h.service
            .request_appointment(h.tenant, h.apartment.id, starts_at, Some("After work?".into()))
            .await
    );
    assert_eq!(appointment.landlord_id, h.landlord);
    assert_eq!(appointment.status, AppointmentStatus::Pending);

    match next_notice(&mut rx).await {
        Notice::Requested {
            appointment: noticed,
            apartment,
        } => {
            assert_eq!(noticed.id, appointment.id);
            assert_eq!(apartment, h.apartment);
        }
        other => panic!("unexpected notice: {other:?}"),
    }

    let mine = h.service.my_appointments_as_tenant(h.tenant).await;
    assert_eq!(mine, vec![appointment.clone()]);
    let theirs = h.service.my_appointments_as_landlord(h.landlord).await;
    assert_eq!(theirs, vec![appointment]);
}

#[tokio::test]
async fn unapproved_tenant_is_refused() {
    let (h, _rx) = recording_harness();
    let stranger = Ulid::new();
    let err = assert_err!(
        h.service
            .request_appointment(stranger, h.apartment.id, next_tuesday_at(14, 0), None)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert!(h.service.my_appointments_as_tenant(stranger).await.is_empty());

    // Approval granted later by the application subsystem.
    h.catalog.set_approval(stranger, h.apartment.id, true);
    assert_ok!(
        h.service
            .request_appointment(stranger, h.apartment.id, next_tuesday_at(14, 0), None)
            .await
    );
}

#[tokio::test]
async fn unknown_apartment_is_not_found() {
    let (h, _rx) = recording_harness();
    let missing = Ulid::new();
    let err = assert_err!(
        h.service
            .request_appointment(h.tenant, missing, next_tuesday_at(14, 0), None)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = assert_err!(
        h.service
            .available_slots(missing, next_tuesday_at(0, 0).date())
            .await
    );
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn past_date_fails_before_any_lookup() {
    let (h, _rx) = recording_harness();
    let yesterday = engine::now() - chrono::Duration::days(1);
    let err = assert_err!(
        h.service
            .request_appointment(h.tenant, Ulid::new(), yesterday, None)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.to_string(), "Appointment date must be in the future");
}

#[tokio::test]
async fn double_booking_surfaces_conflict() {
    let (h, _rx) = recording_harness();
    let other_tenant = Ulid::new();
    h.catalog.set_approval(other_tenant, h.apartment.id, true);
    let starts_at = next_tuesday_at(15, 30);

    assert_ok!(
        h.service
            .request_appointment(h.tenant, h.apartment.id, starts_at, None)
            .await
    );
    let err = assert_err!(
        h.service
            .request_appointment(other_tenant, h.apartment.id, starts_at, None)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.to_string().contains("This time slot is already booked"));
}

#[tokio::test]
async fn status_change_notifies_the_tenant() {
    let (h, mut rx) = recording_harness();
    let appointment = assert_ok!(
        h.service
            .request_appointment(h.tenant, h.apartment.id, next_tuesday_at(10, 0), None)
            .await
    );
    next_notice(&mut rx).await;

    let err = assert_err!(
        h.service
            .update_status(h.tenant, appointment.id, AppointmentStatus::Confirmed, None)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert!(err.to_string().contains("not the landlord"));

    let confirmed = assert_ok!(
        h.service
            .update_status(
                h.landlord,
                appointment.id,
                AppointmentStatus::Confirmed,
                Some("See you there".into()),
            )
            .await
    );
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

    match next_notice(&mut rx).await {
        Notice::StatusChanged {
            appointment,
            recipient,
        } => {
            assert_eq!(recipient, h.tenant);
            assert_eq!(appointment.status, AppointmentStatus::Confirmed);
            assert_eq!(appointment.landlord_notes.as_deref(), Some("See you there"));
        }
        other => panic!("unexpected notice: {other:?}"),
    }
}

#[tokio::test]
async fn cancel_notifies_the_other_party_once() {
    let (h, mut rx) = recording_harness();
    let appointment = assert_ok!(
        h.service
            .request_appointment(h.tenant, h.apartment.id, next_tuesday_at(11, 0), None)
            .await
    );
    next_notice(&mut rx).await;

    let err = assert_err!(h.service.cancel(Ulid::new(), appointment.id).await);
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let cancelled = assert_ok!(h.service.cancel(h.tenant, appointment.id).await);
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    match next_notice(&mut rx).await {
        Notice::StatusChanged { recipient, .. } => assert_eq!(recipient, h.landlord),
        other => panic!("unexpected notice: {other:?}"),
    }

    // Second cancel is a no-op and stays quiet.
    assert_ok!(h.service.cancel(h.landlord, appointment.id).await);
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn failing_notifier_never_rolls_back() {
    let h = harness(Arc::new(FailingNotifier));
    let starts_at = next_tuesday_at(9, 30);

    let appointment = assert_ok!(
        h.service
            .request_appointment(h.tenant, h.apartment.id, starts_at, None)
            .await
    );
    assert_ok!(
        h.service
            .update_status(h.landlord, appointment.id, AppointmentStatus::Confirmed, None)
            .await
    );

    let stored = h.service.my_appointments_as_landlord(h.landlord).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, AppointmentStatus::Confirmed);

    let slots = assert_ok!(h.service.available_slots(h.apartment.id, starts_at.date()).await);
    let slot = slots.iter().find(|s| s.start == starts_at).unwrap();
    assert!(!slot.is_available);
}

#[tokio::test]
async fn slots_use_the_apartments_landlord() {
    let (h, _rx) = recording_harness();
    let windows = assert_ok!(
        h.service
            .set_my_availability(
                h.landlord,
                vec![WindowSpec {
                    day_of_week: 2,
                    start_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
                }],
            )
            .await
    );
    assert_eq!(h.service.my_availability(h.landlord).await, windows);

    let date = next_tuesday_at(0, 0).date();
    let slots = assert_ok!(h.service.available_slots(h.apartment.id, date).await);
    let starts: Vec<_> = slots.iter().map(|s| s.start.time()).collect();
    assert_eq!(
        starts,
        vec![
            NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        ]
    );

    let err = assert_err!(
        h.service
            .set_my_availability(
                h.landlord,
                vec![WindowSpec {
                    day_of_week: 2,
                    start_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                }],
            )
            .await
    );
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.service.my_availability(h.landlord).await, windows);
}

#[tokio::test]
async fn unreachable_directory_is_upstream_error() {
    let catalog = Arc::new(Catalog::new());
    let tenant = Ulid::new();
    let apartment_id = Ulid::new();
    catalog.set_approval(tenant, apartment_id, true);
    let (tx, _rx) = mpsc::unbounded_channel();
    let service = SchedulingService::new(
        Arc::new(Engine::new(wal_path()).unwrap()),
        Arc::new(UnreachableDirectory),
        catalog,
        NotificationDispatcher::spawn(Arc::new(RecordingNotifier { tx }), 16),
    );

    let err = assert_err!(
        service
            .request_appointment(tenant, apartment_id, next_tuesday_at(14, 0), None)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert!(err.to_string().contains("listing service timed out"));
}
