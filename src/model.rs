use std::collections::HashSet;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

/// Tenants and landlords are both identified by the user directory's ULID.
pub type UserId = Ulid;
pub type ApartmentId = Ulid;

/// Fixed length of a viewing, and therefore of a slot.
pub const SLOT_MINUTES: i64 = 30;

pub fn slot_duration() -> Duration {
    Duration::minutes(SLOT_MINUTES)
}

/// 0 = Sunday … 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Recurring weekly range during which a landlord accepts viewings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Ulid,
    pub landlord_id: UserId,
    /// 0 = Sunday … 6 = Saturday.
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

/// Caller-supplied shape of a window before ids and timestamps are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
    /// Administrative terminal state; nothing in this crate moves an appointment here on its own.
    Completed,
}

impl AppointmentStatus {
    /// Everything except Cancelled and Rejected keeps the slot occupied.
    pub fn holds_slot(self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Rejected => "rejected",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A viewing request for one apartment at one exact slot start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    /// Opaque token handed to other systems instead of `id`.
    pub correlation_id: Uuid,
    pub apartment_id: ApartmentId,
    pub tenant_id: UserId,
    pub landlord_id: UserId,
    pub starts_at: NaiveDateTime,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub tenant_notes: Option<String>,
    pub landlord_notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub created_by: UserId,
}

impl Appointment {
    pub fn ends_at(&self) -> NaiveDateTime {
        self.starts_at + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// True for the tenant and the landlord of this appointment.
    pub fn is_party(&self, user: UserId) -> bool {
        self.tenant_id == user || self.landlord_id == user
    }
}

/// A bookable candidate produced for one date. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub is_available: bool,
}

/// Catalog record for an apartment, owned by the listing subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Apartment {
    pub id: ApartmentId,
    pub landlord_id: UserId,
    pub title: String,
    pub address: String,
}

/// All appointments ever requested for one apartment.
#[derive(Debug, Clone)]
pub struct ApartmentBook {
    pub apartment_id: ApartmentId,
    /// Sorted by `starts_at`; equal starts keep insertion order.
    pub appointments: Vec<Appointment>,
}

impl ApartmentBook {
    pub fn new(apartment_id: ApartmentId) -> Self {
        Self {
            apartment_id,
            appointments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by `starts_at`.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.starts_at <= appointment.starts_at);
        self.appointments.insert(pos, appointment);
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments starting on `date`, any status.
    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Appointment> {
        let lo = self.appointments.partition_point(|a| a.starts_at.date() < date);
        let hi = self.appointments.partition_point(|a| a.starts_at.date() <= date);
        self.appointments[lo..hi].iter()
    }

    /// Start times on `date` that are held by a Pending/Confirmed/Completed appointment.
    pub fn booked_starts(&self, date: NaiveDate) -> HashSet<NaiveDateTime> {
        self.on_date(date)
            .filter(|a| a.status.holds_slot())
            .map(|a| a.starts_at)
            .collect()
    }

    /// Appointments still occupying a slot. Freed history does not count.
    pub fn holding_count(&self) -> usize {
        self.appointments
            .iter()
            .filter(|a| a.status.holds_slot())
            .count()
    }

    /// The appointment currently occupying `starts_at`, skipping `except`.
    pub fn holder_of(&self, starts_at: NaiveDateTime, except: Option<Ulid>) -> Option<&Appointment> {
        let lo = self.appointments.partition_point(|a| a.starts_at < starts_at);
        self.appointments[lo..]
            .iter()
            .take_while(|a| a.starts_at == starts_at)
            .find(|a| a.status.holds_slot() && Some(a.id) != except)
    }
}

/// A landlord's current window set.
#[derive(Debug, Clone)]
pub struct LandlordSchedule {
    pub landlord_id: UserId,
    pub windows: Vec<AvailabilityWindow>,
}

impl LandlordSchedule {
    pub fn new(landlord_id: UserId) -> Self {
        Self {
            landlord_id,
            windows: Vec::new(),
        }
    }

    pub fn active_windows(&self) -> impl Iterator<Item = &AvailabilityWindow> {
        self.windows.iter().filter(|w| w.is_active)
    }

    pub fn active_on(&self, day_of_week: u8) -> Vec<AvailabilityWindow> {
        self.active_windows()
            .filter(|w| w.day_of_week == day_of_week)
            .cloned()
            .collect()
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AvailabilityReplaced {
        landlord_id: UserId,
        windows: Vec<AvailabilityWindow>,
    },
    AppointmentRequested {
        appointment: Appointment,
    },
    AppointmentStatusChanged {
        id: Ulid,
        apartment_id: ApartmentId,
        status: AppointmentStatus,
        landlord_notes: Option<String>,
    },
    AppointmentCancelled {
        id: Ulid,
        apartment_id: ApartmentId,
    },
}
