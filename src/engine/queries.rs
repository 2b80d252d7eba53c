use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::slots::generate_slots;
use super::{Engine, SharedApartmentBook};

impl Engine {
    pub async fn get_appointment(&self, id: Ulid) -> Option<Appointment> {
        let apartment_id = self.appointment_index.get(&id).map(|e| *e.value())?;
        let book = self.get_book(&apartment_id)?;
        let guard = book.read().await;
        guard.get(id).cloned()
    }

    pub async fn appointments_for_tenant(&self, tenant_id: UserId) -> Vec<Appointment> {
        self.collect_appointments(|a| a.tenant_id == tenant_id).await
    }

    pub async fn appointments_for_landlord(&self, landlord_id: UserId) -> Vec<Appointment> {
        self.collect_appointments(|a| a.landlord_id == landlord_id).await
    }

    /// Scan every apartment book, ordered by start time.
    async fn collect_appointments(&self, keep: impl Fn(&Appointment) -> bool) -> Vec<Appointment> {
        // Clone the Arcs first: DashMap shard locks must not be held across an await.
        let books: Vec<SharedApartmentBook> =
            self.apartments.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for book in books {
            let guard = book.read().await;
            out.extend(guard.appointments.iter().filter(|a| keep(a)).cloned());
        }
        out.sort_by_key(|a| (a.starts_at, a.created_at));
        out
    }

    /// Active windows of one landlord. Never another landlord's.
    pub async fn get_availability(&self, landlord_id: UserId) -> Vec<AvailabilityWindow> {
        let Some(schedule) = self.get_schedule(&landlord_id) else {
            return Vec::new();
        };
        let guard = schedule.read().await;
        guard.active_windows().cloned().collect()
    }

    /// Slots of `date` for an apartment owned by `landlord_id`, booked ones flagged.
    pub async fn available_slots(
        &self,
        apartment_id: ApartmentId,
        landlord_id: UserId,
        date: NaiveDate,
    ) -> Vec<Slot> {
        let windows = match self.get_schedule(&landlord_id) {
            Some(schedule) => schedule.read().await.active_on(day_of_week(date)),
            None => Vec::new(),
        };
        let booked = match self.get_book(&apartment_id) {
            Some(book) => book.read().await.booked_starts(date),
            None => Default::default(),
        };
        generate_slots(&windows, date, &booked)
    }
}
