//! Seams to the subsystems this crate does not own: the apartment catalog,
//! rental-application approvals and outbound notifications.

use async_trait::async_trait;

use crate::model::*;

/// A collaborator could not answer (unreachable, timed out, malformed reply).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateError(pub String);

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "collaborator error: {}", self.0)
    }
}

impl std::error::Error for GateError {}

#[async_trait]
pub trait ApartmentDirectory: Send + Sync {
    /// `Ok(None)` when the apartment does not exist.
    async fn get_apartment(&self, apartment_id: ApartmentId) -> Result<Option<Apartment>, GateError>;
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn has_approved_application(
        &self,
        tenant_id: UserId,
        apartment_id: ApartmentId,
    ) -> Result<bool, GateError>;
}

/// Outbound notifications. Callers treat every error as best-effort and never retry.
#[async_trait]
pub trait NotificationGate: Send + Sync {
    async fn notify_landlord_of_request(
        &self,
        appointment: &Appointment,
        apartment: &Apartment,
    ) -> Result<(), GateError>;

    /// `recipient` is the party that did not make the change.
    async fn notify_status_change(
        &self,
        appointment: &Appointment,
        recipient: UserId,
    ) -> Result<(), GateError>;
}
