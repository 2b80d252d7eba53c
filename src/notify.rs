use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::gates::{GateError, NotificationGate};
use crate::model::*;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushKind {
    AppointmentRequested,
    StatusChanged,
}

/// Real-time message delivered to one user's subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Push {
    pub kind: PushKind,
    pub recipient: UserId,
    pub appointment: Appointment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apartment_title: Option<String>,
}

/// Broadcast hub for per-user push channels.
pub struct NotifyHub {
    channels: DashMap<UserId, broadcast::Sender<Push>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to pushes for a user. Creates the channel if needed.
    pub fn subscribe(&self, user: UserId) -> broadcast::Receiver<Push> {
        let sender = self
            .channels
            .entry(user)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish to the recipient's channel. Returns how many receivers got it.
    pub fn send(&self, push: Push) -> usize {
        match self.channels.get(&push.recipient) {
            Some(sender) => sender.send(push).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop channels nobody listens to any more.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

/// `NotificationGate` that fans notices out to connected clients.
pub struct PushNotifier {
    hub: Arc<NotifyHub>,
}

impl PushNotifier {
    pub fn new(hub: Arc<NotifyHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl NotificationGate for PushNotifier {
    async fn notify_landlord_of_request(
        &self,
        appointment: &Appointment,
        apartment: &Apartment,
    ) -> Result<(), GateError> {
        let delivered = self.hub.send(Push {
            kind: PushKind::AppointmentRequested,
            recipient: appointment.landlord_id,
            appointment: appointment.clone(),
            apartment_title: Some(apartment.title.clone()),
        });
        tracing::debug!(
            "viewing request {} pushed to landlord {} ({delivered} receivers)",
            appointment.id,
            appointment.landlord_id
        );
        Ok(())
    }

    async fn notify_status_change(
        &self,
        appointment: &Appointment,
        recipient: UserId,
    ) -> Result<(), GateError> {
        let delivered = self.hub.send(Push {
            kind: PushKind::StatusChanged,
            recipient,
            appointment: appointment.clone(),
            apartment_title: None,
        });
        tracing::debug!(
            "appointment {} is now {}, pushed to {recipient} ({delivered} receivers)",
            appointment.id,
            appointment.status
        );
        Ok(())
    }
}
