use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use crate::gates::{ApartmentDirectory, ApprovalGate, GateError};
use crate::model::*;

/// Approved application for one tenant/apartment pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Approval {
    pub tenant_id: UserId,
    pub apartment_id: ApartmentId,
}

/// On-disk seed format.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub apartments: Vec<Apartment>,
    #[serde(default)]
    pub approvals: Vec<Approval>,
}

/// In-memory mirror of the listing and application subsystems, kept current
/// by upstream `sync_*` requests.
#[derive(Default)]
pub struct Catalog {
    apartments: DashMap<ApartmentId, Apartment>,
    approvals: DashSet<Approval>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let catalog = Self::new();
        for apartment in snapshot.apartments {
            catalog.upsert_apartment(apartment);
        }
        for approval in snapshot.approvals {
            catalog.approvals.insert(approval);
        }
        catalog
    }

    /// Load a JSON snapshot. A missing file yields an empty catalog.
    pub fn load(path: &Path) -> io::Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!("catalog {} not found, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(e),
        };
        let snapshot: CatalogSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::info!(
            "catalog {}: {} apartments, {} approvals",
            path.display(),
            snapshot.apartments.len(),
            snapshot.approvals.len()
        );
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn upsert_apartment(&self, apartment: Apartment) {
        self.apartments.insert(apartment.id, apartment);
    }

    pub fn set_approval(&self, tenant_id: UserId, apartment_id: ApartmentId, approved: bool) {
        let approval = Approval {
            tenant_id,
            apartment_id,
        };
        if approved {
            self.approvals.insert(approval);
        } else {
            self.approvals.remove(&approval);
        }
    }
}

#[async_trait]
impl ApartmentDirectory for Catalog {
    async fn get_apartment(&self, apartment_id: ApartmentId) -> Result<Option<Apartment>, GateError> {
        Ok(self.apartments.get(&apartment_id).map(|e| e.value().clone()))
    }
}

#[async_trait]
impl ApprovalGate for Catalog {
    async fn has_approved_application(
        &self,
        tenant_id: UserId,
        apartment_id: ApartmentId,
    ) -> Result<bool, GateError> {
        Ok(self.approvals.contains(&Approval {
            tenant_id,
            apartment_id,
        }))
    }
}
