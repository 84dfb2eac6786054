use serde::{Deserialize, Serialize};

use fundguard_core::OwnerServiceId;

/// Identity of an authenticated caller service.
///
/// The same identity owns the reservations the service opens.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServicePrincipal {
    service_id: OwnerServiceId,
}

impl ServicePrincipal {
    pub fn new(service_id: OwnerServiceId) -> Self {
        Self { service_id }
    }

    pub fn service_id(&self) -> OwnerServiceId {
        self.service_id
    }
}

impl core::fmt::Display for ServicePrincipal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "service:{}", self.service_id)
    }
}
