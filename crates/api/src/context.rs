use fundguard_auth::ServicePrincipal;
use fundguard_core::OwnerServiceId;

/// Authenticated caller for a request.
///
/// Inserted by the auth middleware; present on every protected route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CallerContext {
    principal: ServicePrincipal,
}

impl CallerContext {
    pub fn new(principal: ServicePrincipal) -> Self {
        Self { principal }
    }

    pub fn principal(&self) -> ServicePrincipal {
        self.principal
    }

    pub fn service_id(&self) -> OwnerServiceId {
        self.principal.service_id()
    }
}
