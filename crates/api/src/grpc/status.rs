use tonic::{Code, Status};
use tracing::error;

use fundguard_core::DomainError;
use fundguard_infra::balance::EngineError;

pub fn engine_error_to_status(err: EngineError) -> Status {
    match err {
        EngineError::Domain(e) => domain_error_to_status(e),
        EngineError::Storage(msg) => {
            error!(error = %msg, "storage failure");
            Status::internal("storage failure")
        }
    }
}

/// One code per outcome, mirroring the HTTP statuses.
pub fn domain_error_to_status(err: DomainError) -> Status {
    let message = err.to_string();
    let code = match err {
        DomainError::NotFound => Code::NotFound,
        DomainError::InsufficientFunds => Code::FailedPrecondition,
        DomainError::InvalidState(_) => Code::Aborted,
        DomainError::Expired => Code::OutOfRange,
        DomainError::Validation(_) | DomainError::InvalidId(_) => Code::InvalidArgument,
        DomainError::InvariantViolation(_) => {
            error!(error = %message, "invariant violation");
            Code::Internal
        }
    };
    Status::new(code, message)
}
