//! `fundguard-core`: balance and reservation domain rules.
//!
//! This crate contains **pure domain** logic (no IO, no storage, no HTTP).
//! Every engine implementation applies these rules while it holds the
//! appropriate row locks.

pub mod account;
pub mod clock;
pub mod error;
pub mod id;
pub mod reservation;

pub use account::Account;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, OwnerServiceId, ReservationId, UserId};
pub use reservation::{OpenReservation, Reservation, ReservationStatus};
