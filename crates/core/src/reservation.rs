use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::ensure_positive;
use crate::error::{DomainError, DomainResult};
use crate::id::{AccountId, OwnerServiceId, ReservationId};

/// Longest idempotency key accepted from callers.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Reservation lifecycle: `Active` moves exactly once to a terminal state.
///
/// There is no stored "expired" state; expiry is evaluated when confirming.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Active,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }
}

impl core::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ReservationStatus::Active),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown reservation status '{other}'"
            ))),
        }
    }
}

/// A time-boxed hold on part of an account's funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub account_id: AccountId,
    pub owner_service_id: OwnerServiceId,
    pub amount: i64,
    pub status: ReservationStatus,
    pub idempotency_key: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn ensure_active(&self) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidState(self.status));
        }
        Ok(())
    }

    /// Deadline is inclusive: confirming exactly at `expires_at` is allowed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// `Active → Confirmed`, unless terminal or past the deadline.
    ///
    /// An expired reservation stays `Active` and keeps its hold.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_active()?;
        if self.is_expired_at(now) {
            return Err(DomainError::Expired);
        }
        self.status = ReservationStatus::Confirmed;
        Ok(())
    }

    /// `Active → Cancelled`. No deadline check.
    pub fn cancel(&mut self) -> DomainResult<()> {
        self.ensure_active()?;
        self.status = ReservationStatus::Cancelled;
        Ok(())
    }
}

/// Command: open a reservation on behalf of an owner service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReservation {
    pub owner_service_id: OwnerServiceId,
    pub account_id: AccountId,
    pub amount: i64,
    pub idempotency_key: String,
    /// Only sets `expires_at`; does not bound the call itself.
    pub timeout: Duration,
}

impl OpenReservation {
    pub fn validate(&self) -> DomainResult<()> {
        self.validate_key()?;
        self.validate_terms()
    }

    /// Checks the idempotency key alone. Runs before the key lookup.
    pub fn validate_key(&self) -> DomainResult<()> {
        if self.idempotency_key.trim().is_empty() {
            return Err(DomainError::validation("idempotency_key cannot be empty"));
        }
        if self.idempotency_key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(DomainError::validation(format!(
                "idempotency_key longer than {MAX_IDEMPOTENCY_KEY_LEN} bytes"
            )));
        }
        Ok(())
    }

    /// Checks amount and timeout. A replayed key never reaches this, so a
    /// retry carrying different terms still gets the stored reservation.
    pub fn validate_terms(&self) -> DomainResult<()> {
        ensure_positive(self.amount)?;
        self.timeout_delta()?;
        Ok(())
    }

    pub fn expires_at(&self, now: DateTime<Utc>) -> DomainResult<DateTime<Utc>> {
        now.checked_add_signed(self.timeout_delta()?)
            .ok_or_else(|| DomainError::validation("timeout out of range"))
    }

    fn timeout_delta(&self) -> DomainResult<chrono::Duration> {
        chrono::Duration::from_std(self.timeout)
            .map_err(|_| DomainError::validation("timeout out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    fn active(expires_at: DateTime<Utc>) -> Reservation {
        Reservation {
            id: ReservationId::new(1),
            account_id: AccountId::new(1),
            owner_service_id: OwnerServiceId::new(9),
            amount: 400,
            status: ReservationStatus::Active,
            idempotency_key: "k1".to_string(),
            expires_at,
            created_at: t0(),
        }
    }

    fn open(amount: i64, key: &str) -> OpenReservation {
        OpenReservation {
            owner_service_id: OwnerServiceId::new(9),
            account_id: AccountId::new(1),
            amount,
            idempotency_key: key.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn confirm_before_deadline() {
        let mut r = active(t0() + chrono::Duration::seconds(30));
        r.confirm(t0()).unwrap();
        assert_eq!(r.status, ReservationStatus::Confirmed);
    }

    #[test]
    fn confirm_at_deadline_is_allowed() {
        let mut r = active(t0());
        r.confirm(t0()).unwrap();
    }

    #[test]
    fn confirm_after_deadline_keeps_reservation_active() {
        let mut r = active(t0());
        let err = r.confirm(t0() + chrono::Duration::milliseconds(1)).unwrap_err();
        assert_eq!(err, DomainError::Expired);
        assert_eq!(r.status, ReservationStatus::Active);
    }

    #[test]
    fn cancel_ignores_deadline() {
        let mut r = active(t0() - chrono::Duration::hours(1));
        r.cancel().unwrap();
        assert_eq!(r.status, ReservationStatus::Cancelled);
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut r = active(t0() + chrono::Duration::seconds(30));
        r.confirm(t0()).unwrap();
        assert_eq!(
            r.cancel(),
            Err(DomainError::InvalidState(ReservationStatus::Confirmed))
        );
        assert_eq!(
            r.confirm(t0()),
            Err(DomainError::InvalidState(ReservationStatus::Confirmed))
        );

        let mut r = active(t0() + chrono::Duration::seconds(30));
        r.cancel().unwrap();
        assert_eq!(
            r.confirm(t0()),
            Err(DomainError::InvalidState(ReservationStatus::Cancelled))
        );
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            ReservationStatus::Active,
            ReservationStatus::Confirmed,
            ReservationStatus::Cancelled,
        ] {
            assert_eq!(s.as_str().parse::<ReservationStatus>().unwrap(), s);
        }
        assert!("EXPIRED".parse::<ReservationStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&ReservationStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
    }

    #[test]
    fn open_validation() {
        open(1, "k").validate().unwrap();
        assert!(matches!(open(0, "k").validate(), Err(DomainError::Validation(_))));
        assert!(matches!(open(5, "  ").validate(), Err(DomainError::Validation(_))));
        let long = "x".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        assert!(matches!(open(5, &long).validate(), Err(DomainError::Validation(_))));

        let mut huge = open(5, "k");
        huge.timeout = Duration::from_secs(u64::MAX);
        assert!(matches!(huge.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn key_and_terms_validate_separately() {
        assert!(open(0, "k").validate_key().is_ok());
        assert!(matches!(open(0, "k").validate_terms(), Err(DomainError::Validation(_))));
        assert!(matches!(open(5, "").validate_key(), Err(DomainError::Validation(_))));
        assert!(open(5, "").validate_terms().is_ok());
    }

    #[test]
    fn expires_at_adds_timeout() {
        let cmd = open(5, "k");
        assert_eq!(cmd.expires_at(t0()).unwrap(), t0() + chrono::Duration::seconds(30));
    }
}
