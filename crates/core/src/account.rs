use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{AccountId, UserId};

/// Balance holder: spendable amount, its ceiling, and the sum of active holds.
///
/// Invariants maintained by the operations below:
/// - `0 <= current_amount <= max_amount` after any balance adjustment
/// - `0 <= reserved_amount`
/// - `reserved_amount <= current_amount` whenever a hold is placed or settled
///
/// `adjust_limit` is deliberately unchecked; callers own the relation between
/// the ceiling and the current balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub current_amount: i64,
    pub max_amount: i64,
    pub reserved_amount: i64,
}

impl Account {
    pub fn new(id: AccountId, user_id: UserId, current_amount: i64, max_amount: i64) -> Self {
        Self {
            id,
            user_id,
            current_amount,
            max_amount,
            reserved_amount: 0,
        }
    }

    /// Funds that can still be put on hold.
    pub fn available(&self) -> i64 {
        self.current_amount.saturating_sub(self.reserved_amount)
    }

    /// `true` when `0 <= reserved <= current <= max`.
    pub fn is_consistent(&self) -> bool {
        0 <= self.reserved_amount
            && self.reserved_amount <= self.current_amount
            && self.current_amount <= self.max_amount
    }

    /// Add `delta` to the ceiling.
    pub fn adjust_limit(&mut self, delta: i64) -> DomainResult<()> {
        self.max_amount = self
            .max_amount
            .checked_add(delta)
            .ok_or_else(|| DomainError::validation("max_amount out of range"))?;
        Ok(())
    }

    /// Add `delta` to the balance if the result stays within `[0, max_amount]`.
    pub fn adjust_balance(&mut self, delta: i64) -> DomainResult<()> {
        let next = self
            .current_amount
            .checked_add(delta)
            .ok_or(DomainError::InsufficientFunds)?;
        if next < 0 || next > self.max_amount {
            return Err(DomainError::InsufficientFunds);
        }
        self.current_amount = next;
        Ok(())
    }

    /// Put `amount` on hold.
    pub fn hold(&mut self, amount: i64) -> DomainResult<()> {
        ensure_positive(amount)?;
        if self.available() < amount {
            return Err(DomainError::InsufficientFunds);
        }
        self.reserved_amount += amount;
        Ok(())
    }

    /// Spend a held `amount`: debit the balance and drop the hold.
    ///
    /// The balance is re-checked here because plain balance adjustments may
    /// have drained it below the hold since the reservation was opened.
    pub fn settle(&mut self, amount: i64) -> DomainResult<()> {
        ensure_positive(amount)?;
        if self.reserved_amount < amount {
            return Err(DomainError::invariant(format!(
                "account {} holds {} but {} is being settled",
                self.id, self.reserved_amount, amount
            )));
        }
        if self.current_amount < amount {
            return Err(DomainError::InsufficientFunds);
        }
        self.current_amount -= amount;
        self.reserved_amount -= amount;
        Ok(())
    }

    /// Drop a hold of `amount` without spending it.
    pub fn release(&mut self, amount: i64) -> DomainResult<()> {
        ensure_positive(amount)?;
        if self.reserved_amount < amount {
            return Err(DomainError::invariant(format!(
                "account {} holds {} but {} is being released",
                self.id, self.reserved_amount, amount
            )));
        }
        self.reserved_amount -= amount;
        Ok(())
    }
}

pub(crate) fn ensure_positive(amount: i64) -> DomainResult<()> {
    if amount <= 0 {
        return Err(DomainError::validation("amount must be positive"));
    }
    Ok(())
}
