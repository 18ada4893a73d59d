// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types for ledger operations and configuration loading.
//!
//! Every [`LedgerError`] is raised before the atomic unit commits, so a
//! failed operation never leaves a record or a balance change behind.

use crate::base::{EventId, PromotionId, TransactionId, UserId};
use crate::user::Role;
use rust_decimal::Decimal;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

/// Ledger operation errors.
///
/// Messages are written to be shown verbatim to the staff member or user
/// who triggered the operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Input is malformed or out of range
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// Debit would take the balance below zero
    #[error("user {user} has {available} points, but {requested} were requested")]
    InsufficientPoints {
        user: UserId,
        requested: i64,
        available: i64,
    },

    /// Promotion is unknown, inactive, or already used by this user
    #[error("promotion {promotion} cannot be applied: {reason}")]
    InvalidPromotion {
        promotion: PromotionId,
        reason: &'static str,
    },

    /// Purchase does not reach the promotion's minimum spending
    #[error("promotion {promotion} requires spending at least {min_spending}, got {spent}")]
    MinSpendingNotMet {
        promotion: PromotionId,
        min_spending: Decimal,
        spent: Decimal,
    },

    /// Adjustment references a transaction that does not exist
    #[error("related transaction {0} not found")]
    RelatedTransactionNotFound(TransactionId),

    /// Adjustment names a user other than the related transaction's owner
    #[error("transaction belongs to user {expected}, not user {given}")]
    UserMismatch { expected: UserId, given: UserId },

    /// Sender and recipient of a transfer are the same user
    #[error("user {0} cannot transfer points to themselves")]
    SelfTransfer(UserId),

    /// Event award exceeds the remaining pool
    #[error("event {event} has {remaining} points remaining, but {requested} were requested")]
    EventPointsExhausted {
        event: EventId,
        requested: i64,
        remaining: i64,
    },

    /// Redemption has already been processed
    #[error("redemption {0} has already been processed")]
    AlreadyProcessed(TransactionId),

    /// Processing was requested for a transaction that is not a redemption
    #[error("transaction {0} is not a redemption")]
    NotARedemption(TransactionId),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("promotion {0} not found")]
    PromotionNotFound(PromotionId),

    /// Actor lacks the role required for the operation
    #[error("user {actor} needs the {required} role for this operation")]
    PermissionDenied { actor: UserId, required: Role },

    /// Event award names a user who is not on the guest list
    #[error("user {user} is not a guest of event {event}")]
    NotEventGuest { event: EventId, user: UserId },

    /// Transfer sender has not verified their account
    #[error("user {0} must be verified to transfer points")]
    UnverifiedUser(UserId),

    /// Optimistic retries were exhausted
    #[error("concurrent update conflict persisted after {attempts} attempts")]
    ConcurrencyConflict { attempts: u32 },

    /// Query filter or pagination input is malformed
    #[error("invalid filter {field}: {message}")]
    InvalidFilter {
        field: &'static str,
        message: String,
    },

    /// Failure reported by the ledger store while inside an atomic unit
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_filter(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidFilter {
            field,
            message: message.into(),
        }
    }

    /// Returns `true` for failures that an optimistic retry may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Configuration and fixture loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration value {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    /// Seeding a store from a fixture was rejected
    #[error("fixture rejected: {0}")]
    Fixture(#[from] LedgerError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::InsufficientPoints {
                user: UserId(1),
                requested: 50,
                available: 20,
            }
            .to_string(),
            "user 1 has 20 points, but 50 were requested"
        );
        assert_eq!(
            LedgerError::RelatedTransactionNotFound(TransactionId(99)).to_string(),
            "related transaction 99 not found"
        );
        assert_eq!(
            LedgerError::SelfTransfer(UserId(4)).to_string(),
            "user 4 cannot transfer points to themselves"
        );
        assert_eq!(
            LedgerError::AlreadyProcessed(TransactionId(3)).to_string(),
            "redemption 3 has already been processed"
        );
        assert_eq!(
            LedgerError::MinSpendingNotMet {
                promotion: PromotionId(2),
                min_spending: dec!(50),
                spent: dec!(49.99),
            }
            .to_string(),
            "promotion 2 requires spending at least 50, got 49.99"
        );
        assert_eq!(
            LedgerError::PermissionDenied {
                actor: UserId(5),
                required: Role::Manager,
            }
            .to_string(),
            "user 5 needs the manager role for this operation"
        );
        assert_eq!(
            LedgerError::validation("amount", "must be positive").to_string(),
            "invalid amount: must be positive"
        );
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(LedgerError::ConcurrencyConflict { attempts: 1 }.is_retryable());
        assert!(!LedgerError::SelfTransfer(UserId(1)).is_retryable());
        assert!(!LedgerError::Storage("disk full".into()).is_retryable());
    }

    #[test]
    fn errors_are_cloneable() {
        let error = LedgerError::UserMismatch {
            expected: UserId(1),
            given: UserId(2),
        };
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
