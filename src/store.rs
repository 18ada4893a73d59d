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

//! The ledger store seam.
//!
//! The engine never touches storage directly. Every write goes through
//! [`LedgerStore::run_atomic`], which hands the closure a [`LedgerTxn`]:
//! reads through the handle see the unit's own staged writes, and nothing
//! staged becomes visible to anyone else unless the closure returns `Ok` and
//! the store commits.
//!
//! A store may refuse a commit with [`LedgerError::ConcurrencyConflict`] when
//! a row read by the unit changed underneath it. The engine treats that as
//! retryable and re-runs the whole unit.
//!
//! [`LedgerError::ConcurrencyConflict`]: crate::LedgerError::ConcurrencyConflict

use crate::base::{EventId, PromotionId, TransactionId, UserId};
use crate::error::Result;
use crate::event::Event;
use crate::transaction::{Transaction, TransactionDraft};
use crate::user::User;

/// Handle for reads and staged writes inside one atomic unit.
pub trait LedgerTxn {
    /// Fails with `UserNotFound` for unknown ids.
    fn user(&mut self, id: UserId) -> Result<User>;

    /// Adds `delta` to the user's balance and returns the new balance.
    ///
    /// Fails with `InsufficientPoints` rather than go below zero.
    fn adjust_points(&mut self, id: UserId, delta: i64) -> Result<i64>;

    /// Stages a new record and returns it with its allocated id.
    fn insert_transaction(&mut self, draft: TransactionDraft) -> Result<Transaction>;

    /// Points `a` and `b` at each other through `related_transaction`.
    fn link_transactions(&mut self, a: TransactionId, b: TransactionId) -> Result<()>;

    /// Fails with `TransactionNotFound` for unknown ids.
    fn transaction(&mut self, id: TransactionId) -> Result<Transaction>;

    /// Stamps a redemption as fulfilled by `processed_by`.
    fn mark_processed(&mut self, id: TransactionId, processed_by: UserId) -> Result<Transaction>;

    /// Fails with `EventNotFound` for unknown ids.
    fn event(&mut self, id: EventId) -> Result<Event>;

    /// Adds `delta` to the event's remaining pool and returns what remains.
    ///
    /// Fails with `EventPointsExhausted` rather than go below zero.
    fn adjust_event_pool(&mut self, id: EventId, delta: i64) -> Result<i64>;

    /// Whether `user` already has a record that applied `promotion`.
    fn promotion_used(&mut self, user: UserId, promotion: PromotionId) -> Result<bool>;
}

/// Durable home of users, transactions, and events.
pub trait LedgerStore {
    /// Runs `f` as one atomic unit: all of its writes commit, or none do.
    fn run_atomic<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LedgerTxn) -> Result<T>;

    fn user(&self, id: UserId) -> Option<User>;

    fn transaction(&self, id: TransactionId) -> Option<Transaction>;

    fn event(&self, id: EventId) -> Option<Event>;

    /// Committed transactions matching `predicate`, in no particular order.
    fn query_transactions(&self, predicate: &dyn Fn(&Transaction) -> bool) -> Vec<Transaction>;

    /// Committed users matching `predicate`, in no particular order.
    fn query_users(&self, predicate: &dyn Fn(&User) -> bool) -> Vec<User>;
}
