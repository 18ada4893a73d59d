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

//! In-memory ledger store with optimistic concurrency.
//!
//! Rows live behind `parking_lot::Mutex` in [`DashMap`]s and carry a version.
//! An atomic unit works on private copies and remembers the version of every
//! row it touched. Commit then:
//!
//! 1. takes the visibility gate in shared mode,
//! 2. locks the touched rows in a fixed order (users, events, transactions;
//!    ascending id within each),
//! 3. fails with `ConcurrencyConflict` if any version moved,
//! 4. writes back dirty rows, bumps their versions, and inserts new records.
//!
//! Units over disjoint users commit in parallel. Snapshot reads take the gate
//! exclusively, so a transfer pair or an event batch is never observed half
//! applied.
//!
//! Every record inserted for a user bumps that user's version, which makes
//! two units recording for the same user (e.g. racing on one onetime
//! promotion) serialise even when neither changes the balance.

use crate::base::{EventId, PromotionId, TransactionId, UserId};
use crate::error::{LedgerError, Result};
use crate::event::Event;
use crate::promotion::{Promotion, PromotionKind, PromotionRepository};
use crate::store::{LedgerStore, LedgerTxn};
use crate::transaction::{Transaction, TransactionDraft};
use crate::user::{NewUser, User};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, trace};

#[derive(Debug)]
struct Versioned<T> {
    value: T,
    version: u64,
}

type Row<T> = Arc<Mutex<Versioned<T>>>;

fn new_row<T>(value: T) -> Row<T> {
    Arc::new(Mutex::new(Versioned { value, version: 0 }))
}

/// Thread-safe in-memory [`LedgerStore`].
#[derive(Debug)]
pub struct MemoryStore {
    users: DashMap<UserId, Row<User>>,
    events: DashMap<EventId, Row<Event>>,
    transactions: DashMap<TransactionId, Row<Transaction>>,
    promotions: DashMap<PromotionId, Promotion>,
    /// Unique-key indexes for registration.
    utorids: DashMap<String, UserId>,
    emails: DashMap<String, UserId>,
    /// `(user, promotion)` pairs recorded on committed transactions.
    promotion_usage: DashMap<(UserId, PromotionId), TransactionId>,
    next_user_id: AtomicU32,
    next_transaction_id: AtomicU32,
    /// Shared by committers, exclusive for snapshot readers.
    gate: RwLock<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            events: DashMap::new(),
            transactions: DashMap::new(),
            promotions: DashMap::new(),
            utorids: DashMap::new(),
            emails: DashMap::new(),
            promotion_usage: DashMap::new(),
            next_user_id: AtomicU32::new(1),
            next_transaction_id: AtomicU32::new(1),
            gate: RwLock::new(()),
        }
    }

    /// Registers a user with a zero balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`] if the registration is malformed or the
    /// utorid or email is taken.
    pub fn insert_user(&self, new_user: NewUser) -> Result<User> {
        new_user.validate()?;
        let id = UserId(self.next_user_id.fetch_add(1, Ordering::SeqCst));

        match self.utorids.entry(new_user.utorid.clone()) {
            Entry::Occupied(_) => {
                return Err(LedgerError::validation("utorid", "utorid already exists"));
            }
            Entry::Vacant(entry) => {
                entry.insert(id);
            }
        }
        match self.emails.entry(new_user.email.clone()) {
            Entry::Occupied(_) => {
                self.utorids.remove(&new_user.utorid);
                return Err(LedgerError::validation("email", "email already exists"));
            }
            Entry::Vacant(entry) => {
                entry.insert(id);
            }
        }

        let user = new_user.into_user(id);
        self.users.insert(id, new_row(user.clone()));
        debug!(user = %id, utorid = %user.utorid, role = %user.role, "registered user");
        Ok(user)
    }

    /// Adds an event. The caller picks the id.
    pub fn insert_event(&self, event: Event) -> Result<Event> {
        if event.points_remain < 0 {
            return Err(LedgerError::validation("points_remain", "must not be negative"));
        }
        for &user in event.organizers.iter().chain(event.guests.iter()) {
            if !self.users.contains_key(&user) {
                return Err(LedgerError::UserNotFound(user));
            }
        }
        match self.events.entry(event.id) {
            Entry::Occupied(_) => Err(LedgerError::validation("event", "duplicate event id")),
            Entry::Vacant(entry) => {
                entry.insert(new_row(event.clone()));
                Ok(event)
            }
        }
    }

    /// Adds a promotion. The caller picks the id.
    pub fn insert_promotion(&self, promotion: Promotion) -> Result<Promotion> {
        promotion.validate()?;
        match self.promotions.entry(promotion.id) {
            Entry::Occupied(_) => Err(LedgerError::validation(
                "promotion",
                "duplicate promotion id",
            )),
            Entry::Vacant(entry) => {
                entry.insert(promotion.clone());
                Ok(promotion)
            }
        }
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn transaction_count(&self) -> usize {
        let _gate = self.gate.write();
        self.transactions.len()
    }

    fn user_row(&self, id: UserId) -> Option<Row<User>> {
        self.users.get(&id).map(|r| Arc::clone(r.value()))
    }

    fn event_row(&self, id: EventId) -> Option<Row<Event>> {
        self.events.get(&id).map(|r| Arc::clone(r.value()))
    }

    fn transaction_row(&self, id: TransactionId) -> Option<Row<Transaction>> {
        self.transactions.get(&id).map(|r| Arc::clone(r.value()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for MemoryStore {
    fn run_atomic<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LedgerTxn) -> Result<T>,
    {
        let mut unit = MemoryTxn::new(self);
        let value = f(&mut unit)?;
        unit.commit()?;
        Ok(value)
    }

    fn user(&self, id: UserId) -> Option<User> {
        let _gate = self.gate.write();
        self.user_row(id).map(|row| row.lock().value.clone())
    }

    fn transaction(&self, id: TransactionId) -> Option<Transaction> {
        let _gate = self.gate.write();
        self.transaction_row(id).map(|row| row.lock().value.clone())
    }

    fn event(&self, id: EventId) -> Option<Event> {
        let _gate = self.gate.write();
        self.event_row(id).map(|row| row.lock().value.clone())
    }

    fn query_transactions(&self, predicate: &dyn Fn(&Transaction) -> bool) -> Vec<Transaction> {
        let _gate = self.gate.write();
        self.transactions
            .iter()
            .filter_map(|entry| {
                let row = entry.value().lock();
                predicate(&row.value).then(|| row.value.clone())
            })
            .collect()
    }

    fn query_users(&self, predicate: &dyn Fn(&User) -> bool) -> Vec<User> {
        let _gate = self.gate.write();
        self.users
            .iter()
            .filter_map(|entry| {
                let row = entry.value().lock();
                predicate(&row.value).then(|| row.value.clone())
            })
            .collect()
    }
}

impl PromotionRepository for MemoryStore {
    fn promotion(&self, id: PromotionId) -> Option<Promotion> {
        self.promotions.get(&id).map(|p| p.value().clone())
    }

    fn active_promotions(&self, at: DateTime<Utc>) -> Vec<Promotion> {
        let mut active: Vec<Promotion> = self
            .promotions
            .iter()
            .filter(|p| p.is_active_at(at))
            .map(|p| p.value().clone())
            .collect();
        active.sort_by_key(|p| p.id);
        active
    }

    fn used_onetime_promotions(&self, user: UserId) -> HashSet<PromotionId> {
        let _gate = self.gate.write();
        self.promotion_usage
            .iter()
            .filter(|entry| entry.key().0 == user)
            .map(|entry| entry.key().1)
            .filter(|id| {
                self.promotions
                    .get(id)
                    .is_some_and(|p| p.kind == PromotionKind::Onetime)
            })
            .collect()
    }
}

/// Private copy of a row plus the version it was read at.
#[derive(Debug)]
struct Staged<T> {
    value: T,
    version: u64,
    dirty: bool,
}

struct MemoryTxn<'a> {
    store: &'a MemoryStore,
    users: BTreeMap<UserId, Staged<User>>,
    events: BTreeMap<EventId, Staged<Event>>,
    transactions: BTreeMap<TransactionId, Staged<Transaction>>,
    inserted: BTreeMap<TransactionId, Transaction>,
}

impl<'a> MemoryTxn<'a> {
    fn new(store: &'a MemoryStore) -> Self {
        Self {
            store,
            users: BTreeMap::new(),
            events: BTreeMap::new(),
            transactions: BTreeMap::new(),
            inserted: BTreeMap::new(),
        }
    }

    fn staged_user(&mut self, id: UserId) -> Result<&mut Staged<User>> {
        if !self.users.contains_key(&id) {
            let row = self.store.user_row(id).ok_or(LedgerError::UserNotFound(id))?;
            let snapshot = row.lock();
            self.users.insert(
                id,
                Staged {
                    value: snapshot.value.clone(),
                    version: snapshot.version,
                    dirty: false,
                },
            );
        }
        self.users.get_mut(&id).ok_or(LedgerError::UserNotFound(id))
    }

    fn staged_event(&mut self, id: EventId) -> Result<&mut Staged<Event>> {
        if !self.events.contains_key(&id) {
            let row = self
                .store
                .event_row(id)
                .ok_or(LedgerError::EventNotFound(id))?;
            let snapshot = row.lock();
            self.events.insert(
                id,
                Staged {
                    value: snapshot.value.clone(),
                    version: snapshot.version,
                    dirty: false,
                },
            );
        }
        self.events.get_mut(&id).ok_or(LedgerError::EventNotFound(id))
    }

    /// Mutable access to a record, whether inserted by this unit or committed.
    fn record_mut(&mut self, id: TransactionId) -> Result<&mut Transaction> {
        if self.inserted.contains_key(&id) {
            return self
                .inserted
                .get_mut(&id)
                .ok_or(LedgerError::TransactionNotFound(id));
        }
        if !self.transactions.contains_key(&id) {
            let row = self
                .store
                .transaction_row(id)
                .ok_or(LedgerError::TransactionNotFound(id))?;
            let snapshot = row.lock();
            self.transactions.insert(
                id,
                Staged {
                    value: snapshot.value.clone(),
                    version: snapshot.version,
                    dirty: false,
                },
            );
        }
        let staged = self
            .transactions
            .get_mut(&id)
            .ok_or(LedgerError::TransactionNotFound(id))?;
        staged.dirty = true;
        Ok(&mut staged.value)
    }

    fn commit(self) -> Result<()> {
        let store = self.store;
        let _gate = store.gate.read();

        let mut user_rows = Vec::with_capacity(self.users.len());
        for (&id, staged) in &self.users {
            let row = store.user_row(id).ok_or(LedgerError::UserNotFound(id))?;
            user_rows.push((staged, row));
        }
        let mut event_rows = Vec::with_capacity(self.events.len());
        for (&id, staged) in &self.events {
            let row = store.event_row(id).ok_or(LedgerError::EventNotFound(id))?;
            event_rows.push((staged, row));
        }
        let mut transaction_rows = Vec::with_capacity(self.transactions.len());
        for (&id, staged) in &self.transactions {
            let row = store
                .transaction_row(id)
                .ok_or(LedgerError::TransactionNotFound(id))?;
            transaction_rows.push((staged, row));
        }

        // BTreeMap iteration gives ascending ids within each table.
        let mut user_guards = lock_all(&user_rows);
        let mut event_guards = lock_all(&event_rows);
        let mut transaction_guards = lock_all(&transaction_rows);

        let conflict = user_guards.iter().any(|(s, g)| s.version != g.version)
            || event_guards.iter().any(|(s, g)| s.version != g.version)
            || transaction_guards.iter().any(|(s, g)| s.version != g.version);
        if conflict {
            debug!("optimistic commit rejected: row version changed");
            return Err(LedgerError::ConcurrencyConflict { attempts: 1 });
        }

        for (staged, _) in &user_guards {
            if staged.dirty && staged.value.points < 0 {
                return Err(LedgerError::InsufficientPoints {
                    user: staged.value.id,
                    requested: -staged.value.points,
                    available: 0,
                });
            }
        }
        for (staged, _) in &event_guards {
            if staged.dirty && staged.value.points_remain < 0 {
                return Err(LedgerError::EventPointsExhausted {
                    event: staged.value.id,
                    requested: -staged.value.points_remain,
                    remaining: 0,
                });
            }
        }

        write_back(&mut user_guards);
        write_back(&mut event_guards);
        write_back(&mut transaction_guards);

        for (id, tx) in self.inserted {
            for &promotion in &tx.promotion_ids {
                store.promotion_usage.insert((tx.user_id, promotion), id);
            }
            store.transactions.insert(id, new_row(tx));
        }
        trace!(
            users = user_guards.len(),
            events = event_guards.len(),
            "atomic unit committed"
        );
        Ok(())
    }
}

fn lock_all<'r, T>(
    rows: &'r [(&'r Staged<T>, Row<T>)],
) -> Vec<(&'r Staged<T>, MutexGuard<'r, Versioned<T>>)> {
    rows.iter().map(|(staged, row)| (*staged, row.lock())).collect()
}

fn write_back<T: Clone>(guards: &mut [(&Staged<T>, MutexGuard<'_, Versioned<T>>)]) {
    for (staged, guard) in guards.iter_mut() {
        if staged.dirty {
            guard.value = staged.value.clone();
            guard.version += 1;
        }
    }
}

impl LedgerTxn for MemoryTxn<'_> {
    fn user(&mut self, id: UserId) -> Result<User> {
        Ok(self.staged_user(id)?.value.clone())
    }

    fn adjust_points(&mut self, id: UserId, delta: i64) -> Result<i64> {
        let staged = self.staged_user(id)?;
        let available = staged.value.points;
        let updated = available
            .checked_add(delta)
            .ok_or_else(|| LedgerError::validation("amount", "points overflow"))?;
        if updated < 0 {
            return Err(LedgerError::InsufficientPoints {
                user: id,
                requested: delta.saturating_neg(),
                available,
            });
        }
        staged.value.points = updated;
        staged.dirty = true;
        Ok(updated)
    }

    fn insert_transaction(&mut self, draft: TransactionDraft) -> Result<Transaction> {
        // Recording for a user counts as writing that user.
        self.staged_user(draft.user_id)?.dirty = true;
        let id = TransactionId(self.store.next_transaction_id.fetch_add(1, Ordering::SeqCst));
        let tx = Transaction::from_draft(id, draft);
        self.inserted.insert(id, tx.clone());
        Ok(tx)
    }

    fn link_transactions(&mut self, a: TransactionId, b: TransactionId) -> Result<()> {
        self.record_mut(a)?.related_transaction = Some(b);
        self.record_mut(b)?.related_transaction = Some(a);
        Ok(())
    }

    fn transaction(&mut self, id: TransactionId) -> Result<Transaction> {
        if let Some(tx) = self.inserted.get(&id) {
            return Ok(tx.clone());
        }
        if let Some(staged) = self.transactions.get(&id) {
            return Ok(staged.value.clone());
        }
        let row = self
            .store
            .transaction_row(id)
            .ok_or(LedgerError::TransactionNotFound(id))?;
        let snapshot = row.lock();
        let tx = snapshot.value.clone();
        self.transactions.insert(
            id,
            Staged {
                value: tx.clone(),
                version: snapshot.version,
                dirty: false,
            },
        );
        Ok(tx)
    }

    fn mark_processed(&mut self, id: TransactionId, processed_by: UserId) -> Result<Transaction> {
        let record = self.record_mut(id)?;
        record.processed_by = Some(processed_by);
        Ok(record.clone())
    }

    fn event(&mut self, id: EventId) -> Result<Event> {
        Ok(self.staged_event(id)?.value.clone())
    }

    fn adjust_event_pool(&mut self, id: EventId, delta: i64) -> Result<i64> {
        let staged = self.staged_event(id)?;
        let remaining = staged.value.points_remain;
        let updated = remaining
            .checked_add(delta)
            .ok_or_else(|| LedgerError::validation("amount", "points overflow"))?;
        if updated < 0 {
            return Err(LedgerError::EventPointsExhausted {
                event: id,
                requested: delta.saturating_neg(),
                remaining,
            });
        }
        staged.value.points_remain = updated;
        staged.value.points_awarded -= delta;
        staged.dirty = true;
        Ok(updated)
    }

    fn promotion_used(&mut self, user: UserId, promotion: PromotionId) -> Result<bool> {
        // Pull the user into the read set so a racing unit is caught at commit.
        self.staged_user(user)?;
        let staged_use = self
            .inserted
            .values()
            .any(|tx| tx.user_id == user && tx.promotion_ids.contains(&promotion));
        Ok(staged_use || self.store.promotion_usage.contains_key(&(user, promotion)))
    }
}
