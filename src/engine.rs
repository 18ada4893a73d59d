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

//! Points accounting engine.
//!
//! The [`LedgerEngine`] is the only writer of point balances. Each operation
//! validates its request, prices it (purchases go through the promotion
//! evaluator first, outside any atomic unit), and then performs every read
//! and write of the operation inside one [`LedgerStore::run_atomic`] call.
//!
//! # Transaction Processing
//!
//! - **Purchases**: Credit `floor(spent / point_rate)` plus promotion bonuses.
//! - **Redemptions**: Recorded as pending; the debit happens when staff
//!   process them.
//! - **Adjustments**: Correct an earlier transaction's owner by a signed amount.
//! - **Transfers**: Write a linked debit/credit pair and move the points.
//! - **Event awards**: Move points from an event's pool to one guest or all.
//!
//! # Concurrency
//!
//! The store may reject a commit with `ConcurrencyConflict` when a row the
//! unit read was changed by someone else. The engine re-runs the whole unit
//! (re-reading balances) up to `max_retries` times.

use crate::base::{TransactionId, UserId};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::promotion::{PromotionRepository, evaluate_purchase};
use crate::query::{self, Page, PageRequest, TransactionFilter, UserFilter};
use crate::store::{LedgerStore, LedgerTxn};
use crate::transaction::{
    AdjustmentRequest, EventAwardRequest, PurchaseRequest, Recorded, RedemptionRequest,
    Transaction, TransactionDraft, TransactionKind, TransactionRequest, TransferRequest,
};
use crate::user::{Role, User};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Points accounting engine over a ledger store.
///
/// # Invariants
///
/// - A user's `points` equals the sum of their non-pending, non-suspicious
///   transaction amounts, and is never negative.
/// - Transfers always exist as a linked pair.
/// - An event's `points_remain` falls by exactly what its awards credit.
/// - A failed operation leaves no record and no balance change.
pub struct LedgerEngine<S> {
    store: S,
    config: LedgerConfig,
    clock: Clock,
}

impl<S> LedgerEngine<S>
where
    S: LedgerStore + PromotionRepository,
{
    pub fn new(store: S) -> Self {
        Self::with_config(store, LedgerConfig::default())
    }

    pub fn with_config(store: S, config: LedgerConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the wall clock used for `created_at` and promotion windows.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn user(&self, id: UserId) -> Result<User> {
        self.store.user(id).ok_or(LedgerError::UserNotFound(id))
    }

    pub fn transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.store
            .transaction(id)
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    /// Creates a transaction of any kind.
    ///
    /// | Kind | Result |
    /// |------|--------|
    /// | Purchase | `Single`, balance credited unless the cashier is suspicious |
    /// | Redemption | `Single`, pending, balance untouched |
    /// | Adjustment | `Single`, balance changed by the signed amount |
    /// | Transfer | `Transfer` pair, both balances changed |
    /// | Event (one guest) | `Single` |
    /// | Event (all guests) | `Batch`, one record per guest |
    pub fn create_transaction(&self, request: TransactionRequest) -> Result<Recorded> {
        match request {
            TransactionRequest::Purchase(purchase) => self.purchase(purchase).map(Recorded::Single),
            TransactionRequest::Redemption(redemption) => {
                self.request_redemption(redemption).map(Recorded::Single)
            }
            TransactionRequest::Adjustment(adjustment) => {
                self.adjust(adjustment).map(Recorded::Single)
            }
            TransactionRequest::Transfer(transfer) => self
                .transfer(transfer)
                .map(|(sent, received)| Recorded::Transfer { sent, received }),
            TransactionRequest::Event(award) if award.recipient.is_some() => {
                let mut records = self.award_event(award)?;
                records
                    .pop()
                    .map(Recorded::Single)
                    .ok_or_else(|| LedgerError::Storage("event award recorded nothing".into()))
            }
            TransactionRequest::Event(award) => self.award_event(award).map(Recorded::Batch),
        }
    }

    /// Records a purchase and credits the customer.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] - `spent` is not a positive amount with
    ///   at most two decimal places.
    /// - [`LedgerError::PromotionNotFound`] - A requested promotion does not exist.
    /// - [`LedgerError::InvalidPromotion`] / [`LedgerError::MinSpendingNotMet`] -
    ///   A requested promotion cannot be applied.
    /// - [`LedgerError::PermissionDenied`] - The cashier is below `cashier`.
    #[instrument(skip_all, fields(user = %request.user, cashier = %request.cashier, spent = %request.spent))]
    pub fn purchase(&self, request: PurchaseRequest) -> Result<Transaction> {
        validate_spent(request.spent)?;
        let now = self.now();

        for &id in &request.promotion_ids {
            if self.store.promotion(id).is_none() {
                debug!(promotion = %id, "purchase names unknown promotion");
                return Err(LedgerError::PromotionNotFound(id));
            }
        }
        let candidates = self.store.active_promotions(now);
        let used = self.store.used_onetime_promotions(request.user);
        let quote = evaluate_purchase(
            request.spent,
            &request.promotion_ids,
            &candidates,
            &used,
            now,
            self.config.point_rate,
        )?;
        let onetime: Vec<_> = quote.onetime_ids(&candidates).collect();

        let tx = self.atomically("purchase", |txn| {
            let cashier = txn.user(request.cashier)?;
            require_role(&cashier, Role::Cashier)?;
            txn.user(request.user)?;

            // The usage snapshot above may be stale; this read is validated at commit.
            for &id in &onetime {
                if txn.promotion_used(request.user, id)? {
                    return Err(LedgerError::InvalidPromotion {
                        promotion: id,
                        reason: "already used",
                    });
                }
            }

            let mut draft = TransactionDraft::new(
                TransactionKind::Purchase,
                request.user,
                cashier.id,
                quote.amount,
                now,
            )
            .remark(request.remark.clone());
            draft.spent = Some(request.spent);
            draft.promotion_ids = quote.applied.clone();
            draft.suspicious = cashier.suspicious;

            let tx = txn.insert_transaction(draft)?;
            if !tx.suspicious {
                txn.adjust_points(tx.user_id, tx.amount)?;
            }
            Ok(tx)
        })?;

        if tx.suspicious {
            warn!(
                transaction = %tx.id,
                amount = tx.amount,
                "purchase by suspicious cashier withheld from balance"
            );
        } else {
            info!(transaction = %tx.id, amount = tx.amount, "purchase recorded");
        }
        Ok(tx)
    }

    /// Records a pending redemption. The balance is not touched until
    /// [`process_redemption`](Self::process_redemption).
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] - `amount` is not positive.
    /// - [`LedgerError::InsufficientPoints`] - `amount` exceeds the current balance.
    #[instrument(skip_all, fields(user = %request.user, amount = request.amount))]
    pub fn request_redemption(&self, request: RedemptionRequest) -> Result<Transaction> {
        ensure_positive(request.amount, "amount")?;
        let now = self.now();

        let tx = self.atomically("redemption", |txn| {
            let user = txn.user(request.user)?;
            ensure_funds(&user, request.amount)?;
            let draft = TransactionDraft::new(
                TransactionKind::Redemption,
                user.id,
                user.id,
                -request.amount,
                now,
            )
            .remark(request.remark.clone());
            txn.insert_transaction(draft)
        })?;

        info!(transaction = %tx.id, "redemption pending");
        Ok(tx)
    }

    /// Fulfils a pending redemption and debits the owner.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TransactionNotFound`] - No such transaction.
    /// - [`LedgerError::NotARedemption`] - The transaction is another kind.
    /// - [`LedgerError::AlreadyProcessed`] - It was processed before.
    /// - [`LedgerError::InsufficientPoints`] - The balance has since dropped
    ///   below the redeemed amount.
    /// - [`LedgerError::PermissionDenied`] - `processed_by` is below `cashier`.
    #[instrument(skip(self))]
    pub fn process_redemption(
        &self,
        transaction_id: TransactionId,
        processed_by: UserId,
    ) -> Result<Transaction> {
        let tx = self.atomically("process_redemption", |txn| {
            let staff = txn.user(processed_by)?;
            require_role(&staff, Role::Cashier)?;

            let redemption = txn.transaction(transaction_id)?;
            if redemption.kind != TransactionKind::Redemption {
                return Err(LedgerError::NotARedemption(transaction_id));
            }
            if redemption.processed_by.is_some() {
                return Err(LedgerError::AlreadyProcessed(transaction_id));
            }

            let owner = txn.user(redemption.user_id)?;
            ensure_funds(&owner, -redemption.amount)?;
            txn.adjust_points(owner.id, redemption.amount)?;
            txn.mark_processed(transaction_id, staff.id)
        })?;

        info!(transaction = %tx.id, user = %tx.user_id, amount = tx.amount, "redemption processed");
        Ok(tx)
    }

    /// Records a correction against an existing transaction's owner.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] - `amount` is zero.
    /// - [`LedgerError::RelatedTransactionNotFound`] - The related id is unknown.
    /// - [`LedgerError::UserMismatch`] - `user` is set and is not the related
    ///   transaction's owner.
    /// - [`LedgerError::InsufficientPoints`] - A negative amount would take the
    ///   balance below zero.
    /// - [`LedgerError::PermissionDenied`] - The creator is below `manager`.
    #[instrument(skip_all, fields(related = %request.related_transaction, amount = request.amount))]
    pub fn adjust(&self, request: AdjustmentRequest) -> Result<Transaction> {
        if request.amount == 0 {
            return Err(LedgerError::validation("amount", "must not be zero"));
        }
        let now = self.now();

        let tx = self.atomically("adjustment", |txn| {
            let manager = txn.user(request.created_by)?;
            require_role(&manager, Role::Manager)?;

            let related = txn
                .transaction(request.related_transaction)
                .map_err(|err| match err {
                    LedgerError::TransactionNotFound(id) => {
                        LedgerError::RelatedTransactionNotFound(id)
                    }
                    other => other,
                })?;
            if let Some(given) = request.user
                && given != related.user_id
            {
                return Err(LedgerError::UserMismatch {
                    expected: related.user_id,
                    given,
                });
            }

            let mut draft = TransactionDraft::new(
                TransactionKind::Adjustment,
                related.user_id,
                manager.id,
                request.amount,
                now,
            )
            .remark(request.remark.clone());
            draft.related_transaction = Some(related.id);
            draft.suspicious = manager.suspicious;

            let tx = txn.insert_transaction(draft)?;
            if !tx.suspicious {
                txn.adjust_points(tx.user_id, tx.amount)?;
            }
            Ok(tx)
        })?;

        if tx.suspicious {
            warn!(transaction = %tx.id, "adjustment by suspicious manager withheld from balance");
        } else {
            info!(transaction = %tx.id, user = %tx.user_id, amount = tx.amount, "adjustment recorded");
        }
        Ok(tx)
    }

    /// Moves points between two users as a linked pair of records.
    ///
    /// Returns `(sent, received)`: the sender's debit and the recipient's credit.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] - `amount` is not positive.
    /// - [`LedgerError::SelfTransfer`] - Sender and recipient are the same user.
    /// - [`LedgerError::UnverifiedUser`] - The sender is not verified.
    /// - [`LedgerError::InsufficientPoints`] - The sender cannot cover `amount`.
    #[instrument(skip_all, fields(sender = %request.sender, recipient = %request.recipient, amount = request.amount))]
    pub fn transfer(&self, request: TransferRequest) -> Result<(Transaction, Transaction)> {
        ensure_positive(request.amount, "amount")?;
        if request.sender == request.recipient {
            return Err(LedgerError::SelfTransfer(request.sender));
        }
        let now = self.now();

        let pair = self.atomically("transfer", |txn| {
            // Touch both rows in ascending id order for stores that lock on read.
            let (low, high) = if request.sender < request.recipient {
                (request.sender, request.recipient)
            } else {
                (request.recipient, request.sender)
            };
            txn.user(low)?;
            txn.user(high)?;

            let sender = txn.user(request.sender)?;
            let recipient = txn.user(request.recipient)?;
            if !sender.verified {
                return Err(LedgerError::UnverifiedUser(sender.id));
            }
            ensure_funds(&sender, request.amount)?;

            let mut debit = TransactionDraft::new(
                TransactionKind::Transfer,
                sender.id,
                sender.id,
                -request.amount,
                now,
            )
            .remark(request.remark.clone());
            debit.related_user = Some(recipient.id);
            let mut credit = TransactionDraft::new(
                TransactionKind::Transfer,
                recipient.id,
                sender.id,
                request.amount,
                now,
            )
            .remark(request.remark.clone());
            credit.related_user = Some(sender.id);

            let sent = txn.insert_transaction(debit)?;
            let received = txn.insert_transaction(credit)?;
            txn.link_transactions(sent.id, received.id)?;
            txn.adjust_points(sender.id, -request.amount)?;
            txn.adjust_points(recipient.id, request.amount)?;

            Ok((txn.transaction(sent.id)?, txn.transaction(received.id)?))
        })?;

        info!(sent = %pair.0.id, received = %pair.1.id, "transfer recorded");
        Ok(pair)
    }

    /// Awards points from an event's pool.
    ///
    /// With no recipient, every guest receives `amount`; the whole batch is
    /// checked against the pool before anything is written.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] - `amount` is not positive, or the event
    ///   has no guests to award.
    /// - [`LedgerError::EventPointsExhausted`] - The award (or batch total)
    ///   exceeds `points_remain`.
    /// - [`LedgerError::NotEventGuest`] - The recipient is not a guest.
    /// - [`LedgerError::PermissionDenied`] - The creator is neither a manager
    ///   nor an organizer of the event.
    #[instrument(skip_all, fields(event = %request.event, amount = request.amount))]
    pub fn award_event(&self, request: EventAwardRequest) -> Result<Vec<Transaction>> {
        ensure_positive(request.amount, "amount")?;
        let now = self.now();

        let records = self.atomically("event_award", |txn| {
            let event = txn.event(request.event)?;
            let actor = txn.user(request.created_by)?;
            if !actor.role.at_least(Role::Manager) && !event.is_organizer(actor.id) {
                return Err(LedgerError::PermissionDenied {
                    actor: actor.id,
                    required: Role::Manager,
                });
            }

            let recipients = match request.recipient {
                Some(user) if !event.is_guest(user) => {
                    return Err(LedgerError::NotEventGuest {
                        event: event.id,
                        user,
                    });
                }
                Some(user) => vec![user],
                None => event.guest_ids(),
            };
            if recipients.is_empty() {
                return Err(LedgerError::validation("recipient", "event has no guests"));
            }

            let total = i64::try_from(recipients.len())
                .ok()
                .and_then(|count| request.amount.checked_mul(count))
                .ok_or_else(|| LedgerError::validation("amount", "award total overflows"))?;
            if total > event.points_remain {
                return Err(LedgerError::EventPointsExhausted {
                    event: event.id,
                    requested: total,
                    remaining: event.points_remain,
                });
            }
            txn.adjust_event_pool(event.id, -total)?;

            let mut records = Vec::with_capacity(recipients.len());
            for user in recipients {
                let guest = txn.user(user)?;
                let mut draft = TransactionDraft::new(
                    TransactionKind::Event,
                    guest.id,
                    actor.id,
                    request.amount,
                    now,
                )
                .remark(request.remark.clone());
                draft.event_id = Some(event.id);
                let tx = txn.insert_transaction(draft)?;
                txn.adjust_points(guest.id, request.amount)?;
                records.push(tx);
            }
            Ok(records)
        })?;

        info!(awards = records.len(), "event points awarded");
        Ok(records)
    }

    /// Filtered, paginated transaction listing.
    pub fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<Transaction>> {
        query::list_transactions(&self.store, filter, page, &self.config)
    }

    /// Filtered, paginated user listing.
    pub fn list_users(&self, filter: &UserFilter, page: PageRequest) -> Result<Page<User>> {
        query::list_users(&self.store, filter, page, &self.config)
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Runs `unit` atomically, re-running it on commit conflicts.
    fn atomically<T, F>(&self, operation: &'static str, unit: F) -> Result<T>
    where
        F: Fn(&mut dyn LedgerTxn) -> Result<T>,
    {
        let attempts = self.config.max_retries.max(1);
        for attempt in 1..=attempts {
            match self.store.run_atomic(&unit) {
                Err(err) if err.is_retryable() => {
                    debug!(operation, attempt, "commit conflict, retrying");
                    std::thread::yield_now();
                }
                Err(err) => {
                    debug!(operation, error = %err, "operation rejected");
                    return Err(err);
                }
                ok => return ok,
            }
        }
        warn!(operation, attempts, "retry budget exhausted");
        Err(LedgerError::ConcurrencyConflict { attempts })
    }
}

fn require_role(actor: &User, required: Role) -> Result<()> {
    if actor.role.at_least(required) {
        Ok(())
    } else {
        Err(LedgerError::PermissionDenied {
            actor: actor.id,
            required,
        })
    }
}

fn ensure_positive(amount: i64, field: &'static str) -> Result<()> {
    if amount <= 0 {
        return Err(LedgerError::validation(field, "must be positive"));
    }
    Ok(())
}

fn ensure_funds(user: &User, requested: i64) -> Result<()> {
    if user.points < requested {
        return Err(LedgerError::InsufficientPoints {
            user: user.id,
            requested,
            available: user.points,
        });
    }
    Ok(())
}

fn validate_spent(spent: Decimal) -> Result<()> {
    if spent <= Decimal::ZERO {
        return Err(LedgerError::validation("spent", "must be positive"));
    }
    if spent.normalize().scale() > 2 {
        return Err(LedgerError::validation(
            "spent",
            "must have at most two decimal places",
        ));
    }
    Ok(())
}
