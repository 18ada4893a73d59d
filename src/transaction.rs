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

//! Ledger records and transaction requests.
//!
//! Each kind has a short lifecycle:
//! - purchase, adjustment, transfer, event: created and applied in one step
//! - redemption: `pending` → `processed` (via [`LedgerEngine::process_redemption`])
//!
//! [`LedgerEngine::process_redemption`]: crate::LedgerEngine::process_redemption

use crate::base::{EventId, PromotionId, TransactionId, UserId};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Purchase,
    Redemption,
    Adjustment,
    Transfer,
    Event,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Redemption => "redemption",
            Self::Adjustment => "adjustment",
            Self::Transfer => "transfer",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "purchase" => Ok(Self::Purchase),
            "redemption" => Ok(Self::Redemption),
            "adjustment" => Ok(Self::Adjustment),
            "transfer" => Ok(Self::Transfer),
            "event" => Ok(Self::Event),
            other => Err(LedgerError::invalid_filter(
                "type",
                format!("unknown transaction type '{other}'"),
            )),
        }
    }
}

/// A committed ledger record.
///
/// Immutable once written, except that a redemption gains `processed_by`
/// when staff fulfil it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    /// Owner of the balance effect.
    pub user_id: UserId,
    pub created_by: UserId,
    /// Signed points delta for `user_id`. Negative for redemptions and
    /// outgoing transfers.
    pub amount: i64,
    /// Money spent, purchases only.
    pub spent: Option<Decimal>,
    /// Transfer counterparty.
    pub related_user: Option<UserId>,
    /// Adjustment target, or the mirror record of a transfer.
    pub related_transaction: Option<TransactionId>,
    pub event_id: Option<EventId>,
    pub remark: Option<String>,
    pub promotion_ids: Vec<PromotionId>,
    /// Staff member who fulfilled a redemption; `None` while pending.
    pub processed_by: Option<UserId>,
    /// Recorded by a flagged actor and withheld from the balance.
    pub suspicious: bool,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_pending(&self) -> bool {
        self.kind == TransactionKind::Redemption && self.processed_by.is_none()
    }

    /// Whether `amount` is currently reflected in the owner's balance.
    pub fn counts_toward_balance(&self) -> bool {
        !self.is_pending() && !self.suspicious
    }

    pub(crate) fn from_draft(id: TransactionId, draft: TransactionDraft) -> Self {
        Self {
            id,
            kind: draft.kind,
            user_id: draft.user_id,
            created_by: draft.created_by,
            amount: draft.amount,
            spent: draft.spent,
            related_user: draft.related_user,
            related_transaction: draft.related_transaction,
            event_id: draft.event_id,
            remark: draft.remark,
            promotion_ids: draft.promotion_ids,
            processed_by: None,
            suspicious: draft.suspicious,
            created_at: draft.created_at,
        }
    }
}

/// A record about to be inserted inside an atomic unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDraft {
    pub kind: TransactionKind,
    pub user_id: UserId,
    pub created_by: UserId,
    pub amount: i64,
    pub spent: Option<Decimal>,
    pub related_user: Option<UserId>,
    pub related_transaction: Option<TransactionId>,
    pub event_id: Option<EventId>,
    pub remark: Option<String>,
    pub promotion_ids: Vec<PromotionId>,
    pub suspicious: bool,
    pub created_at: DateTime<Utc>,
}

impl TransactionDraft {
    pub fn new(
        kind: TransactionKind,
        user_id: UserId,
        created_by: UserId,
        amount: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            user_id,
            created_by,
            amount,
            spent: None,
            related_user: None,
            related_transaction: None,
            event_id: None,
            remark: None,
            promotion_ids: Vec::new(),
            suspicious: false,
            created_at,
        }
    }

    pub fn remark(mut self, remark: Option<String>) -> Self {
        self.remark = remark;
        self
    }
}

/// Records a cashier's sale to `user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub user: UserId,
    pub cashier: UserId,
    pub spent: Decimal,
    #[serde(default)]
    pub promotion_ids: Vec<PromotionId>,
    #[serde(default)]
    pub remark: Option<String>,
}

/// A user's request to redeem `amount` points, fulfilled later by staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRequest {
    pub user: UserId,
    /// Points to redeem, positive.
    pub amount: i64,
    #[serde(default)]
    pub remark: Option<String>,
}

/// A manager's correction of an earlier transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub created_by: UserId,
    pub related_transaction: TransactionId,
    /// Consistency check against the related transaction's owner.
    #[serde(default)]
    pub user: Option<UserId>,
    pub amount: i64,
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub sender: UserId,
    pub recipient: UserId,
    /// Points to move, positive.
    pub amount: i64,
    #[serde(default)]
    pub remark: Option<String>,
}

/// Awards points from an event's pool.
///
/// With `recipient` unset, every guest receives `amount` and the batch
/// commits as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAwardRequest {
    pub event: EventId,
    pub created_by: UserId,
    #[serde(default)]
    pub recipient: Option<UserId>,
    pub amount: i64,
    #[serde(default)]
    pub remark: Option<String>,
}

/// Transaction creation input, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransactionRequest {
    Purchase(PurchaseRequest),
    Redemption(RedemptionRequest),
    Adjustment(AdjustmentRequest),
    Transfer(TransferRequest),
    Event(EventAwardRequest),
}

impl TransactionRequest {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Self::Purchase(_) => TransactionKind::Purchase,
            Self::Redemption(_) => TransactionKind::Redemption,
            Self::Adjustment(_) => TransactionKind::Adjustment,
            Self::Transfer(_) => TransactionKind::Transfer,
            Self::Event(_) => TransactionKind::Event,
        }
    }
}

/// Records written by one successful `create_transaction` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Single(Transaction),
    /// Linked pair: `sent` is the sender's debit, `received` the credit.
    Transfer {
        sent: Transaction,
        received: Transaction,
    },
    /// One award per event guest.
    Batch(Vec<Transaction>),
}

impl Recorded {
    /// The record a caller would show first: the single record, the
    /// sender's side of a transfer, or the first award of a batch.
    pub fn primary(&self) -> Option<&Transaction> {
        match self {
            Self::Single(tx) => Some(tx),
            Self::Transfer { sent, .. } => Some(sent),
            Self::Batch(txs) => txs.first(),
        }
    }

    pub fn into_records(self) -> Vec<Transaction> {
        match self {
            Self::Single(tx) => vec![tx],
            Self::Transfer { sent, received } => vec![sent, received],
            Self::Batch(txs) => txs,
        }
    }
}
