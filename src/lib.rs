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

//! # Loyalty Ledger
//!
//! Points ledger for a campus loyalty program: users earn points on
//! purchases, spend them through redemptions, move them between accounts
//! with transfers, and receive them from events and staff adjustments.
//!
//! ## Core Components
//!
//! - [`LedgerEngine`]: Points accounting engine, the only writer of balances
//! - [`evaluate_purchase`]: Pure promotion evaluator pricing a purchase
//! - [`LedgerStore`]: Atomic storage seam, implemented in memory by [`MemoryStore`]
//! - [`query`]: Filtered, paginated listings of transactions and users
//! - [`LedgerError`]: Error kinds, each with a user-facing message
//!
//! ## Example
//!
//! ```
//! use loyalty_ledger::{
//!     LedgerEngine, MemoryStore, NewUser, PurchaseRequest, Recorded, Role, TransactionRequest,
//! };
//! use rust_decimal_macros::dec;
//!
//! let store = MemoryStore::new();
//! let cashier = store
//!     .insert_user(NewUser::regular("cashier1", "cashier1@mail.utoronto.ca").with_role(Role::Cashier))
//!     .unwrap();
//! let student = store
//!     .insert_user(NewUser::regular("student1", "student1@mail.utoronto.ca"))
//!     .unwrap();
//! let engine = LedgerEngine::new(store);
//!
//! let recorded = engine
//!     .create_transaction(TransactionRequest::Purchase(PurchaseRequest {
//!         user: student.id,
//!         cashier: cashier.id,
//!         spent: dec!(50.00),
//!         promotion_ids: vec![],
//!         remark: None,
//!     }))
//!     .unwrap();
//!
//! let Recorded::Single(purchase) = recorded else { unreachable!() };
//! assert_eq!(purchase.amount, 200);
//! assert_eq!(engine.user(student.id).unwrap().points, 200);
//! ```
//!
//! ## Thread Safety
//!
//! [`MemoryStore`] commits with optimistic concurrency. Operations on
//! disjoint users run in parallel; operations on the same user serialise,
//! and the engine retries a unit that lost a race.

mod base;
pub mod config;
mod engine;
pub mod error;
mod event;
pub mod fixture;
mod memory;
pub mod promotion;
pub mod query;
pub mod store;
mod transaction;
mod user;

pub use base::{EventId, PromotionId, TransactionId, UserId};
pub use config::LedgerConfig;
pub use engine::LedgerEngine;
pub use error::{ConfigError, LedgerError, Result};
pub use event::Event;
pub use fixture::Fixture;
pub use memory::MemoryStore;
pub use promotion::{
    Promotion, PromotionKind, PromotionRepository, PurchaseQuote, evaluate_purchase,
};
pub use query::{
    AmountFilter, AmountOperator, Page, PageRequest, PointsOrder, TransactionFilter, UserFilter,
};
pub use store::{LedgerStore, LedgerTxn};
pub use transaction::{
    AdjustmentRequest, EventAwardRequest, PurchaseRequest, Recorded, RedemptionRequest,
    Transaction, TransactionDraft, TransactionKind, TransactionRequest, TransferRequest,
};
pub use user::{NewUser, Role, User};
