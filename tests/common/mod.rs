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

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use loyalty_ledger::{
    Event, EventId, LedgerConfig, LedgerEngine, MemoryStore, NewUser, Promotion, PromotionId,
    PromotionKind, PurchaseRequest, Role, UserId,
};
use rust_decimal::Decimal;

pub struct Ledger {
    pub engine: LedgerEngine<MemoryStore>,
    pub cashier: UserId,
    pub manager: UserId,
}

impl Ledger {
    pub fn store(&self) -> &MemoryStore {
        self.engine.store()
    }

    pub fn points(&self, user: UserId) -> i64 {
        self.engine.user(user).unwrap().points
    }

    /// Registers a verified regular member.
    pub fn member(&self, utorid: &str) -> UserId {
        self.store()
            .insert_user(
                NewUser::regular(utorid, format!("{utorid}@mail.utoronto.ca")).verified(),
            )
            .unwrap()
            .id
    }

    pub fn staff(&self, utorid: &str, role: Role) -> UserId {
        self.store()
            .insert_user(
                NewUser::regular(utorid, format!("{utorid}@mail.utoronto.ca"))
                    .with_role(role)
                    .verified(),
            )
            .unwrap()
            .id
    }

    /// Credits exactly `points` through a promotion-free purchase.
    pub fn fund(&self, user: UserId, points: i64) {
        self.engine
            .purchase(make_purchase(user, self.cashier, spent_for(points)))
            .unwrap();
    }

    pub fn event(
        &self,
        id: u32,
        points_remain: i64,
        organizers: &[UserId],
        guests: &[UserId],
    ) -> EventId {
        self.store()
            .insert_event(Event {
                id: EventId(id),
                name: format!("Event {id}"),
                points_remain,
                points_awarded: 0,
                organizers: organizers.to_vec(),
                guests: guests.to_vec(),
            })
            .unwrap()
            .id
    }
}

/// Ledger with a cashier (id 1) and a manager (id 2).
pub fn make_ledger() -> Ledger {
    make_ledger_with(LedgerConfig::default())
}

pub fn make_ledger_with(config: LedgerConfig) -> Ledger {
    let store = MemoryStore::new();
    let cashier = store
        .insert_user(
            NewUser::regular("cashier1", "cashier1@mail.utoronto.ca")
                .with_role(Role::Cashier)
                .verified(),
        )
        .unwrap()
        .id;
    let manager = store
        .insert_user(
            NewUser::regular("manager1", "manager1@mail.utoronto.ca")
                .with_role(Role::Manager)
                .verified(),
        )
        .unwrap()
        .id;
    Ledger {
        engine: LedgerEngine::with_config(store, config),
        cashier,
        manager,
    }
}

/// Money that buys exactly `points` at the default rate of 0.25.
pub fn spent_for(points: i64) -> Decimal {
    Decimal::new(points * 25, 2)
}

pub fn make_purchase(user: UserId, cashier: UserId, spent: Decimal) -> PurchaseRequest {
    PurchaseRequest {
        user,
        cashier,
        spent,
        promotion_ids: vec![],
        remark: None,
    }
}

/// A promotion active from yesterday until next week.
pub fn make_promotion(id: u32, kind: PromotionKind) -> Promotion {
    let now = Utc::now();
    Promotion {
        id: PromotionId(id),
        name: format!("Promotion {id}"),
        kind,
        start_time: now - Duration::days(1),
        end_time: now + Duration::days(7),
        min_spending: None,
        rate: None,
        points: None,
    }
}
