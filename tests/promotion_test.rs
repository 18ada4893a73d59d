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

//! Promotion application through the engine.

mod common;

use chrono::{Duration, Utc};
use common::{make_ledger, make_promotion, make_purchase};
use loyalty_ledger::{
    LedgerConfig, LedgerEngine, LedgerError, MemoryStore, NewUser, PageRequest, Promotion,
    PromotionId, PromotionKind, PromotionRepository, Role, TransactionFilter,
};
use parking_lot::Mutex;
use std::sync::Arc;
use rust_decimal_macros::dec;

fn flat_onetime(id: u32, points: i64) -> Promotion {
    let mut promotion = make_promotion(id, PromotionKind::Onetime);
    promotion.points = Some(points);
    promotion
}

#[test]
fn onetime_promotion_is_consumed_per_user() {
    let ledger = make_ledger();
    let alice = ledger.member("alice001");
    let bob = ledger.member("bobby002");
    ledger.store().insert_promotion(flat_onetime(1, 50)).unwrap();

    let mut request = make_purchase(alice, ledger.cashier, dec!(10.00));
    request.promotion_ids = vec![PromotionId(1)];
    let first = ledger.engine.purchase(request.clone()).unwrap();
    assert_eq!(first.amount, 90);

    assert_eq!(
        ledger.engine.purchase(request),
        Err(LedgerError::InvalidPromotion {
            promotion: PromotionId(1),
            reason: "already used",
        })
    );
    assert_eq!(ledger.points(alice), 90);
    assert!(
        ledger
            .store()
            .used_onetime_promotions(alice)
            .contains(&PromotionId(1))
    );

    let mut request = make_purchase(bob, ledger.cashier, dec!(10.00));
    request.promotion_ids = vec![PromotionId(1)];
    assert_eq!(ledger.engine.purchase(request).unwrap().amount, 90);
}

#[test]
fn automatic_promotion_applies_repeatedly() {
    let ledger = make_ledger();
    let alice = ledger.member("alice001");
    let mut promotion = make_promotion(1, PromotionKind::Automatic);
    promotion.points = Some(10);
    ledger.store().insert_promotion(promotion).unwrap();

    for _ in 0..3 {
        let mut request = make_purchase(alice, ledger.cashier, dec!(1.00));
        request.promotion_ids = vec![PromotionId(1)];
        ledger.engine.purchase(request).unwrap();
    }
    assert_eq!(ledger.points(alice), 42);
}

#[test]
fn duplicate_ids_apply_once() {
    let ledger = make_ledger();
    let alice = ledger.member("alice001");
    ledger.store().insert_promotion(flat_onetime(1, 50)).unwrap();

    let mut request = make_purchase(alice, ledger.cashier, dec!(10.00));
    request.promotion_ids = vec![PromotionId(1), PromotionId(1)];
    let tx = ledger.engine.purchase(request).unwrap();

    assert_eq!(tx.amount, 90);
    assert_eq!(tx.promotion_ids, vec![PromotionId(1)]);
}

#[test]
fn expired_promotion_is_not_active() {
    let ledger = make_ledger();
    let alice = ledger.member("alice001");
    let mut promotion = make_promotion(1, PromotionKind::Automatic);
    promotion.start_time = Utc::now() - Duration::days(10);
    promotion.end_time = Utc::now() - Duration::days(1);
    promotion.points = Some(10);
    ledger.store().insert_promotion(promotion).unwrap();

    let mut request = make_purchase(alice, ledger.cashier, dec!(10.00));
    request.promotion_ids = vec![PromotionId(1)];
    assert_eq!(
        ledger.engine.purchase(request),
        Err(LedgerError::InvalidPromotion {
            promotion: PromotionId(1),
            reason: "not currently active",
        })
    );
    assert_eq!(ledger.store().transaction_count(), 0);
}

#[test]
fn promotion_window_follows_engine_clock() {
    let store = MemoryStore::new();
    let cashier = store
        .insert_user(
            NewUser::regular("cashier1", "cashier1@mail.utoronto.ca").with_role(Role::Cashier),
        )
        .unwrap()
        .id;
    let alice = store
        .insert_user(NewUser::regular("alice001", "alice@mail.utoronto.ca"))
        .unwrap()
        .id;
    let mut promotion = make_promotion(1, PromotionKind::Automatic);
    promotion.rate = Some(dec!(2));
    let starts = promotion.start_time;
    let ends = promotion.end_time;
    store.insert_promotion(promotion).unwrap();

    let clock = Arc::new(Mutex::new(starts - Duration::seconds(1)));
    let engine = LedgerEngine::new(store).with_clock({
        let clock = Arc::clone(&clock);
        move || *clock.lock()
    });
    let mut request = make_purchase(alice, cashier, dec!(10.00));
    request.promotion_ids = vec![PromotionId(1)];

    assert!(matches!(
        engine.purchase(request.clone()),
        Err(LedgerError::InvalidPromotion { .. })
    ));

    *clock.lock() = starts;
    let tx = engine.purchase(request.clone()).unwrap();
    assert_eq!(tx.amount, 80);
    assert_eq!(tx.created_at, starts);

    // The window is half-open.
    *clock.lock() = ends;
    assert!(engine.purchase(request).is_err());
}

#[test]
fn rate_promotions_stack_with_per_promotion_floor() {
    let ledger = make_ledger();
    let alice = ledger.member("alice001");
    for (id, rate) in [(1, dec!(1.5)), (2, dec!(1.25))] {
        let mut promotion = make_promotion(id, PromotionKind::Automatic);
        promotion.rate = Some(rate);
        ledger.store().insert_promotion(promotion).unwrap();
    }

    // base floor(10.10 / 0.25) = 40
    // +floor(40.4 * 0.5) = 20, +floor(40.4 * 0.25) = 10
    let mut request = make_purchase(alice, ledger.cashier, dec!(10.10));
    request.promotion_ids = vec![PromotionId(2), PromotionId(1)];
    let tx = ledger.engine.purchase(request).unwrap();
    assert_eq!(tx.amount, 70);
    assert_eq!(tx.promotion_ids, vec![PromotionId(2), PromotionId(1)]);
}

#[test]
fn point_rate_comes_from_config() {
    let store = MemoryStore::new();
    let cashier = store
        .insert_user(
            NewUser::regular("cashier1", "cashier1@mail.utoronto.ca").with_role(Role::Cashier),
        )
        .unwrap()
        .id;
    let alice = store
        .insert_user(NewUser::regular("alice001", "alice@mail.utoronto.ca"))
        .unwrap()
        .id;
    let config = LedgerConfig {
        point_rate: dec!(1),
        ..LedgerConfig::default()
    };
    let engine = LedgerEngine::with_config(store, config);

    let tx = engine
        .purchase(make_purchase(alice, cashier, dec!(12.99)))
        .unwrap();
    assert_eq!(tx.amount, 12);
}

#[test]
fn purchases_can_be_listed_by_promotion() {
    let ledger = make_ledger();
    let alice = ledger.member("alice001");
    ledger.store().insert_promotion(flat_onetime(7, 5)).unwrap();

    ledger
        .engine
        .purchase(make_purchase(alice, ledger.cashier, dec!(1.00)))
        .unwrap();
    let mut request = make_purchase(alice, ledger.cashier, dec!(1.00));
    request.promotion_ids = vec![PromotionId(7)];
    let promoted = ledger.engine.purchase(request).unwrap();

    let filter = TransactionFilter {
        promotion: Some(PromotionId(7)),
        ..Default::default()
    };
    let page = ledger
        .engine
        .list_transactions(&filter, PageRequest::default())
        .unwrap();
    assert_eq!(page.count, 1);
    assert_eq!(page.results[0].id, promoted.id);
}
