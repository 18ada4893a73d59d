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

//! Promotions and purchase point evaluation.
//!
//! # Rounding
//!
//! Base points are `floor(spent / point_rate)`. A rate promotion adds
//! `floor(spent / point_rate * (rate - 1))`, floored on its own against the
//! exact base, so the order in which promotions are listed never changes the
//! total. A flat promotion adds its `points` once.
//!
//! ```
//! use loyalty_ledger::promotion::{evaluate_purchase, Promotion, PromotionKind};
//! use loyalty_ledger::PromotionId;
//! use chrono::{Duration, Utc};
//! use rust_decimal_macros::dec;
//! use std::collections::HashSet;
//!
//! let now = Utc::now();
//! let promo = Promotion {
//!     id: PromotionId(1),
//!     name: "Big spender".into(),
//!     kind: PromotionKind::Automatic,
//!     start_time: now - Duration::days(1),
//!     end_time: now + Duration::days(1),
//!     min_spending: Some(dec!(50)),
//!     rate: Some(dec!(1.5)),
//!     points: None,
//! };
//!
//! let quote = evaluate_purchase(
//!     dec!(50.00),
//!     &[PromotionId(1)],
//!     &[promo],
//!     &HashSet::new(),
//!     now,
//!     dec!(0.25),
//! )
//! .unwrap();
//! assert_eq!(quote.base_points, 200);
//! assert_eq!(quote.amount, 300);
//! ```

use crate::base::{PromotionId, UserId};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionKind {
    /// Usable on any number of purchases while active.
    Automatic,
    /// Usable at most once per user.
    Onetime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: PromotionId,
    pub name: String,
    pub kind: PromotionKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub min_spending: Option<Decimal>,
    /// Multiplier on the base point yield.
    #[serde(default)]
    pub rate: Option<Decimal>,
    /// Flat bonus.
    #[serde(default)]
    pub points: Option<i64>,
}

impl Promotion {
    /// Active over the half-open window `start_time <= at < end_time`.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.start_time <= at && at < self.end_time
    }

    /// Checks that the promotion carries exactly one of `rate` or `points`
    /// and that its window and thresholds are sane.
    pub fn validate(&self) -> Result<()> {
        if self.start_time >= self.end_time {
            return Err(LedgerError::validation(
                "end_time",
                "must be after start_time",
            ));
        }
        match (self.rate, self.points) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(LedgerError::validation(
                    "rate",
                    "exactly one of rate or points must be set",
                ));
            }
            (Some(rate), None) if rate < Decimal::ONE => {
                return Err(LedgerError::validation("rate", "must be at least 1"));
            }
            (None, Some(points)) if points <= 0 => {
                return Err(LedgerError::validation("points", "must be positive"));
            }
            _ => {}
        }
        if let Some(min) = self.min_spending
            && min <= Decimal::ZERO
        {
            return Err(LedgerError::validation("min_spending", "must be positive"));
        }
        Ok(())
    }

    /// Bonus this promotion adds on top of the base yield for `spent`.
    fn bonus(&self, spent: Decimal, point_rate: Decimal) -> Result<i64> {
        match (self.rate, self.points) {
            (Some(rate), _) => {
                let bonus = spent
                    .checked_div(point_rate)
                    .and_then(|base| base.checked_mul(rate - Decimal::ONE))
                    .ok_or_else(|| LedgerError::validation("spent", "points out of range"))?;
                to_points(bonus.floor().max(Decimal::ZERO), "rate")
            }
            (None, Some(points)) => Ok(points.max(0)),
            (None, None) => Ok(0),
        }
    }
}

/// Read-only promotion lookups.
pub trait PromotionRepository {
    fn promotion(&self, id: PromotionId) -> Option<Promotion>;

    /// Promotions whose window contains `at`.
    fn active_promotions(&self, at: DateTime<Utc>) -> Vec<Promotion>;

    /// Onetime promotions `user` has already consumed.
    fn used_onetime_promotions(&self, user: UserId) -> HashSet<PromotionId>;
}

/// Outcome of pricing a purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseQuote {
    pub base_points: i64,
    pub bonus_points: i64,
    /// `base_points + bonus_points`.
    pub amount: i64,
    /// Requested promotions that were applied, de-duplicated, in request order.
    pub applied: Vec<PromotionId>,
}

impl PurchaseQuote {
    /// Onetime promotions in `applied`, which become consumed once recorded.
    pub fn onetime_ids<'a>(
        &'a self,
        candidates: &'a [Promotion],
    ) -> impl Iterator<Item = PromotionId> + 'a {
        self.applied.iter().copied().filter(move |id| {
            candidates
                .iter()
                .any(|p| p.id == *id && p.kind == PromotionKind::Onetime)
        })
    }
}

/// Points earned for `spent` before any promotion.
pub fn base_points(spent: Decimal, point_rate: Decimal) -> Result<i64> {
    if point_rate <= Decimal::ZERO {
        return Err(LedgerError::validation("point_rate", "must be positive"));
    }
    let base = spent
        .checked_div(point_rate)
        .ok_or_else(|| LedgerError::validation("spent", "points out of range"))?;
    to_points(base.floor(), "spent")
}

/// Prices a purchase and checks every requested promotion.
///
/// Pure: the same inputs always give the same quote.
///
/// # Errors
///
/// - [`LedgerError::Validation`] - `spent` is not positive.
/// - [`LedgerError::InvalidPromotion`] - A requested id is not among
///   `candidates`, is outside its window at `now`, or is a onetime promotion
///   listed in `used_onetime`.
/// - [`LedgerError::MinSpendingNotMet`] - `spent` is below a requested
///   promotion's minimum.
pub fn evaluate_purchase(
    spent: Decimal,
    requested: &[PromotionId],
    candidates: &[Promotion],
    used_onetime: &HashSet<PromotionId>,
    now: DateTime<Utc>,
    point_rate: Decimal,
) -> Result<PurchaseQuote> {
    if spent <= Decimal::ZERO {
        return Err(LedgerError::validation("spent", "must be positive"));
    }
    let base = base_points(spent, point_rate)?;

    let mut applied = Vec::with_capacity(requested.len());
    let mut bonus: i64 = 0;
    for &id in requested {
        if applied.contains(&id) {
            continue;
        }
        let promotion = candidates
            .iter()
            .find(|p| p.id == id)
            .ok_or(LedgerError::InvalidPromotion {
                promotion: id,
                reason: "not currently active",
            })?;

        if now < promotion.start_time {
            return Err(LedgerError::InvalidPromotion {
                promotion: id,
                reason: "has not started",
            });
        }
        if now >= promotion.end_time {
            return Err(LedgerError::InvalidPromotion {
                promotion: id,
                reason: "has ended",
            });
        }
        if promotion.kind == PromotionKind::Onetime && used_onetime.contains(&id) {
            return Err(LedgerError::InvalidPromotion {
                promotion: id,
                reason: "already used",
            });
        }
        if let Some(min_spending) = promotion.min_spending
            && spent < min_spending
        {
            return Err(LedgerError::MinSpendingNotMet {
                promotion: id,
                min_spending,
                spent,
            });
        }

        bonus = bonus
            .checked_add(promotion.bonus(spent, point_rate)?)
            .ok_or_else(|| LedgerError::validation("spent", "bonus points overflow"))?;
        applied.push(id);
    }

    let amount = base
        .checked_add(bonus)
        .ok_or_else(|| LedgerError::validation("spent", "points overflow"))?;

    Ok(PurchaseQuote {
        base_points: base,
        bonus_points: bonus,
        amount,
        applied,
    })
}

fn to_points(value: Decimal, field: &'static str) -> Result<i64> {
    value
        .to_i64()
        .ok_or_else(|| LedgerError::validation(field, "points out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    const RATE: Decimal = dec!(0.25);

    fn promo(id: u32, kind: PromotionKind, rate: Option<Decimal>, points: Option<i64>) -> Promotion {
        let now = Utc::now();
        Promotion {
            id: PromotionId(id),
            name: format!("promo {id}"),
            kind,
            start_time: now - Duration::days(1),
            end_time: now + Duration::days(1),
            min_spending: None,
            rate,
            points,
        }
    }

    #[test]
    fn base_points_floor_fractional_quarters() {
        assert_eq!(base_points(dec!(50.00), RATE).unwrap(), 200);
        assert_eq!(base_points(dec!(10.10), RATE).unwrap(), 40);
        assert_eq!(base_points(dec!(0.24), RATE).unwrap(), 0);
    }

    #[test]
    fn overflowing_yield_is_an_error() {
        assert!(matches!(
            base_points(Decimal::MAX.trunc(), RATE),
            Err(LedgerError::Validation { field: "spent", .. })
        ));

        let huge = promo(1, PromotionKind::Automatic, Some(dec!(100000000000000000000)), None);
        assert!(huge.bonus(dec!(1000000000000000.00), RATE).is_err());
        assert!(matches!(
            evaluate_purchase(
                dec!(1000000000000000.00),
                &[PromotionId(1)],
                &[huge],
                &HashSet::new(),
                Utc::now(),
                RATE,
            ),
            Err(LedgerError::Validation { field: "spent", .. })
        ));
    }

    #[test]
    fn no_promotions_yields_base() {
        let quote =
            evaluate_purchase(dec!(50.00), &[], &[], &HashSet::new(), Utc::now(), RATE).unwrap();
        assert_eq!(quote.amount, 200);
        assert_eq!(quote.bonus_points, 0);
        assert!(quote.applied.is_empty());
    }

    #[test]
    fn rate_bonus_is_floored_per_promotion() {
        // 10.10 / 0.25 = 40.4; 40.4 * 0.5 = 20.2 -> 20
        let half = promo(1, PromotionKind::Automatic, Some(dec!(1.5)), None);
        let quote = evaluate_purchase(
            dec!(10.10),
            &[PromotionId(1)],
            &[half],
            &HashSet::new(),
            Utc::now(),
            RATE,
        )
        .unwrap();
        assert_eq!(quote.base_points, 40);
        assert_eq!(quote.bonus_points, 20);
        assert_eq!(quote.amount, 60);
    }

    #[test]
    fn flat_and_rate_bonuses_accumulate() {
        let double = promo(1, PromotionKind::Automatic, Some(dec!(2)), None);
        let flat = promo(2, PromotionKind::Onetime, None, Some(100));
        let quote = evaluate_purchase(
            dec!(8.00),
            &[PromotionId(2), PromotionId(1)],
            &[double, flat],
            &HashSet::new(),
            Utc::now(),
            RATE,
        )
        .unwrap();
        assert_eq!(quote.base_points, 32);
        assert_eq!(quote.bonus_points, 132);
        assert_eq!(quote.applied, vec![PromotionId(2), PromotionId(1)]);
    }

    #[test]
    fn duplicate_requests_apply_once() {
        let flat = promo(3, PromotionKind::Automatic, None, Some(50));
        let quote = evaluate_purchase(
            dec!(20.00),
            &[PromotionId(3), PromotionId(3)],
            &[flat],
            &HashSet::new(),
            Utc::now(),
            RATE,
        )
        .unwrap();
        assert_eq!(quote.amount, 130);
        assert_eq!(quote.applied, vec![PromotionId(3)]);
    }

    #[test]
    fn unknown_promotion_is_invalid() {
        let result = evaluate_purchase(
            dec!(20.00),
            &[PromotionId(9)],
            &[],
            &HashSet::new(),
            Utc::now(),
            RATE,
        );
        assert!(matches!(
            result,
            Err(LedgerError::InvalidPromotion {
                promotion: PromotionId(9),
                ..
            })
        ));
    }

    #[test]
    fn expired_promotion_is_invalid() {
        let mut expired = promo(1, PromotionKind::Automatic, Some(dec!(2)), None);
        let now = Utc::now();
        expired.end_time = now;
        let result = evaluate_purchase(
            dec!(20.00),
            &[PromotionId(1)],
            &[expired],
            &HashSet::new(),
            now,
            RATE,
        );
        assert_eq!(
            result,
            Err(LedgerError::InvalidPromotion {
                promotion: PromotionId(1),
                reason: "has ended",
            })
        );
    }

    #[test]
    fn used_onetime_is_invalid() {
        let flat = promo(2, PromotionKind::Onetime, None, Some(100));
        let used = HashSet::from([PromotionId(2)]);
        let result =
            evaluate_purchase(dec!(20.00), &[PromotionId(2)], &[flat], &used, Utc::now(), RATE);
        assert_eq!(
            result,
            Err(LedgerError::InvalidPromotion {
                promotion: PromotionId(2),
                reason: "already used",
            })
        );
    }

    #[test]
    fn used_set_ignored_for_automatic() {
        let flat = promo(2, PromotionKind::Automatic, None, Some(10));
        let used = HashSet::from([PromotionId(2)]);
        let quote =
            evaluate_purchase(dec!(1.00), &[PromotionId(2)], &[flat], &used, Utc::now(), RATE)
                .unwrap();
        assert_eq!(quote.amount, 14);
    }

    #[test]
    fn min_spending_is_enforced() {
        let mut big = promo(1, PromotionKind::Automatic, Some(dec!(1.5)), None);
        big.min_spending = Some(dec!(50));
        let result = evaluate_purchase(
            dec!(49.99),
            &[PromotionId(1)],
            &[big],
            &HashSet::new(),
            Utc::now(),
            RATE,
        );
        assert_eq!(
            result,
            Err(LedgerError::MinSpendingNotMet {
                promotion: PromotionId(1),
                min_spending: dec!(50),
                spent: dec!(49.99),
            })
        );
    }

    #[test]
    fn non_positive_spent_is_rejected() {
        let result = evaluate_purchase(dec!(0), &[], &[], &HashSet::new(), Utc::now(), RATE);
        assert!(matches!(
            result,
            Err(LedgerError::Validation { field: "spent", .. })
        ));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let candidates = vec![
            promo(1, PromotionKind::Automatic, Some(dec!(3)), None),
            promo(2, PromotionKind::Onetime, None, Some(50)),
        ];
        let now = Utc::now();
        let run = || {
            evaluate_purchase(
                dec!(33.33),
                &[PromotionId(1), PromotionId(2)],
                &candidates,
                &HashSet::new(),
                now,
                RATE,
            )
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn onetime_ids_filters_by_kind() {
        let candidates = vec![
            promo(1, PromotionKind::Automatic, Some(dec!(2)), None),
            promo(2, PromotionKind::Onetime, None, Some(50)),
        ];
        let quote = PurchaseQuote {
            base_points: 4,
            bonus_points: 54,
            amount: 58,
            applied: vec![PromotionId(1), PromotionId(2)],
        };
        let onetime: Vec<_> = quote.onetime_ids(&candidates).collect();
        assert_eq!(onetime, vec![PromotionId(2)]);
    }

    #[test]
    fn validate_requires_exactly_one_bonus() {
        let mut both = promo(1, PromotionKind::Automatic, Some(dec!(2)), Some(5));
        assert!(both.validate().is_err());
        both.points = None;
        assert!(both.validate().is_ok());
        both.rate = None;
        assert!(both.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_window() {
        let mut p = promo(1, PromotionKind::Automatic, None, Some(5));
        p.end_time = p.start_time;
        assert!(matches!(
            p.validate(),
            Err(LedgerError::Validation { field: "end_time", .. })
        ));
    }
}
