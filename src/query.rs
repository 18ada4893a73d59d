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

//! Read-side listing of transactions and users.
//!
//! Results are ordered by id ascending unless the filter asks for a points
//! ordering, so pages never overlap or skip records between calls.

use crate::base::{PromotionId, UserId};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::store::LedgerStore;
use crate::transaction::{Transaction, TransactionKind};
use crate::user::{Role, User};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmountOperator {
    Gte,
    Lte,
}

impl FromStr for AmountOperator {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gte" => Ok(Self::Gte),
            "lte" => Ok(Self::Lte),
            other => Err(LedgerError::invalid_filter(
                "operator",
                format!("expected gte or lte, got '{other}'"),
            )),
        }
    }
}

/// Amount threshold, e.g. `amount >= 100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountFilter {
    pub operator: AmountOperator,
    pub value: i64,
}

impl AmountFilter {
    pub fn parse(operator: &str, value: i64) -> Result<Self> {
        Ok(Self {
            operator: operator.parse()?,
            value,
        })
    }

    pub fn matches(&self, amount: i64) -> bool {
        match self.operator {
            AmountOperator::Gte => amount >= self.value,
            AmountOperator::Lte => amount <= self.value,
        }
    }
}

/// Transaction listing filter. Every field is optional; set fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionFilter {
    #[serde(rename = "type")]
    pub kind: Option<TransactionKind>,
    /// Owner of the record.
    pub user: Option<UserId>,
    /// Case-insensitive substring of the owner's utorid or name.
    pub name: Option<String>,
    pub created_by: Option<UserId>,
    pub promotion: Option<PromotionId>,
    /// Meaning depends on `kind`: the corrected transaction of an adjustment,
    /// the counterparty of a transfer, the event of an award, or the staff
    /// member who processed a redemption. Requires `kind`.
    pub related_id: Option<u32>,
    pub amount: Option<AmountFilter>,
    pub suspicious: Option<bool>,
}

impl TransactionFilter {
    pub fn validate(&self) -> Result<()> {
        if self.related_id.is_some() {
            match self.kind {
                None => {
                    return Err(LedgerError::invalid_filter(
                        "relatedId",
                        "requires a transaction type",
                    ));
                }
                Some(TransactionKind::Purchase) => {
                    return Err(LedgerError::invalid_filter(
                        "relatedId",
                        "purchases have no related id",
                    ));
                }
                Some(_) => {}
            }
        }
        validate_name(self.name.as_deref())
    }

    fn matches(&self, tx: &Transaction, owners: Option<&HashSet<UserId>>) -> bool {
        self.kind.is_none_or(|kind| tx.kind == kind)
            && self.user.is_none_or(|user| tx.user_id == user)
            && owners.is_none_or(|owners| owners.contains(&tx.user_id))
            && self.created_by.is_none_or(|by| tx.created_by == by)
            && self
                .promotion
                .is_none_or(|promotion| tx.promotion_ids.contains(&promotion))
            && self.related_id.is_none_or(|id| related_id(tx) == Some(id))
            && self.amount.is_none_or(|amount| amount.matches(tx.amount))
            && self.suspicious.is_none_or(|flag| tx.suspicious == flag)
    }
}

fn related_id(tx: &Transaction) -> Option<u32> {
    match tx.kind {
        TransactionKind::Purchase => None,
        TransactionKind::Adjustment => tx.related_transaction.map(|id| id.0),
        TransactionKind::Transfer => tx.related_user.map(|id| id.0),
        TransactionKind::Event => tx.event_id.map(|id| id.0),
        TransactionKind::Redemption => tx.processed_by.map(|id| id.0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointsOrder {
    Asc,
    Desc,
}

impl FromStr for PointsOrder {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(LedgerError::invalid_filter(
                "orderByPoints",
                format!("expected asc or desc, got '{other}'"),
            )),
        }
    }
}

/// User listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFilter {
    /// Case-insensitive substring of the utorid or name.
    pub name: Option<String>,
    pub role: Option<Role>,
    pub verified: Option<bool>,
    pub suspicious: Option<bool>,
    /// Sort by balance; ties keep id order.
    pub order_by_points: Option<PointsOrder>,
}

impl UserFilter {
    pub fn validate(&self) -> Result<()> {
        validate_name(self.name.as_deref())
    }

    fn matches(&self, user: &User) -> bool {
        self.name
            .as_deref()
            .is_none_or(|needle| name_matches(user, needle))
            && self.role.is_none_or(|role| user.role == role)
            && self.verified.is_none_or(|flag| user.verified == flag)
            && self.suspicious.is_none_or(|flag| user.suspicious == flag)
    }
}

fn validate_name(name: Option<&str>) -> Result<()> {
    match name {
        Some(name) if name.trim().is_empty() => {
            Err(LedgerError::invalid_filter("name", "must not be empty"))
        }
        _ => Ok(()),
    }
}

fn name_matches(user: &User, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    user.utorid.to_lowercase().contains(&needle)
        || user
            .name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains(&needle))
}

/// 1-based page number and page size. `None` takes the configured default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageRequest {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
        }
    }

    /// Resolves to `(offset, limit)`.
    fn resolve(&self, config: &LedgerConfig) -> Result<(usize, usize)> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(LedgerError::invalid_filter("page", "must be at least 1"));
        }
        let limit = self.limit.unwrap_or(config.default_page_size);
        if limit == 0 || limit > config.max_page_size {
            return Err(LedgerError::invalid_filter(
                "limit",
                format!("must be between 1 and {}", config.max_page_size),
            ));
        }
        let offset = (page as usize - 1).saturating_mul(limit as usize);
        Ok((offset, limit as usize))
    }
}

/// One page of results plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub count: usize,
}

impl<T> Page<T> {
    fn slice(all: Vec<T>, offset: usize, limit: usize) -> Self {
        let count = all.len();
        let results = all.into_iter().skip(offset).take(limit).collect();
        Self { results, count }
    }
}

/// Lists committed transactions matching `filter`, id ascending.
///
/// # Errors
///
/// [`LedgerError::InvalidFilter`] for a malformed filter or page request.
pub fn list_transactions<S>(
    store: &S,
    filter: &TransactionFilter,
    page: PageRequest,
    config: &LedgerConfig,
) -> Result<Page<Transaction>>
where
    S: LedgerStore + ?Sized,
{
    filter.validate()?;
    let (offset, limit) = page.resolve(config)?;

    let owners: Option<HashSet<UserId>> = filter.name.as_deref().map(|needle| {
        store
            .query_users(&|user| name_matches(user, needle))
            .into_iter()
            .map(|user| user.id)
            .collect()
    });

    let mut matched = store.query_transactions(&|tx| filter.matches(tx, owners.as_ref()));
    matched.sort_by_key(|tx| tx.id);
    Ok(Page::slice(matched, offset, limit))
}

/// Lists users matching `filter`, id ascending or by points when requested.
///
/// # Errors
///
/// [`LedgerError::InvalidFilter`] for a malformed filter or page request.
pub fn list_users<S>(
    store: &S,
    filter: &UserFilter,
    page: PageRequest,
    config: &LedgerConfig,
) -> Result<Page<User>>
where
    S: LedgerStore + ?Sized,
{
    filter.validate()?;
    let (offset, limit) = page.resolve(config)?;

    let mut matched = store.query_users(&|user| filter.matches(user));
    match filter.order_by_points {
        Some(PointsOrder::Asc) => matched.sort_by_key(|user| (user.points, user.id)),
        Some(PointsOrder::Desc) => {
            matched.sort_by(|a, b| b.points.cmp(&a.points).then(a.id.cmp(&b.id)))
        }
        None => matched.sort_by_key(|user| user.id),
    }
    Ok(Page::slice(matched, offset, limit))
}
