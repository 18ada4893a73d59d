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

//! TOML ledger fixtures.
//!
//! ```toml
//! [[users]]
//! utorid = "cashier1"
//! email = "cashier1@mail.utoronto.ca"
//! role = "cashier"
//! verified = true
//!
//! [[events]]
//! id = 1
//! name = "Orientation"
//! points_remain = 1000
//! organizers = ["cashier1"]
//! guests = ["student1"]
//!
//! [[promotions]]
//! id = 1
//! name = "Double points"
//! kind = "automatic"
//! start_time = "2025-01-01T00:00:00Z"
//! end_time = "2026-01-01T00:00:00Z"
//! rate = "2"
//! ```
//!
//! Users get ids in file order starting at 1. Events name organizers and
//! guests by utorid.

use crate::base::{EventId, UserId};
use crate::error::ConfigError;
use crate::event::Event;
use crate::memory::MemoryStore;
use crate::promotion::Promotion;
use crate::user::NewUser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Fixture {
    pub users: Vec<NewUser>,
    pub events: Vec<EventFixture>,
    pub promotions: Vec<Promotion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventFixture {
    pub id: EventId,
    pub name: String,
    pub points_remain: i64,
    #[serde(default)]
    pub organizers: Vec<String>,
    #[serde(default)]
    pub guests: Vec<String>,
}

impl Fixture {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Builds a fresh store holding the fixture's users, events, and promotions.
    pub fn seed(&self) -> Result<MemoryStore, ConfigError> {
        let store = MemoryStore::new();
        let mut ids = HashMap::with_capacity(self.users.len());
        for new_user in &self.users {
            let user = store.insert_user(new_user.clone())?;
            ids.insert(user.utorid, user.id);
        }

        let resolve = |utorids: &[String]| -> Result<Vec<UserId>, ConfigError> {
            utorids
                .iter()
                .map(|utorid| {
                    ids.get(utorid).copied().ok_or_else(|| ConfigError::Invalid {
                        field: "events",
                        message: format!("unknown utorid '{utorid}'"),
                    })
                })
                .collect()
        };
        for event in &self.events {
            store.insert_event(Event {
                id: event.id,
                name: event.name.clone(),
                points_remain: event.points_remain,
                points_awarded: 0,
                organizers: resolve(&event.organizers)?,
                guests: resolve(&event.guests)?,
            })?;
        }

        for promotion in &self.promotions {
            store.insert_promotion(promotion.clone())?;
        }

        info!(
            users = self.users.len(),
            events = self.events.len(),
            promotions = self.promotions.len(),
            "seeded ledger from fixture"
        );
        Ok(store)
    }
}
