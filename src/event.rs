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

//! Events and their capped points pools.

use crate::base::{EventId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    /// Points still available to award. Never negative.
    pub points_remain: i64,
    /// Points awarded so far.
    #[serde(default)]
    pub points_awarded: i64,
    #[serde(default)]
    pub organizers: Vec<UserId>,
    #[serde(default)]
    pub guests: Vec<UserId>,
}

impl Event {
    pub fn is_organizer(&self, user: UserId) -> bool {
        self.organizers.contains(&user)
    }

    pub fn is_guest(&self, user: UserId) -> bool {
        self.guests.contains(&user)
    }

    /// Guests in ascending id order, without duplicates.
    pub fn guest_ids(&self) -> Vec<UserId> {
        let mut guests = self.guests.clone();
        guests.sort();
        guests.dedup();
        guests
    }
}
