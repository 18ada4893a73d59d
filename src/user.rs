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

//! User accounts and staff roles.
//!
//! The point balance lives on [`User`] but is only ever changed by the
//! [`LedgerEngine`](crate::LedgerEngine) through a store's atomic unit.

use crate::base::UserId;
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const EMAIL_DOMAIN: &str = "@mail.utoronto.ca";

/// Staff hierarchy, ordered `Regular < Cashier < Manager < Superuser`.
///
/// Event organizers are granted per event and are not a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Regular,
    Cashier,
    Manager,
    Superuser,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Cashier => "cashier",
            Self::Manager => "manager",
            Self::Superuser => "superuser",
        }
    }

    /// Returns `true` if this role is `required` or above.
    pub fn at_least(&self, required: Role) -> bool {
        *self >= required
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "regular" => Ok(Self::Regular),
            "cashier" => Ok(Self::Cashier),
            "manager" => Ok(Self::Manager),
            "superuser" => Ok(Self::Superuser),
            other => Err(LedgerError::invalid_filter(
                "role",
                format!("unknown role '{other}'"),
            )),
        }
    }
}

/// A loyalty-program member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub utorid: String,
    pub name: Option<String>,
    pub email: String,
    pub role: Role,
    /// Current redeemable balance. Never negative.
    pub points: i64,
    pub verified: bool,
    pub suspicious: bool,
}

impl User {
    /// Display name, falling back to the utorid.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.utorid)
    }
}

/// Registration data for a new user.
///
/// New users always start with zero points; balances are only built up
/// through ledger transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub utorid: String,
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub suspicious: bool,
}

fn default_role() -> Role {
    Role::Regular
}

impl NewUser {
    pub fn regular(utorid: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            utorid: utorid.into(),
            name: None,
            email: email.into(),
            role: Role::Regular,
            verified: false,
            suspicious: false,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }

    pub fn suspicious(mut self) -> Self {
        self.suspicious = true;
        self
    }

    /// Checks utorid, email, and name shape.
    pub fn validate(&self) -> Result<()> {
        let utorid_len = self.utorid.chars().count();
        if !(7..=8).contains(&utorid_len) {
            return Err(LedgerError::validation(
                "utorid",
                "must be 7 to 8 characters long",
            ));
        }
        if !self.utorid.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LedgerError::validation("utorid", "must be alphanumeric"));
        }

        let local = self.email.strip_suffix(EMAIL_DOMAIN).ok_or_else(|| {
            LedgerError::validation("email", format!("must be of domain {EMAIL_DOMAIN}"))
        })?;
        if local.is_empty() || local.contains('@') || local.contains(char::is_whitespace) {
            return Err(LedgerError::validation("email", "invalid email format"));
        }

        if let Some(name) = &self.name {
            let len = name.chars().count();
            if !(1..=50).contains(&len) {
                return Err(LedgerError::validation(
                    "name",
                    "must be 1 to 50 characters long",
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn into_user(self, id: UserId) -> User {
        User {
            id,
            utorid: self.utorid,
            name: self.name,
            email: self.email,
            role: self.role,
            points: 0,
            verified: self.verified,
            suspicious: self.suspicious,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> NewUser {
        NewUser::regular("johndoe1", "john.doe@mail.utoronto.ca")
    }

    #[test]
    fn roles_are_ordered() {
        assert!(Role::Superuser.at_least(Role::Manager));
        assert!(Role::Manager.at_least(Role::Cashier));
        assert!(Role::Cashier.at_least(Role::Cashier));
        assert!(!Role::Regular.at_least(Role::Cashier));
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Manager".parse::<Role>().unwrap(), Role::Manager);
        assert!(matches!(
            "owner".parse::<Role>(),
            Err(LedgerError::InvalidFilter { field: "role", .. })
        ));
    }

    #[test]
    fn valid_user_passes() {
        assert!(candidate().validate().is_ok());
    }

    #[test]
    fn utorid_length_is_checked() {
        let mut user = candidate();
        user.utorid = "abc".into();
        assert!(matches!(
            user.validate(),
            Err(LedgerError::Validation { field: "utorid", .. })
        ));

        user.utorid = "abcdefghi".into();
        assert!(user.validate().is_err());
    }

    #[test]
    fn utorid_must_be_alphanumeric() {
        let mut user = candidate();
        user.utorid = "john_do1".into();
        assert!(matches!(
            user.validate(),
            Err(LedgerError::Validation { field: "utorid", .. })
        ));
    }

    #[test]
    fn email_domain_is_enforced() {
        let mut user = candidate();
        user.email = "john@gmail.com".into();
        assert!(matches!(
            user.validate(),
            Err(LedgerError::Validation { field: "email", .. })
        ));

        user.email = "@mail.utoronto.ca".into();
        assert!(user.validate().is_err());
    }

    #[test]
    fn new_users_start_with_zero_points() {
        let user = candidate().with_role(Role::Cashier).into_user(UserId(3));
        assert_eq!(user.points, 0);
        assert_eq!(user.role, Role::Cashier);
        assert_eq!(user.display_name(), "johndoe1");
    }
}
