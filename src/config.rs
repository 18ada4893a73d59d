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

//! Engine configuration.
//!
//! ```toml
//! point_rate = "0.25"     # currency units per point
//! max_retries = 8         # optimistic commit attempts per operation
//! default_page_size = 10
//! max_page_size = 100
//! ```

use crate::error::ConfigError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Money spent per base point.
    pub point_rate: Decimal,
    /// Commit attempts before `ConcurrencyConflict` reaches the caller.
    pub max_retries: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            point_rate: dec!(0.25),
            max_retries: 8,
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!("loading ledger configuration from {:?}", path);
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.point_rate <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                field: "point_rate",
                message: "must be positive".into(),
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "max_retries",
                message: "must be at least 1".into(),
            });
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::Invalid {
                field: "default_page_size",
                message: format!("must be between 1 and {}", self.max_page_size),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = LedgerConfig::from_toml_str("").unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.point_rate, dec!(0.25));
    }

    #[test]
    fn fields_override_defaults() {
        let config = LedgerConfig::from_toml_str(
            r#"
            point_rate = "0.5"
            max_retries = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.point_rate, dec!(0.5));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_page_size, 100);
    }

    #[test]
    fn zero_rate_is_rejected() {
        let result = LedgerConfig::from_toml_str(r#"point_rate = "0""#);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "point_rate",
                ..
            })
        ));
    }

    #[test]
    fn oversized_default_page_is_rejected() {
        let result = LedgerConfig::from_toml_str("default_page_size = 500");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "default_page_size",
                ..
            })
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            LedgerConfig::from_toml_str("pointrate = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let result = LedgerConfig::load("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
