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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use loyalty_ledger::{
    AdjustmentRequest, EventAwardRequest, EventId, Fixture, LedgerConfig, LedgerEngine,
    LedgerStore, MemoryStore, PromotionId, PurchaseRequest, Recorded, RedemptionRequest, Role,
    TransactionId, TransactionRequest, TransferRequest, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Loyalty Ledger - Replay ledger operations from a CSV file
///
/// Seeds users, events, and promotions from a TOML fixture, applies each CSV
/// row through the points engine, and writes final balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "loyalty-ledger")]
#[command(about = "Replays loyalty ledger operations and prints balances", long_about = None)]
struct Args {
    /// Path to CSV file with ledger operations
    ///
    /// Expected format: op,actor,user,amount,spent,related,event,promotions,remark
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// TOML fixture with users, events, and promotions
    #[arg(long, value_name = "FILE")]
    fixture: PathBuf,

    /// Optional engine configuration (point rate, retry budget)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => LedgerConfig::load(path),
        None => Ok(LedgerConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let store = match Fixture::load(&args.fixture).and_then(|fixture| fixture.seed()) {
        Ok(store) => store,
        Err(e) => {
            error!("Error loading fixture '{}': {}", args.fixture.display(), e);
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            error!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = LedgerEngine::with_config(store, config);
    match replay(&engine, BufReader::new(file)) {
        Ok(applied) => info!(applied, "replay finished"),
        Err(e) => {
            error!("Error replaying operations: {}", e);
            process::exit(1);
        }
    }

    if let Err(e) = write_balances(&engine, std::io::stdout()) {
        error!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Which columns are read depends on `op`:
///
/// | op | actor | user | amount | spent | related | event |
/// |----|-------|------|--------|-------|---------|-------|
/// | purchase | cashier | customer | | spent | | |
/// | redemption | | owner | points | | | |
/// | process | staff | | | | redemption id | |
/// | adjustment | manager | owner (check) | points | | corrected id | |
/// | transfer | sender | recipient | points | | | |
/// | event | creator | guest (or all) | points | | | event id |
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    actor: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    user: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<i64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    spent: Option<Decimal>,
    #[serde(deserialize_with = "csv::invalid_option")]
    related: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    event: Option<u32>,
    #[serde(default)]
    promotions: Option<String>,
    #[serde(default)]
    remark: Option<String>,
}

#[derive(Debug)]
enum Operation {
    Create(TransactionRequest),
    Process {
        transaction: TransactionId,
        staff: UserId,
    },
}

impl CsvRecord {
    /// Converts the row into an engine operation.
    ///
    /// Returns `None` for unknown ops or rows missing a required column.
    fn into_operation(self) -> Option<Operation> {
        let remark = self.remark.filter(|r| !r.is_empty());
        let request = match self.op.to_lowercase().as_str() {
            "purchase" => TransactionRequest::Purchase(PurchaseRequest {
                user: UserId(self.user?),
                cashier: UserId(self.actor?),
                spent: self.spent?,
                promotion_ids: parse_promotions(self.promotions.as_deref())?,
                remark,
            }),
            "redemption" => TransactionRequest::Redemption(RedemptionRequest {
                user: UserId(self.user?),
                amount: self.amount?,
                remark,
            }),
            "process" => {
                return Some(Operation::Process {
                    transaction: TransactionId(self.related?),
                    staff: UserId(self.actor?),
                });
            }
            "adjustment" => TransactionRequest::Adjustment(AdjustmentRequest {
                created_by: UserId(self.actor?),
                related_transaction: TransactionId(self.related?),
                user: self.user.map(UserId),
                amount: self.amount?,
                remark,
            }),
            "transfer" => TransactionRequest::Transfer(TransferRequest {
                sender: UserId(self.actor?),
                recipient: UserId(self.user?),
                amount: self.amount?,
                remark,
            }),
            "event" => TransactionRequest::Event(EventAwardRequest {
                event: EventId(self.event?),
                created_by: UserId(self.actor?),
                recipient: self.user.map(UserId),
                amount: self.amount?,
                remark,
            }),
            _ => return None,
        };
        Some(Operation::Create(request))
    }
}

/// Parses `1;2;3`. An empty column means no promotions.
fn parse_promotions(column: Option<&str>) -> Option<Vec<PromotionId>> {
    let Some(column) = column.map(str::trim).filter(|c| !c.is_empty()) else {
        return Some(Vec::new());
    };
    column
        .split(';')
        .map(|id| id.trim().parse().ok().map(PromotionId))
        .collect()
}

/// Replays operations from a CSV reader, returning how many were applied.
///
/// Rows are streamed. Malformed rows and operations the engine rejects are
/// logged and skipped; they never abort the replay.
///
/// # Example
///
/// ```csv
/// op,actor,user,amount,spent,related,event,promotions,remark
/// purchase,1,2,,50.00,,,,
/// redemption,,2,50,,,,,coffee
/// process,1,,,,2,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn replay<S, R>(engine: &LedgerEngine<S>, reader: R) -> Result<usize, csv::Error>
where
    S: LedgerStore + loyalty_ledger::PromotionRepository,
    R: Read,
{
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut applied = 0;
    for (row, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(row, "skipping malformed row: {}", e);
                continue;
            }
        };
        let Some(operation) = record.into_operation() else {
            warn!(row, "skipping row with unknown op or missing columns");
            continue;
        };

        let outcome = match operation {
            Operation::Create(request) => engine.create_transaction(request).map(|recorded| {
                if let Recorded::Batch(records) = &recorded {
                    debug!(row, awards = records.len(), "batch recorded");
                }
            }),
            Operation::Process { transaction, staff } => {
                engine.process_redemption(transaction, staff).map(|_| ())
            }
        };
        match outcome {
            Ok(()) => applied += 1,
            Err(e) => warn!(row, "operation rejected: {}", e),
        }
    }
    Ok(applied)
}

#[derive(Debug, Serialize)]
struct BalanceRow<'a> {
    id: UserId,
    utorid: &'a str,
    role: Role,
    points: i64,
}

/// Writes every user's balance as CSV, id ascending.
///
/// ```csv
/// id,utorid,role,points
/// 1,cashier1,cashier,0
/// 2,student1,regular,150
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_balances<W: Write>(
    engine: &LedgerEngine<MemoryStore>,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut users = engine.store().query_users(&|_| true);
    users.sort_by_key(|user| user.id);
    for user in &users {
        wtr.serialize(BalanceRow {
            id: user.id,
            utorid: &user.utorid,
            role: user.role,
            points: user.points,
        })?;
    }

    wtr.flush()?;
    Ok(())
}
