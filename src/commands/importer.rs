// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::commands::balance::save_snapshot;
use crate::kis::KisBalanceResponse;
use crate::utils::{db_timestamp, id_for_account, parse_timestamp};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

pub fn handle(conn: &mut Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("snapshot", sub)) => {
            let account = sub
                .get_one::<String>("account")
                .map(|s| s.trim())
                .ok_or_else(|| anyhow!("--account is required"))?;
            let path = sub
                .get_one::<String>("path")
                .map(|s| s.trim())
                .ok_or_else(|| anyhow!("--path is required"))?;
            let at = match sub.get_one::<String>("at") {
                Some(s) => parse_timestamp(s)?,
                None => Utc::now(),
            };
            import_snapshot(conn, account, Path::new(path), at)?;
            println!(
                "Imported snapshot for '{}' at {}",
                account,
                db_timestamp(at)
            );
            Ok(())
        }
        _ => Ok(()),
    }
}

pub fn import_snapshot(
    conn: &mut Connection,
    account: &str,
    path: &Path,
    at: DateTime<Utc>,
) -> Result<i64> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Open snapshot {}", path.display()))?;
    let response: KisBalanceResponse = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid balance payload in {}", path.display()))?;
    let snapshot = response
        .into_snapshot(at)
        .with_context(|| format!("Unusable balance payload in {}", path.display()))?;

    let tx = conn.transaction()?;
    let account_id = id_for_account(&tx, account)?;
    let id = save_snapshot(&tx, account_id, &snapshot)?;
    tx.commit()?;
    info!(account = %account, holdings = snapshot.holdings.len(), "imported snapshot");
    Ok(id)
}
