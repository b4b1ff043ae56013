// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::commands::accounts::load_accounts;
use crate::kis::token_needs_refresh;
use crate::utils::{db_timestamp, get_token_refresh_minutes, pretty_table};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

/// Problems worth fixing before the next fetch, as `(issue, detail)` pairs.
pub fn diagnose(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<(String, String)>> {
    let mut issues: Vec<(String, String)> = Vec::new();
    let threshold = get_token_refresh_minutes(conn)?;

    for account in load_accounts(conn, true)? {
        // 1) Tokens
        match (account.access_token.as_ref(), account.access_token_expires_at) {
            (None, _) => issues.push(("missing_token".into(), account.name.clone())),
            (Some(_), Some(exp)) if exp <= now => issues.push((
                "expired_token".into(),
                format!("{} ({})", account.name, db_timestamp(exp)),
            )),
            (Some(_), exp) if token_needs_refresh(exp, now, threshold) => issues.push((
                "token_expiring".into(),
                format!(
                    "{} ({})",
                    account.name,
                    exp.map(db_timestamp).unwrap_or_else(|| "unknown".into())
                ),
            )),
            _ => {}
        }

        // 2) Snapshot coverage
        let has_snapshot: Option<i32> = conn
            .query_row(
                "SELECT 1 FROM balance_snapshots WHERE account_id=?1 LIMIT 1",
                params![account.id],
                |r| r.get(0),
            )
            .optional()?;
        if has_snapshot.is_none() {
            issues.push(("no_snapshots".into(), account.name.clone()));
        }
    }
    Ok(issues)
}

pub fn handle(conn: &Connection) -> Result<()> {
    let rows: Vec<Vec<String>> = diagnose(conn, Utc::now())?
        .into_iter()
        .map(|(issue, detail)| vec![issue, detail])
        .collect();

    if rows.is_empty() {
        println!("doctor: no issues found");
    } else {
        println!("{}", pretty_table(&["Issue", "Detail"], rows));
    }
    Ok(())
}
