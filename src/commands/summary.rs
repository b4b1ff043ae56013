// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::commands::accounts::load_accounts;
use crate::commands::balance::{fetch_all, latest_snapshot};
use crate::engine::{
    AccountFetch, AccountSummary, PortfolioTotals, account_summary, aggregate_portfolio,
};
use crate::kis::KisGateway;
use crate::models::BrokerAccount;
use crate::utils::{fmt_rate, fmt_won, maybe_print_json, pretty_table};
use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct PortfolioReport {
    pub totals: PortfolioTotals,
    pub accounts: Vec<AccountSummary>,
}

pub fn collect_stored(conn: &Connection) -> Result<Vec<(BrokerAccount, AccountFetch)>> {
    let mut out = Vec::new();
    for account in load_accounts(conn, true)? {
        let fetch = match latest_snapshot(conn, account.id) {
            Ok(Some(snapshot)) => AccountFetch::Fetched(snapshot),
            Ok(None) => AccountFetch::Failed {
                reason: "no stored balance".to_string(),
            },
            Err(e) => {
                warn!(account = %account.name, error = %e, "unreadable stored balance");
                AccountFetch::Failed {
                    reason: format!("unreadable stored balance: {:#}", e),
                }
            }
        };
        out.push((account, fetch));
    }
    Ok(out)
}

pub fn build_report(results: &[(BrokerAccount, AccountFetch)]) -> PortfolioReport {
    let fetches: Vec<AccountFetch> = results.iter().map(|(_, f)| f.clone()).collect();
    PortfolioReport {
        totals: aggregate_portfolio(&fetches),
        accounts: results
            .iter()
            .map(|(account, fetch)| account_summary(account, fetch))
            .collect(),
    }
}

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    let results = if m.get_flag("live") {
        let gateway = KisGateway::new()?;
        fetch_all(conn, &gateway, load_accounts(conn, true)?, Utc::now())?
    } else {
        collect_stored(conn)?
    };
    let report = build_report(&results);

    if m.get_flag("jsonl") {
        maybe_print_json(false, true, &report.accounts)?;
        return Ok(());
    }
    if maybe_print_json(m.get_flag("json"), false, &report)? {
        return Ok(());
    }

    let t = &report.totals;
    println!(
        "{}",
        pretty_table(
            &["Total Assets", "Avg Monthly", "Avg Daily", "Valid", "Degraded", "Failed"],
            vec![vec![
                fmt_won(&t.total_assets),
                fmt_rate(&t.average_monthly_return_percent),
                fmt_rate(&t.average_daily_return_percent),
                t.valid_accounts.to_string(),
                t.degraded_accounts.to_string(),
                t.failed_accounts.to_string(),
            ]]
        )
    );
    let rows = report
        .accounts
        .iter()
        .map(|s| {
            vec![
                s.display_name.clone(),
                s.account_type.to_string(),
                fmt_rate(&s.return_rate_percent),
                s.status.as_str().to_string(),
                s.note.clone().unwrap_or_default(),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(&["Account", "Type", "Return", "Status", "Note"], rows)
    );
    Ok(())
}
