// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::commands::accounts::{load_account, load_accounts, store_token};
use crate::engine::{
    AccountFetch, FetchStatus, account_summary, summarize_account, summarize_holdings,
};
use crate::kis::{AccessToken, BalanceSource, FetchError, KisGateway, token_needs_refresh};
use crate::models::{BalanceSnapshot, BrokerAccount, Holding};
use crate::utils::{
    db_timestamp, fmt_rate, fmt_won, get_token_refresh_minutes, maybe_print_json,
    parse_db_decimal, parse_db_timestamp, pretty_table,
};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde_json::json;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("fetch", sub)) => fetch_cmd(conn, sub)?,
        Some(("show", sub)) => show_cmd(conn, sub)?,
        Some(("watch", sub)) => watch_cmd(conn, sub)?,
        _ => {}
    }
    Ok(())
}

pub fn save_snapshot(conn: &Connection, account_id: i64, snapshot: &BalanceSnapshot) -> Result<i64> {
    let holdings = serde_json::to_string(&snapshot.holdings)?;
    conn.execute(
        "INSERT INTO balance_snapshots(
             account_id, taken_at, total_evaluation, securities_evaluation, purchase_amount,
             profit_loss, cash_balance, cash_balance_d2, asset_change_amount,
             monthly_return_rate, daily_return_rate, holdings)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
        params![
            account_id,
            db_timestamp(snapshot.timestamp),
            snapshot.total_evaluation_amount.to_string(),
            snapshot.securities_evaluation_amount.to_string(),
            snapshot.total_purchase_amount.to_string(),
            snapshot.total_profit_loss.to_string(),
            snapshot.cash_balance.to_string(),
            snapshot.cash_balance_d2.to_string(),
            snapshot.asset_change_amount.to_string(),
            snapshot.monthly_return_rate.to_string(),
            snapshot.daily_return_rate.to_string(),
            holdings
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

const SNAPSHOT_COLUMNS: &str = "taken_at, total_evaluation, securities_evaluation, purchase_amount, \
     profit_loss, cash_balance, cash_balance_d2, asset_change_amount, monthly_return_rate, \
     daily_return_rate, holdings";

struct SnapshotRow([String; 11]);

impl SnapshotRow {
    fn read(r: &Row<'_>) -> rusqlite::Result<Self> {
        let mut cols: [String; 11] = Default::default();
        for (i, col) in cols.iter_mut().enumerate() {
            *col = r.get(i)?;
        }
        Ok(SnapshotRow(cols))
    }

    fn into_snapshot(self) -> Result<BalanceSnapshot> {
        let [
            taken_at,
            total,
            securities,
            purchase,
            profit,
            cash,
            cash_d2,
            change,
            monthly,
            daily,
            holdings,
        ] = self.0;
        let holdings: Vec<Holding> = serde_json::from_str(&holdings)
            .with_context(|| format!("Invalid stored holdings for snapshot at {}", taken_at))?;
        Ok(BalanceSnapshot {
            timestamp: parse_db_timestamp(&taken_at)?,
            total_evaluation_amount: parse_db_decimal(&total, "total evaluation")?,
            securities_evaluation_amount: parse_db_decimal(&securities, "securities evaluation")?,
            total_purchase_amount: parse_db_decimal(&purchase, "purchase amount")?,
            total_profit_loss: parse_db_decimal(&profit, "profit/loss")?,
            cash_balance: parse_db_decimal(&cash, "cash balance")?,
            cash_balance_d2: parse_db_decimal(&cash_d2, "D+2 cash balance")?,
            asset_change_amount: parse_db_decimal(&change, "asset change")?,
            monthly_return_rate: parse_db_decimal(&monthly, "monthly rate")?,
            daily_return_rate: parse_db_decimal(&daily, "daily rate")?,
            holdings,
        })
    }
}

pub fn latest_snapshot(conn: &Connection, account_id: i64) -> Result<Option<BalanceSnapshot>> {
    let sql = format!(
        "SELECT {} FROM balance_snapshots WHERE account_id=?1 ORDER BY taken_at DESC, id DESC LIMIT 1",
        SNAPSHOT_COLUMNS
    );
    let row = conn
        .query_row(&sql, params![account_id], SnapshotRow::read)
        .optional()?;
    row.map(SnapshotRow::into_snapshot).transpose()
}

pub fn load_history(
    conn: &Connection,
    account_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<BalanceSnapshot>> {
    let sql = format!(
        "SELECT {} FROM balance_snapshots
         WHERE account_id=?1 AND taken_at>=?2 AND taken_at<=?3
         ORDER BY taken_at, id",
        SNAPSHOT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![account_id, db_timestamp(start), db_timestamp(end)],
        SnapshotRow::read,
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_snapshot()?);
    }
    Ok(out)
}

struct LiveFetch {
    token: Option<AccessToken>,
    balance: Result<BalanceSnapshot, FetchError>,
}

pub fn refresh_token_if_needed<S: BalanceSource>(
    source: &S,
    account: &mut BrokerAccount,
    threshold_minutes: i64,
    now: DateTime<Utc>,
) -> Result<Option<AccessToken>, FetchError> {
    if account.access_token.is_some()
        && !token_needs_refresh(account.access_token_expires_at, now, threshold_minutes)
    {
        return Ok(None);
    }
    let token = source.issue_token(account)?;
    account.access_token = Some(token.token.clone());
    account.access_token_expires_at = Some(token.expires_at);
    Ok(Some(token))
}

fn fetch_live<S: BalanceSource>(
    source: &S,
    account: &BrokerAccount,
    threshold_minutes: i64,
    now: DateTime<Utc>,
) -> LiveFetch {
    let mut account = account.clone();
    let token = match refresh_token_if_needed(source, &mut account, threshold_minutes, now) {
        Ok(token) => token,
        Err(e) => {
            return LiveFetch {
                token: None,
                balance: Err(e),
            };
        }
    };
    let balance = source
        .inquire_balance(&account)
        .and_then(|resp| resp.into_snapshot(now));
    LiveFetch { token, balance }
}

// A failed account becomes `Failed` or `Degraded`, never an error.
pub fn fetch_all<S: BalanceSource>(
    conn: &Connection,
    source: &S,
    accounts: Vec<BrokerAccount>,
    now: DateTime<Utc>,
) -> Result<Vec<(BrokerAccount, AccountFetch)>> {
    let threshold = get_token_refresh_minutes(conn)?;

    let lives: Vec<thread::Result<LiveFetch>> = thread::scope(|scope| {
        let handles: Vec<_> = accounts
            .iter()
            .map(|account| scope.spawn(move || fetch_live(source, account, threshold, now)))
            .collect();
        handles.into_iter().map(|h| h.join()).collect()
    });

    let mut out = Vec::with_capacity(accounts.len());
    for (account, live) in accounts.into_iter().zip(lives) {
        let result = match live {
            Ok(live) => settle(conn, &account, live).unwrap_or_else(|e| {
                warn!(account = %account.name, error = %e, "could not store fetch result");
                AccountFetch::Failed {
                    reason: format!("storage error: {:#}", e),
                }
            }),
            Err(_) => {
                warn!(account = %account.name, "balance fetch thread panicked");
                AccountFetch::Failed {
                    reason: "balance fetch aborted".to_string(),
                }
            }
        };
        out.push((account, result));
    }
    Ok(out)
}

fn settle(conn: &Connection, account: &BrokerAccount, live: LiveFetch) -> Result<AccountFetch> {
    if let Some(token) = &live.token {
        store_token(conn, account.id, token)?;
        info!(account = %account.name, "stored refreshed token");
    }
    match live.balance {
        Ok(snapshot) => {
            save_snapshot(conn, account.id, &snapshot)?;
            info!(account = %account.name, "stored balance snapshot");
            Ok(AccountFetch::Fetched(snapshot))
        }
        Err(e) => fallback(conn, account, e),
    }
}

fn fallback(conn: &Connection, account: &BrokerAccount, err: FetchError) -> Result<AccountFetch> {
    warn!(account = %account.name, error = %err, "balance fetch failed");
    if err.is_credential_problem() {
        if let Some(snapshot) = latest_snapshot(conn, account.id)? {
            return Ok(AccountFetch::Degraded {
                reason: format!("stale data from {}: {}", db_timestamp(snapshot.timestamp), err),
                snapshot,
            });
        }
    }
    Ok(AccountFetch::Failed {
        reason: err.to_string(),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fresh: usize,
    pub degraded: usize,
    pub failed: usize,
}

impl CycleReport {
    pub fn tally(results: &[(BrokerAccount, AccountFetch)]) -> Self {
        let mut report = CycleReport::default();
        for (_, fetch) in results {
            match fetch.status() {
                FetchStatus::Fresh => report.fresh += 1,
                FetchStatus::Degraded => report.degraded += 1,
                FetchStatus::Failed => report.failed += 1,
            }
        }
        report
    }
}

// Runs `cycles` times, or forever when `None`.
pub fn watch<S, C>(
    conn: &Connection,
    source: &S,
    interval: Duration,
    cycles: Option<u64>,
    mut clock: C,
) -> Result<Vec<CycleReport>>
where
    S: BalanceSource,
    C: FnMut() -> DateTime<Utc>,
{
    let mut reports = Vec::new();
    let mut cycle = 0u64;
    loop {
        cycle += 1;
        let started = Instant::now();
        let accounts = load_accounts(conn, true)?;
        let results = fetch_all(conn, source, accounts, clock())?;
        let report = CycleReport::tally(&results);
        if report.failed > 0 {
            for (account, fetch) in &results {
                if let Some(reason) = fetch.reason() {
                    warn!(cycle, account = %account.name, reason, "account not refreshed");
                }
            }
        }
        info!(
            cycle,
            fresh = report.fresh,
            degraded = report.degraded,
            failed = report.failed,
            "balance cycle done"
        );
        reports.push(report);

        if cycles.is_some_and(|n| cycle >= n) {
            return Ok(reports);
        }
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
}

pub fn accounts_for_fetch(conn: &Connection, only: Option<&str>) -> Result<Vec<BrokerAccount>> {
    match only {
        Some(name) => Ok(vec![load_account(conn, name)?]),
        None => load_accounts(conn, true),
    }
}

fn fetch_cmd(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let only = sub.get_one::<String>("account").map(|s| s.trim());
    let accounts = accounts_for_fetch(conn, only)?;
    if accounts.is_empty() {
        println!("No active accounts to fetch");
        return Ok(());
    }
    let gateway = KisGateway::new()?;
    let results = fetch_all(conn, &gateway, accounts, Utc::now())?;

    let summaries: Vec<_> = results
        .iter()
        .map(|(account, fetch)| account_summary(account, fetch))
        .collect();
    if maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &summaries)? {
        return Ok(());
    }
    let rows = results
        .iter()
        .zip(&summaries)
        .map(|((_, fetch), s)| {
            vec![
                s.display_name.clone(),
                s.status.as_str().to_string(),
                fetch
                    .snapshot()
                    .map(|snap| fmt_won(&snap.total_evaluation_amount))
                    .unwrap_or_else(|| "-".to_string()),
                fmt_rate(&s.return_rate_percent),
                s.note.clone().unwrap_or_default(),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(&["Account", "Status", "Total", "Return", "Note"], rows)
    );
    Ok(())
}

fn watch_cmd(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let interval = sub.get_one::<u64>("interval").copied().unwrap_or(60);
    if interval == 0 {
        return Err(anyhow!("--interval must be at least 1 second"));
    }
    let cycles = sub.get_one::<u64>("cycles").copied();
    let gateway = KisGateway::new()?;
    let reports = watch(
        conn,
        &gateway,
        Duration::from_secs(interval),
        cycles,
        Utc::now,
    )?;
    let total = reports.iter().fold(CycleReport::default(), |acc, r| CycleReport {
        fresh: acc.fresh + r.fresh,
        degraded: acc.degraded + r.degraded,
        failed: acc.failed + r.failed,
    });
    println!(
        "{} cycles: {} fresh, {} degraded, {} failed",
        reports.len(),
        total.fresh,
        total.degraded,
        total.failed
    );
    Ok(())
}

fn show_cmd(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let name = sub
        .get_one::<String>("account")
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow!("--account is required"))?;
    let account = load_account(conn, &name)?;
    let snapshot = latest_snapshot(conn, account.id)?
        .with_context(|| format!("No stored balance for '{}'; run `balance fetch` first", name))?;
    let summary = summarize_account(&snapshot);
    let holdings = summarize_holdings(&snapshot.holdings);

    let payload = json!({
        "account": account.name,
        "timestamp": snapshot.timestamp,
        "summary": summary,
        "holdings": holdings,
    });
    if maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &payload)? {
        return Ok(());
    }

    println!("{} as of {}", account.name, db_timestamp(snapshot.timestamp));
    println!(
        "{}",
        pretty_table(
            &["Total", "Purchase", "P/L", "Return", "Cash", "Cash D+2"],
            vec![vec![
                fmt_won(&summary.total_evaluation_amount),
                fmt_won(&summary.total_purchase_amount),
                fmt_won(&summary.total_profit_loss),
                fmt_rate(&summary.return_rate_percent),
                fmt_won(&summary.cash_balance),
                fmt_won(&summary.cash_balance_d2),
            ]]
        )
    );
    let rows = holdings
        .into_iter()
        .map(|h| {
            vec![
                h.holding.product_name,
                h.holding.product_code,
                format!("{}", h.holding.quantity.normalize()),
                fmt_won(&h.holding.evaluation_amount),
                fmt_won(&h.holding.profit_loss_amount),
                fmt_rate(&h.return_rate_percent),
                h.trend.as_str().to_string(),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(
            &["Name", "Code", "Qty", "Value", "P/L", "Return", "Trend"],
            rows
        )
    );
    Ok(())
}
