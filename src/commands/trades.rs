// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::commands::accounts::{load_account, store_token};
use crate::commands::balance::refresh_token_if_needed;
use crate::kis::{KisGateway, TradeSource};
use crate::models::{Trade, TradeSide};
use crate::utils::{
    fmt_won, get_token_refresh_minutes, id_for_account, kst_today, maybe_print_json,
    parse_date, parse_db_decimal, pretty_table,
};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params, params_from_iter};
use tracing::info;

const DEFAULT_SYNC_DAYS: i64 = 7;

pub fn handle(conn: &mut Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("sync", sub)) => {
            let account = account_arg(sub)?;
            let now = Utc::now();
            let end = match sub.get_one::<String>("end") {
                Some(s) => parse_date(s)?,
                None => kst_today(now),
            };
            let start = match sub.get_one::<String>("start") {
                Some(s) => parse_date(s)?,
                None => end
                    .checked_sub_signed(Duration::days(DEFAULT_SYNC_DAYS))
                    .with_context(|| format!("No date {} days before {}", DEFAULT_SYNC_DAYS, end))?,
            };
            let gateway = KisGateway::new()?;
            let n = sync_trades(conn, &gateway, &account, start, end, now)?;
            println!(
                "Stored {} trades for '{}' ({} to {})",
                n, account, start, end
            );
        }
        Some(("list", sub)) => list_cmd(conn, sub)?,
        _ => {}
    }
    Ok(())
}

fn account_arg(sub: &clap::ArgMatches) -> Result<String> {
    sub.get_one::<String>("account")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("--account must not be empty"))
}

pub fn sync_trades<S: TradeSource>(
    conn: &mut Connection,
    source: &S,
    account: &str,
    start: NaiveDate,
    end: NaiveDate,
    now: DateTime<Utc>,
) -> Result<usize> {
    if start > end {
        return Err(anyhow!("Start date {} is after end date {}", start, end));
    }
    let mut account = load_account(conn, account)?;
    let threshold = get_token_refresh_minutes(conn)?;
    if let Some(token) = refresh_token_if_needed(source, &mut account, threshold, now)
        .with_context(|| format!("Token refresh for '{}' failed", account.name))?
    {
        store_token(conn, account.id, &token)?;
    }
    let trades = source
        .inquire_daily_trades(&account, start, end)
        .and_then(|resp| resp.into_trades())
        .with_context(|| format!("Trade inquiry for '{}' failed", account.name))?;

    let tx = conn.transaction()?;
    for t in &trades {
        tx.execute(
            "INSERT INTO daily_trades(
                 account_id, order_date, order_no, order_time, product_code, product_name, side,
                 order_price, order_quantity, filled_price, filled_quantity, filled_amount,
                 remaining_quantity, cancelled_quantity)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
             ON CONFLICT(account_id, order_date, order_no) DO UPDATE SET
                 order_time=excluded.order_time,
                 product_code=excluded.product_code,
                 product_name=excluded.product_name,
                 side=excluded.side,
                 order_price=excluded.order_price,
                 order_quantity=excluded.order_quantity,
                 filled_price=excluded.filled_price,
                 filled_quantity=excluded.filled_quantity,
                 filled_amount=excluded.filled_amount,
                 remaining_quantity=excluded.remaining_quantity,
                 cancelled_quantity=excluded.cancelled_quantity,
                 updated_at=datetime('now')",
            params![
                account.id,
                t.order_date,
                t.order_no,
                t.order_time,
                t.product_code,
                t.product_name,
                t.side.as_str(),
                t.order_price.to_string(),
                t.order_quantity.to_string(),
                t.filled_price.to_string(),
                t.filled_quantity.to_string(),
                t.filled_amount.to_string(),
                t.remaining_quantity.to_string(),
                t.cancelled_quantity.to_string(),
            ],
        )?;
    }
    tx.commit()?;
    info!(account = %account.name, trades = trades.len(), "stored daily trades");
    Ok(trades.len())
}

fn trade_from_row(r: &Row<'_>) -> rusqlite::Result<[String; 13]> {
    let mut cols: [String; 13] = Default::default();
    for (i, col) in cols.iter_mut().enumerate() {
        *col = r.get(i)?;
    }
    Ok(cols)
}

fn into_trade(cols: [String; 13]) -> Result<Trade> {
    let [
        order_date,
        order_no,
        order_time,
        product_code,
        product_name,
        side,
        order_price,
        order_quantity,
        filled_price,
        filled_quantity,
        filled_amount,
        remaining_quantity,
        cancelled_quantity,
    ] = cols;
    Ok(Trade {
        side: side.parse::<TradeSide>()?,
        order_price: parse_db_decimal(&order_price, "order price")?,
        order_quantity: parse_db_decimal(&order_quantity, "order quantity")?,
        filled_price: parse_db_decimal(&filled_price, "filled price")?,
        filled_quantity: parse_db_decimal(&filled_quantity, "filled quantity")?,
        filled_amount: parse_db_decimal(&filled_amount, "filled amount")?,
        remaining_quantity: parse_db_decimal(&remaining_quantity, "remaining quantity")?,
        cancelled_quantity: parse_db_decimal(&cancelled_quantity, "cancelled quantity")?,
        order_date,
        order_no,
        order_time,
        product_code,
        product_name,
    })
}

pub fn load_trades(
    conn: &Connection,
    account_id: i64,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    product_code: Option<&str>,
) -> Result<Vec<Trade>> {
    let mut sql = String::from(
        "SELECT order_date, order_no, order_time, product_code, product_name, side,
                order_price, order_quantity, filled_price, filled_quantity, filled_amount,
                remaining_quantity, cancelled_quantity
         FROM daily_trades WHERE account_id=?",
    );
    let mut values: Vec<Value> = vec![Value::Integer(account_id)];
    if let Some(d) = start {
        sql.push_str(" AND order_date>=?");
        values.push(Value::Text(d.format("%Y%m%d").to_string()));
    }
    if let Some(d) = end {
        sql.push_str(" AND order_date<=?");
        values.push(Value::Text(d.format("%Y%m%d").to_string()));
    }
    if let Some(code) = product_code {
        sql.push_str(" AND product_code=?");
        values.push(Value::Text(code.to_string()));
    }
    sql.push_str(" ORDER BY order_date DESC, order_time DESC, order_no DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), trade_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(into_trade(row?)?);
    }
    Ok(out)
}

fn list_cmd(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let account = account_arg(sub)?;
    let account_id = id_for_account(conn, &account)?;
    let start = sub.get_one::<String>("start").map(|s| parse_date(s)).transpose()?;
    let end = sub.get_one::<String>("end").map(|s| parse_date(s)).transpose()?;
    let code = sub.get_one::<String>("code").map(|s| s.trim());
    let trades = load_trades(conn, account_id, start, end, code)?;

    if maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &trades)? {
        return Ok(());
    }
    let rows = trades
        .into_iter()
        .map(|t| {
            vec![
                t.order_date,
                t.order_time,
                t.order_no,
                t.product_name,
                t.side.as_str().to_string(),
                format!("{}", t.order_quantity.normalize()),
                format!("{}", t.filled_quantity.normalize()),
                fmt_won(&t.filled_price),
                fmt_won(&t.filled_amount),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(
            &["Date", "Time", "Order", "Name", "Side", "Qty", "Filled", "Avg Price", "Amount"],
            rows
        )
    );
    Ok(())
}
