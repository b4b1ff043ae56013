// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::commands::balance::load_history;
use crate::engine::{ReturnSeriesPoint, SeriesBasis, build_return_series};
use crate::utils::{fmt_rate, get_series_basis, id_for_account, maybe_print_json, parse_timestamp, pretty_table};
use crate::window::{Period, TimeWindow, label_for, window_for};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SeriesQuery {
    pub account: String,
    pub period: Period,
    pub basis: Option<SeriesBasis>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl SeriesQuery {
    pub fn from_matches(sub: &clap::ArgMatches) -> Result<Self> {
        let account = sub
            .get_one::<String>("account")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("--account must not be empty"))?;
        let period = match sub.get_one::<String>("period") {
            Some(p) => p.parse::<Period>()?,
            None => Period::Intraday,
        };
        let basis = sub
            .get_one::<String>("basis")
            .map(|b| b.parse::<SeriesBasis>())
            .transpose()?;
        let start = sub
            .get_one::<String>("start")
            .map(|s| parse_timestamp(s))
            .transpose()?;
        let end = sub
            .get_one::<String>("end")
            .map(|s| parse_timestamp(s))
            .transpose()?;
        Ok(SeriesQuery {
            account,
            period,
            basis,
            start,
            end,
        })
    }

    pub fn window(&self, now: DateTime<Utc>) -> Result<TimeWindow> {
        let default = window_for(self.period, now)?;
        let window = TimeWindow {
            start: self.start.unwrap_or(default.start),
            end: self.end.unwrap_or(default.end),
        };
        if window.start > window.end {
            return Err(anyhow!(
                "Window start {} is after end {}",
                window.start,
                window.end
            ));
        }
        Ok(window)
    }
}

pub fn series_points(
    conn: &Connection,
    query: &SeriesQuery,
    now: DateTime<Utc>,
) -> Result<Vec<ReturnSeriesPoint>> {
    let account_id = id_for_account(conn, &query.account)?;
    let basis = match query.basis {
        Some(b) => b,
        None => get_series_basis(conn)?,
    };
    let window = query.window(now)?;
    let history = load_history(conn, account_id, window.start, window.end)?;
    debug!(
        account = %query.account,
        period = query.period.as_str(),
        basis = basis.as_str(),
        snapshots = history.len(),
        "building return series"
    );
    let period = query.period;
    Ok(build_return_series(&history, basis, |ts| label_for(period, ts)))
}

pub fn handle(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let query = SeriesQuery::from_matches(sub)?;
    let points = series_points(conn, &query, Utc::now())?;
    if maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &points)? {
        return Ok(());
    }
    if points.is_empty() {
        println!(
            "No snapshots for '{}' in the {} window",
            query.account,
            query.period.as_str()
        );
        return Ok(());
    }
    let rows = points
        .into_iter()
        .map(|p| vec![p.label, fmt_rate(&p.return_rate_percent)])
        .collect();
    println!("{}", pretty_table(&["Time", "Return"], rows));
    Ok(())
}
