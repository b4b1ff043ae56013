// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::commands::series::{SeriesQuery, series_points};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;
use std::path::Path;

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("series", sub)) => {
            let fmt = sub
                .get_one::<String>("format")
                .map(|s| s.to_lowercase())
                .ok_or_else(|| anyhow!("--format is required"))?;
            let out = sub
                .get_one::<String>("out")
                .ok_or_else(|| anyhow!("--out is required"))?;
            let query = SeriesQuery::from_matches(sub)?;
            let n = export_series(conn, &query, &fmt, Path::new(out), Utc::now())?;
            println!("Exported {} points to {}", n, out);
            Ok(())
        }
        _ => Ok(()),
    }
}

pub fn export_series(
    conn: &Connection,
    query: &SeriesQuery,
    fmt: &str,
    out: &Path,
    now: DateTime<Utc>,
) -> Result<usize> {
    let points = series_points(conn, query, now)?;
    match fmt {
        "csv" => {
            let mut wtr = csv::Writer::from_path(out)?;
            wtr.write_record(["timestamp", "label", "return_rate_percent"])?;
            for p in &points {
                wtr.write_record([
                    p.timestamp.to_rfc3339(),
                    p.label.clone(),
                    p.return_rate_percent.to_string(),
                ])?;
            }
            wtr.flush()?;
        }
        "json" => {
            let items: Vec<_> = points
                .iter()
                .map(|p| {
                    json!({
                        "timestamp": p.timestamp,
                        "label": p.label,
                        "return_rate_percent": p.return_rate_percent.to_string(),
                    })
                })
                .collect();
            std::fs::write(out, serde_json::to_string_pretty(&items)?)?;
        }
        other => return Err(anyhow!("Unknown format: {} (use csv|json)", other)),
    }
    Ok(points.len())
}
