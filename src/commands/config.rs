// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::engine::SeriesBasis;
use crate::utils::{DEFAULT_TOKEN_REFRESH_MINUTES, get_setting, pretty_table, set_setting};
use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;

pub const KNOWN_KEYS: [&str; 2] = ["series_basis", "token_refresh_minutes"];

fn default_for(key: &str) -> Option<String> {
    match key {
        "series_basis" => Some(SeriesBasis::default().as_str().to_string()),
        "token_refresh_minutes" => Some(DEFAULT_TOKEN_REFRESH_MINUTES.to_string()),
        _ => None,
    }
}

pub fn validate_setting(key: &str, value: &str) -> Result<String> {
    let value = value.trim();
    match key {
        "series_basis" => Ok(value.parse::<SeriesBasis>()?.as_str().to_string()),
        "token_refresh_minutes" => {
            let minutes: i64 = value
                .parse()
                .with_context(|| format!("token_refresh_minutes must be a number, got '{}'", value))?;
            if !(0..=1440).contains(&minutes) {
                return Err(anyhow!("token_refresh_minutes must be within 0..=1440"));
            }
            Ok(minutes.to_string())
        }
        other => Err(anyhow!(
            "Unknown setting '{}', expected one of {}",
            other,
            KNOWN_KEYS.join(", ")
        )),
    }
}

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("get", sub)) => {
            let key = sub
                .get_one::<String>("key")
                .map(|s| s.trim())
                .ok_or_else(|| anyhow!("--key is required"))?;
            match get_setting(conn, key)?.or_else(|| default_for(key)) {
                Some(v) => println!("{}", v),
                None => return Err(anyhow!("Setting '{}' not set", key)),
            }
        }
        Some(("set", sub)) => {
            let key = sub
                .get_one::<String>("key")
                .map(|s| s.trim())
                .ok_or_else(|| anyhow!("--key is required"))?;
            let raw = sub
                .get_one::<String>("value")
                .ok_or_else(|| anyhow!("--value is required"))?;
            let value = validate_setting(key, raw)?;
            set_setting(conn, key, &value)?;
            println!("{} = {}", key, value);
        }
        Some(("list", _)) => {
            let mut rows = Vec::new();
            for key in KNOWN_KEYS {
                let stored = get_setting(conn, key)?;
                let source = if stored.is_some() { "set" } else { "default" };
                let value = stored.or_else(|| default_for(key)).unwrap_or_default();
                rows.push(vec![key.to_string(), value, source.to_string()]);
            }
            println!("{}", pretty_table(&["Key", "Value", "Source"], rows));
        }
        _ => {}
    }
    Ok(())
}
