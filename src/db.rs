// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;

static APP: Lazy<(&str, &str, &str)> =
    Lazy::new(|| ("com.alphavelocity", "Folioboard", "folioboard"));

/// `FOLIOBOARD_DB` wins over the platform data dir.
pub fn db_path() -> Result<PathBuf> {
    if let Some(p) = std::env::var_os("FOLIOBOARD_DB").filter(|p| !p.is_empty()) {
        let path = PathBuf::from(p);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        return Ok(path);
    }
    let proj = ProjectDirs::from(APP.0, APP.1, APP.2)
        .context("Could not determine platform-specific data dir")?;
    let data_dir = proj.data_dir();
    fs::create_dir_all(data_dir).context("Failed to create data dir")?;
    Ok(data_dir.join("folioboard.sqlite"))
}

pub fn open_or_init() -> Result<Connection> {
    let path = db_path()?;
    let mut conn =
        Connection::open(&path).with_context(|| format!("Open DB at {}", path.display()))?;
    init_schema(&mut conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS settings(
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS accounts(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        cano TEXT NOT NULL,
        product_code TEXT NOT NULL DEFAULT '01',
        account_type TEXT NOT NULL CHECK(account_type IN ('paper','live')),
        hts_id TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        app_key TEXT NOT NULL,
        app_secret TEXT NOT NULL,
        access_token TEXT,
        access_token_expires_at TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(cano, product_code)
    );

    -- one row per account per fetch; amounts stored as decimal TEXT
    CREATE TABLE IF NOT EXISTS balance_snapshots(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id INTEGER NOT NULL,
        taken_at TEXT NOT NULL,
        total_evaluation TEXT NOT NULL,
        securities_evaluation TEXT NOT NULL,
        purchase_amount TEXT NOT NULL,
        profit_loss TEXT NOT NULL,
        cash_balance TEXT NOT NULL,
        cash_balance_d2 TEXT NOT NULL,
        asset_change_amount TEXT NOT NULL DEFAULT '0',
        monthly_return_rate TEXT NOT NULL DEFAULT '0',
        daily_return_rate TEXT NOT NULL DEFAULT '0',
        holdings TEXT NOT NULL DEFAULT '[]',
        FOREIGN KEY(account_id) REFERENCES accounts(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_snapshots_account_time
        ON balance_snapshots(account_id, taken_at);

    CREATE TABLE IF NOT EXISTS daily_trades(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id INTEGER NOT NULL,
        order_date TEXT NOT NULL,
        order_no TEXT NOT NULL,
        order_time TEXT NOT NULL,
        product_code TEXT NOT NULL,
        product_name TEXT NOT NULL,
        side TEXT NOT NULL CHECK(side IN ('buy','sell','other')),
        order_price TEXT NOT NULL,
        order_quantity TEXT NOT NULL,
        filled_price TEXT NOT NULL,
        filled_quantity TEXT NOT NULL,
        filled_amount TEXT NOT NULL,
        remaining_quantity TEXT NOT NULL,
        cancelled_quantity TEXT NOT NULL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(account_id, order_date, order_no),
        FOREIGN KEY(account_id) REFERENCES accounts(id) ON DELETE CASCADE
    );
    "#,
    )?;
    Ok(())
}
