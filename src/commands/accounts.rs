// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::kis::{AccessToken, KisClient};
use crate::models::{AccountType, BrokerAccount};
use crate::utils::{db_timestamp, id_for_account, maybe_print_json, pretty_table};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params, params_from_iter};
use tracing::info;

const ACCOUNT_COLUMNS: &str = "id, name, cano, product_code, account_type, hts_id, is_active, \
     app_key, app_secret, access_token, access_token_expires_at, created_at";

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sub)) => add(conn, sub)?,
        Some(("list", sub)) => list(conn, sub)?,
        Some(("edit", sub)) => edit(conn, sub)?,
        Some(("rm", sub)) => {
            let name = trimmed(sub, "name")?;
            let removed = conn.execute("DELETE FROM accounts WHERE name=?1", params![name])?;
            if removed == 0 {
                return Err(anyhow!("Account '{}' not found", name));
            }
            println!("Removed account '{}'", name);
        }
        Some(("activate", sub)) => set_active(conn, &trimmed(sub, "name")?, true)?,
        Some(("deactivate", sub)) => set_active(conn, &trimmed(sub, "name")?, false)?,
        Some(("token", sub)) => {
            let account = load_account(conn, &trimmed(sub, "name")?)?;
            let client = KisClient::new(account.account_type)?;
            let token = client
                .issue_token(&account.app_key, &account.app_secret)
                .with_context(|| format!("Token request for '{}' failed", account.name))?;
            store_token(conn, account.id, &token)?;
            println!(
                "Issued token for '{}' (expires {})",
                account.name,
                db_timestamp(token.expires_at)
            );
        }
        _ => {}
    }
    Ok(())
}

fn trimmed(sub: &clap::ArgMatches, id: &str) -> Result<String> {
    sub.get_one::<String>(id)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("--{} must not be empty", id))
}

fn optional(sub: &clap::ArgMatches, id: &str) -> Option<String> {
    sub.get_one::<String>(id)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn validate_cano(cano: &str) -> Result<()> {
    if cano.len() != 8 || !cano.chars().all(|c| c.is_ascii_digit()) {
        return Err(anyhow!("Invalid account number '{}', expected 8 digits", cano));
    }
    Ok(())
}

fn validate_product_code(code: &str) -> Result<()> {
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(anyhow!("Invalid product code '{}', expected 2 digits", code));
    }
    Ok(())
}

fn add(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let name = trimmed(sub, "name")?;
    let cano = trimmed(sub, "cano")?;
    let product_code = trimmed(sub, "product-code")?;
    let account_type: AccountType = trimmed(sub, "type")?.parse()?;
    let app_key = trimmed(sub, "app-key")?;
    let app_secret = trimmed(sub, "app-secret")?;
    let hts_id = optional(sub, "hts-id");
    let active = !sub.get_flag("inactive");

    validate_cano(&cano)?;
    validate_product_code(&product_code)?;

    conn.execute(
        "INSERT INTO accounts(name, cano, product_code, account_type, hts_id, is_active, app_key, app_secret)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        params![
            name,
            cano,
            product_code,
            account_type.as_str(),
            hts_id,
            active,
            app_key,
            app_secret
        ],
    )
    .with_context(|| format!("Could not add account '{}'", name))?;
    info!(account = %name, "account added");
    println!(
        "Added account '{}' ({}-{}, {})",
        name, cano, product_code, account_type
    );
    Ok(())
}

fn edit(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let name = trimmed(sub, "name")?;
    let id = id_for_account(conn, &name)?;

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<String> = Vec::new();
    let mut credentials_changed = false;

    if let Some(v) = optional(sub, "rename") {
        sets.push("name=?");
        values.push(v);
    }
    if let Some(v) = optional(sub, "cano") {
        validate_cano(&v)?;
        sets.push("cano=?");
        values.push(v);
    }
    if let Some(v) = optional(sub, "product-code") {
        validate_product_code(&v)?;
        sets.push("product_code=?");
        values.push(v);
    }
    if let Some(v) = optional(sub, "type") {
        let t: AccountType = v.parse()?;
        sets.push("account_type=?");
        values.push(t.as_str().to_string());
        credentials_changed = true;
    }
    if let Some(v) = optional(sub, "app-key") {
        sets.push("app_key=?");
        values.push(v);
        credentials_changed = true;
    }
    if let Some(v) = optional(sub, "app-secret") {
        sets.push("app_secret=?");
        values.push(v);
        credentials_changed = true;
    }
    if let Some(v) = optional(sub, "hts-id") {
        sets.push("hts_id=?");
        values.push(v);
    }

    if sets.is_empty() {
        println!("Nothing to change for '{}'", name);
        return Ok(());
    }
    if credentials_changed {
        // token belongs to the old credentials
        sets.push("access_token=NULL");
        sets.push("access_token_expires_at=NULL");
    }
    sets.push("updated_at=datetime('now')");

    let sql = format!(
        "UPDATE accounts SET {} WHERE id={}",
        sets.join(", "),
        id
    );
    conn.execute(&sql, params_from_iter(values.iter()))
        .with_context(|| format!("Could not update account '{}'", name))?;
    println!("Updated account '{}'", name);
    Ok(())
}

fn set_active(conn: &Connection, name: &str, active: bool) -> Result<()> {
    let n = conn.execute(
        "UPDATE accounts SET is_active=?1, updated_at=datetime('now') WHERE name=?2",
        params![active, name],
    )?;
    if n == 0 {
        return Err(anyhow!("Account '{}' not found", name));
    }
    println!(
        "{} account '{}'",
        if active { "Activated" } else { "Deactivated" },
        name
    );
    Ok(())
}

fn list(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let accounts = load_accounts(conn, false)?;
    if maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &accounts)? {
        return Ok(());
    }
    let rows = accounts
        .into_iter()
        .map(|a| {
            vec![
                a.name,
                format!("{}-{}", a.cano, a.product_code),
                a.account_type.to_string(),
                if a.is_active { "yes" } else { "no" }.to_string(),
                a.access_token_expires_at
                    .map(db_timestamp)
                    .unwrap_or_else(|| "-".to_string()),
                a.created_at,
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(
            &["Name", "Account", "Type", "Active", "Token Expires", "Created"],
            rows
        )
    );
    Ok(())
}

fn account_from_row(r: &Row<'_>) -> rusqlite::Result<BrokerAccount> {
    let account_type: String = r.get(4)?;
    let account_type = account_type.parse::<AccountType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(BrokerAccount {
        id: r.get(0)?,
        name: r.get(1)?,
        cano: r.get(2)?,
        product_code: r.get(3)?,
        account_type,
        hts_id: r.get(5)?,
        is_active: r.get(6)?,
        app_key: r.get(7)?,
        app_secret: r.get(8)?,
        access_token: r.get(9)?,
        access_token_expires_at: r.get::<_, Option<DateTime<Utc>>>(10)?,
        created_at: r.get(11)?,
    })
}

pub fn load_account(conn: &Connection, name: &str) -> Result<BrokerAccount> {
    let sql = format!("SELECT {} FROM accounts WHERE name=?1", ACCOUNT_COLUMNS);
    conn.query_row(&sql, params![name], account_from_row)
        .with_context(|| format!("Account '{}' not found", name))
}

pub fn load_accounts(conn: &Connection, active_only: bool) -> Result<Vec<BrokerAccount>> {
    let sql = format!(
        "SELECT {} FROM accounts {} ORDER BY name",
        ACCOUNT_COLUMNS,
        if active_only { "WHERE is_active=1" } else { "" }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], account_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn store_token(conn: &Connection, account_id: i64, token: &AccessToken) -> Result<()> {
    conn.execute(
        "UPDATE accounts SET access_token=?1, access_token_expires_at=?2, updated_at=datetime('now')
         WHERE id=?3",
        params![token.token, db_timestamp(token.expires_at), account_id],
    )?;
    Ok(())
}
