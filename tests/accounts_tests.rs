// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::{Duration, Utc};
use folioboard::{
    cli,
    commands::accounts::{self, load_account, load_accounts, store_token},
    db,
    kis::AccessToken,
    models::AccountType,
};
use rusqlite::Connection;

fn base_conn() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    db::init_schema(&mut conn).unwrap();
    conn
}

fn run(conn: &Connection, args: &[&str]) -> anyhow::Result<()> {
    let mut argv = vec!["folioboard", "account"];
    argv.extend_from_slice(args);
    let matches = cli::build_cli().try_get_matches_from(argv).unwrap();
    let (_, sub) = matches.subcommand().unwrap();
    accounts::handle(conn, sub)
}

fn add(conn: &Connection, name: &str, cano: &str) {
    run(
        conn,
        &[
            "add", "--name", name, "--cano", cano, "--type", "paper", "--app-key", "key",
            "--app-secret", "secret",
        ],
    )
    .unwrap();
}

#[test]
fn add_and_load_round_trip() {
    let conn = base_conn();
    add(&conn, "Main", "50123456");
    let a = load_account(&conn, "Main").unwrap();
    assert_eq!(a.cano, "50123456");
    assert_eq!(a.product_code, "01");
    assert_eq!(a.account_type, AccountType::Paper);
    assert!(a.is_active);
    assert!(a.access_token.is_none());
}

#[test]
fn add_rejects_bad_account_number() {
    let conn = base_conn();
    let err = run(
        &conn,
        &[
            "add", "--name", "Bad", "--cano", "1234", "--type", "live", "--app-key", "k",
            "--app-secret", "s",
        ],
    )
    .unwrap_err();
    assert!(err.to_string().contains("8 digits"));
    assert!(load_accounts(&conn, false).unwrap().is_empty());
}

#[test]
fn duplicate_account_number_is_rejected() {
    let conn = base_conn();
    add(&conn, "Main", "50123456");
    let err = run(
        &conn,
        &[
            "add", "--name", "Other", "--cano", "50123456", "--type", "paper", "--app-key", "k",
            "--app-secret", "s",
        ],
    );
    assert!(err.is_err());
}

#[test]
fn deactivated_accounts_are_not_loaded_as_active() {
    let conn = base_conn();
    add(&conn, "A", "50000001");
    add(&conn, "B", "50000002");
    run(&conn, &["deactivate", "--name", "B"]).unwrap();

    let active: Vec<_> = load_accounts(&conn, true)
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(active, vec!["A".to_string()]);
    assert_eq!(load_accounts(&conn, false).unwrap().len(), 2);

    run(&conn, &["activate", "--name", "B"]).unwrap();
    assert_eq!(load_accounts(&conn, true).unwrap().len(), 2);
}

#[test]
fn editing_credentials_clears_token() {
    let conn = base_conn();
    add(&conn, "Main", "50123456");
    let id = load_account(&conn, "Main").unwrap().id;
    let expires = Utc::now() + Duration::hours(20);
    store_token(
        &conn,
        id,
        &AccessToken {
            token: "tok".into(),
            expires_at: expires,
        },
    )
    .unwrap();
    let a = load_account(&conn, "Main").unwrap();
    assert_eq!(a.access_token.as_deref(), Some("tok"));
    assert_eq!(
        a.access_token_expires_at.map(|t| t.timestamp()),
        Some(expires.timestamp())
    );

    // renaming keeps the token
    run(&conn, &["edit", "--name", "Main", "--rename", "Primary"]).unwrap();
    assert!(load_account(&conn, "Primary").unwrap().access_token.is_some());

    run(&conn, &["edit", "--name", "Primary", "--app-key", "new-key"]).unwrap();
    let a = load_account(&conn, "Primary").unwrap();
    assert_eq!(a.app_key, "new-key");
    assert!(a.access_token.is_none());
    assert!(a.access_token_expires_at.is_none());
}

#[test]
fn removing_unknown_account_fails() {
    let conn = base_conn();
    assert!(run(&conn, &["rm", "--name", "Ghost"]).is_err());
    add(&conn, "Main", "50123456");
    run(&conn, &["rm", "--name", "Main"]).unwrap();
    assert!(load_account(&conn, "Main").is_err());
}

#[test]
fn serialized_accounts_hide_secrets() {
    let conn = base_conn();
    add(&conn, "Main", "50123456");
    let json = serde_json::to_string(&load_accounts(&conn, false).unwrap()).unwrap();
    assert!(json.contains("50123456"));
    assert!(!json.contains("secret"));
    assert!(!json.contains("app_key"));
}
