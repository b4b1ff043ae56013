// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::{DateTime, Duration, TimeZone, Utc};
use folioboard::{
    commands::{
        accounts::{load_account, load_accounts},
        balance::{CycleReport, fetch_all, latest_snapshot, load_history, save_snapshot, watch},
        summary::{build_report, collect_stored},
    },
    db,
    engine::{AccountFetch, FetchStatus},
    kis::{AccessToken, BalanceSource, FetchError, KisBalanceResponse},
    models::{BalanceSnapshot, BrokerAccount, Holding},
};
use rusqlite::{Connection, params};
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

fn base_conn() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    db::init_schema(&mut conn).unwrap();
    conn
}

fn add_account(conn: &Connection, name: &str, cano: &str) -> i64 {
    conn.execute(
        "INSERT INTO accounts(name, cano, account_type, app_key, app_secret) VALUES (?1,?2,'paper','k','s')",
        params![name, cano],
    )
    .unwrap();
    conn.last_insert_rowid()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 4, 2, 0, 0).unwrap()
}

#[derive(Clone, Copy)]
enum Outcome {
    Ok(i64),
    TokenRejected,
    ServerError,
}

struct FakeSource {
    outcomes: HashMap<String, Outcome>,
    calls: Mutex<Vec<String>>,
}

impl FakeSource {
    fn new(outcomes: &[(&str, Outcome)]) -> Self {
        FakeSource {
            outcomes: outcomes
                .iter()
                .map(|(name, o)| (name.to_string(), *o))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn outcome(&self, account: &BrokerAccount) -> Outcome {
        self.outcomes[&account.name]
    }
}

impl BalanceSource for FakeSource {
    fn issue_token(&self, account: &BrokerAccount) -> Result<AccessToken, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("token:{}", account.name));
        match self.outcome(account) {
            Outcome::TokenRejected => Err(FetchError::Unauthorized("bad app secret".into())),
            _ => Ok(AccessToken {
                token: format!("tok-{}", account.name),
                expires_at: now() + Duration::hours(24),
            }),
        }
    }

    fn inquire_balance(&self, account: &BrokerAccount) -> Result<KisBalanceResponse, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("balance:{}", account.name));
        assert_eq!(
            account.access_token.as_deref(),
            Some(format!("tok-{}", account.name).as_str())
        );
        match self.outcome(account) {
            Outcome::Ok(total) => Ok(serde_json::from_value(json!({
                "rt_cd": "0",
                "output1": [{
                    "prdt_name": "Samsung Electronics",
                    "pdno": "005930",
                    "hldg_qty": "10",
                    "evlu_amt": "700000",
                    "evlu_pfls_amt": "20000",
                    "evlu_pfls_rt": "2.94"
                }],
                "output2": [{
                    "tot_evlu_amt": total.to_string(),
                    "evlu_amt_smtl_amt": "700000",
                    "pchs_amt_smtl_amt": "680000",
                    "evlu_pfls_smtl_amt": "20000",
                    "asst_icdc_erng_rt": "2",
                    "asst_icdc_erng_rt_1": "1"
                }]
            }))?),
            Outcome::ServerError => Err(FetchError::Status {
                status: 500,
                body: "internal error".into(),
            }),
            Outcome::TokenRejected => Err(FetchError::MissingToken(account.name.clone())),
        }
    }
}

fn stored_snapshot(ts: DateTime<Utc>, total: i64) -> BalanceSnapshot {
    let mut s = BalanceSnapshot::empty(ts);
    s.total_evaluation_amount = total.into();
    s.total_purchase_amount = dec!(1000000);
    s.total_profit_loss = dec!(50000);
    s.monthly_return_rate = dec!(4);
    s.daily_return_rate = dec!(3);
    s
}

#[test]
fn snapshots_persist_with_holdings() {
    let conn = base_conn();
    let id = add_account(&conn, "Main", "50000001");
    let mut snap = stored_snapshot(now(), 1_050_000);
    snap.holdings.push(Holding {
        product_name: "Kakao".into(),
        product_code: "035720".into(),
        quantity: dec!(3),
        evaluation_amount: dec!(150000.50),
        profit_loss_amount: dec!(-4000),
        profit_loss_rate: None,
    });
    save_snapshot(&conn, id, &snap).unwrap();

    let back = latest_snapshot(&conn, id).unwrap().unwrap();
    assert_eq!(back, snap);
}

#[test]
fn latest_snapshot_is_newest_by_time() {
    let conn = base_conn();
    let id = add_account(&conn, "Main", "50000001");
    save_snapshot(&conn, id, &stored_snapshot(now(), 2)).unwrap();
    save_snapshot(&conn, id, &stored_snapshot(now() - Duration::hours(1), 1)).unwrap();
    let latest = latest_snapshot(&conn, id).unwrap().unwrap();
    assert_eq!(latest.total_evaluation_amount, dec!(2));
    assert!(latest_snapshot(&conn, id + 1).unwrap().is_none());
}

#[test]
fn history_is_inclusive_and_ascending() {
    let conn = base_conn();
    let id = add_account(&conn, "Main", "50000001");
    let other = add_account(&conn, "Other", "50000002");
    for h in [3, 0, 1, 2, 4] {
        save_snapshot(&conn, id, &stored_snapshot(now() + Duration::hours(h), h)).unwrap();
    }
    save_snapshot(&conn, other, &stored_snapshot(now() + Duration::hours(2), 99)).unwrap();

    let history = load_history(
        &conn,
        id,
        now() + Duration::hours(1),
        now() + Duration::hours(3),
    )
    .unwrap();
    let totals: Vec<_> = history.iter().map(|s| s.total_evaluation_amount).collect();
    assert_eq!(totals, vec![dec!(1), dec!(2), dec!(3)]);
}

#[test]
fn one_failure_does_not_abort_the_rest() {
    let conn = base_conn();
    add_account(&conn, "A", "50000001");
    add_account(&conn, "B", "50000002");
    add_account(&conn, "C", "50000003");
    let source = FakeSource::new(&[
        ("A", Outcome::Ok(1_000_000)),
        ("B", Outcome::ServerError),
        ("C", Outcome::Ok(2_000_000)),
    ]);

    let accounts = load_accounts(&conn, true).unwrap();
    let results = fetch_all(&conn, &source, accounts, now()).unwrap();
    let statuses: Vec<_> = results.iter().map(|(a, f)| (a.name.as_str(), f.status())).collect();
    assert_eq!(
        statuses,
        vec![
            ("A", FetchStatus::Fresh),
            ("B", FetchStatus::Failed),
            ("C", FetchStatus::Fresh)
        ]
    );

    // every account got a token and a balance call
    assert_eq!(source.calls.lock().unwrap().len(), 6);

    // fresh results were stored along with refreshed tokens
    let a = load_account(&conn, "A").unwrap();
    assert_eq!(a.access_token.as_deref(), Some("tok-A"));
    assert!(latest_snapshot(&conn, a.id).unwrap().is_some());
    let b = load_account(&conn, "B").unwrap();
    assert!(latest_snapshot(&conn, b.id).unwrap().is_none());

    let fetches: Vec<AccountFetch> = results.into_iter().map(|(_, f)| f).collect();
    let totals = folioboard::engine::aggregate_portfolio(&fetches);
    assert_eq!(totals.total_assets, dec!(3000000));
    assert_eq!(totals.valid_accounts, 2);
    assert_eq!(totals.failed_accounts, 1);
}

#[test]
fn credential_failure_falls_back_to_last_snapshot() {
    let conn = base_conn();
    let id = add_account(&conn, "Stale", "50000001");
    add_account(&conn, "New", "50000002");
    save_snapshot(&conn, id, &stored_snapshot(now() - Duration::days(1), 900_000)).unwrap();
    let source = FakeSource::new(&[
        ("Stale", Outcome::TokenRejected),
        ("New", Outcome::TokenRejected),
    ]);

    let results = fetch_all(&conn, &source, load_accounts(&conn, true).unwrap(), now()).unwrap();
    let by_name: HashMap<_, _> = results
        .iter()
        .map(|(a, f)| (a.name.as_str(), f))
        .collect();

    match by_name["Stale"] {
        AccountFetch::Degraded { snapshot, reason } => {
            assert_eq!(snapshot.total_evaluation_amount, dec!(900000));
            assert!(reason.contains("unauthorized"));
        }
        other => panic!("expected degraded, got {other:?}"),
    }
    assert_eq!(by_name["New"].status(), FetchStatus::Failed);

    // the token call failed, so no balance call was made
    let calls = source.calls.lock().unwrap();
    assert!(calls.iter().all(|c| c.starts_with("token:")));
}

#[test]
fn valid_token_is_reused() {
    let conn = base_conn();
    let id = add_account(&conn, "A", "50000001");
    conn.execute(
        "UPDATE accounts SET access_token='tok-A', access_token_expires_at=?1 WHERE id=?2",
        params![
            folioboard::utils::db_timestamp(now() + Duration::hours(6)),
            id
        ],
    )
    .unwrap();
    let source = FakeSource::new(&[("A", Outcome::Ok(10))]);
    let results = fetch_all(&conn, &source, load_accounts(&conn, true).unwrap(), now()).unwrap();
    assert_eq!(results[0].1.status(), FetchStatus::Fresh);
    assert_eq!(*source.calls.lock().unwrap(), vec!["balance:A".to_string()]);
}

#[test]
fn stored_summary_marks_accounts_without_history_failed() {
    let conn = base_conn();
    let a = add_account(&conn, "A", "50000001");
    add_account(&conn, "B", "50000002");
    let c = add_account(&conn, "C", "50000003");
    conn.execute("UPDATE accounts SET is_active=0 WHERE id=?1", params![c])
        .unwrap();
    save_snapshot(&conn, a, &stored_snapshot(now(), 1_050_000)).unwrap();
    save_snapshot(&conn, c, &stored_snapshot(now(), 5_000_000)).unwrap();

    let report = build_report(&collect_stored(&conn).unwrap());
    assert_eq!(report.accounts.len(), 2);
    assert_eq!(report.totals.total_assets, dec!(1050000));
    assert_eq!(report.totals.valid_accounts, 1);
    assert_eq!(report.totals.failed_accounts, 1);
    assert_eq!(report.totals.average_monthly_return_percent.to_string(), "4.00");

    let a_summary = &report.accounts[0];
    assert_eq!(a_summary.display_name, "A");
    assert_eq!(a_summary.return_rate_percent.to_string(), "5.00");
    assert_eq!(report.accounts[1].status, FetchStatus::Failed);
    assert_eq!(
        report.accounts[1].return_rate_percent.to_string(),
        "0.00"
    );
}

fn corrupt_holdings(conn: &Connection, account_id: i64) {
    conn.execute(
        "UPDATE balance_snapshots SET holdings='not json' WHERE account_id=?1",
        params![account_id],
    )
    .unwrap();
}

#[test]
fn unreadable_snapshot_fails_only_its_account() {
    let conn = base_conn();
    let a = add_account(&conn, "A", "50000001");
    let b = add_account(&conn, "B", "50000002");
    save_snapshot(&conn, a, &stored_snapshot(now(), 1_050_000)).unwrap();
    save_snapshot(&conn, b, &stored_snapshot(now(), 2_000_000)).unwrap();
    corrupt_holdings(&conn, b);

    let results = collect_stored(&conn).unwrap();
    assert_eq!(results[0].1.status(), FetchStatus::Fresh);
    assert_eq!(results[1].1.status(), FetchStatus::Failed);
    assert!(
        results[1]
            .1
            .reason()
            .is_some_and(|r| r.contains("unreadable stored balance"))
    );

    let report = build_report(&results);
    assert_eq!(report.totals.total_assets, dec!(1050000));
    assert_eq!(report.totals.valid_accounts, 1);
    assert_eq!(report.totals.failed_accounts, 1);
}

#[test]
fn unreadable_fallback_snapshot_fails_only_its_account() {
    let conn = base_conn();
    add_account(&conn, "A", "50000001");
    let b = add_account(&conn, "B", "50000002");
    save_snapshot(&conn, b, &stored_snapshot(now() - Duration::days(1), 900_000)).unwrap();
    corrupt_holdings(&conn, b);
    let source = FakeSource::new(&[("A", Outcome::Ok(1_000_000)), ("B", Outcome::TokenRejected)]);

    let results = fetch_all(&conn, &source, load_accounts(&conn, true).unwrap(), now()).unwrap();
    assert_eq!(results[0].1.status(), FetchStatus::Fresh);
    assert_eq!(results[1].1.status(), FetchStatus::Failed);
    assert!(
        results[1]
            .1
            .reason()
            .is_some_and(|r| r.contains("storage error"))
    );
}

#[test]
fn watch_runs_the_requested_cycles() {
    let conn = base_conn();
    let a = add_account(&conn, "A", "50000001");
    add_account(&conn, "B", "50000002");
    let source = FakeSource::new(&[("A", Outcome::Ok(1_000_000)), ("B", Outcome::ServerError)]);

    let mut tick = 0;
    let reports = watch(&conn, &source, StdDuration::ZERO, Some(2), || {
        tick += 1;
        now() + Duration::hours(tick)
    })
    .unwrap();

    let expected = CycleReport {
        fresh: 1,
        degraded: 0,
        failed: 1,
    };
    assert_eq!(reports, vec![expected, expected]);
    let history = load_history(&conn, a, now(), now() + Duration::hours(3)).unwrap();
    assert_eq!(history.len(), 2);

    // the token issued in the first cycle is reused in the second
    let calls = source.calls.lock().unwrap();
    assert_eq!(calls.iter().filter(|c| *c == "token:A").count(), 1);
}
