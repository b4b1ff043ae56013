// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::models::{AccountType, BalanceSnapshot, BrokerAccount, Holding};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::str::FromStr;

pub fn round_rate(value: Decimal) -> Decimal {
    let mut r = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    r.rescale(2);
    r
}

/// `(profit_loss / purchase) * 100` rounded to 2 dp; `0.00` when purchase is zero.
pub fn compute_return_rate(purchase_amount: Decimal, profit_loss_amount: Decimal) -> Decimal {
    if purchase_amount.is_zero() {
        return round_rate(Decimal::ZERO);
    }
    profit_loss_amount
        .checked_div(purchase_amount)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map(round_rate)
        .unwrap_or_else(|| round_rate(Decimal::ZERO))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountReturnSummary {
    pub return_rate_percent: Decimal,
    pub total_evaluation_amount: Decimal,
    pub total_purchase_amount: Decimal,
    pub total_profit_loss: Decimal,
    pub cash_balance: Decimal,
    pub cash_balance_d2: Decimal,
}

pub fn summarize_account(snapshot: &BalanceSnapshot) -> AccountReturnSummary {
    AccountReturnSummary {
        return_rate_percent: compute_return_rate(
            snapshot.total_purchase_amount,
            snapshot.total_profit_loss,
        ),
        total_evaluation_amount: snapshot.total_evaluation_amount,
        total_purchase_amount: snapshot.total_purchase_amount,
        total_profit_loss: snapshot.total_profit_loss,
        cash_balance: snapshot.cash_balance,
        cash_balance_d2: snapshot.cash_balance_d2,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedHolding {
    #[serde(flatten)]
    pub holding: Holding,
    pub return_rate_percent: Decimal,
    pub trend: Trend,
}

// The upstream rate wins when present. Otherwise the purchase basis is
// `evaluation - profit_loss`.
pub fn summarize_holdings(holdings: &[Holding]) -> Vec<EnrichedHolding> {
    holdings
        .iter()
        .map(|h| {
            let raw_rate = match h.profit_loss_rate {
                Some(rate) => rate,
                None => {
                    let purchase = h
                        .evaluation_amount
                        .checked_sub(h.profit_loss_amount)
                        .unwrap_or(Decimal::ZERO);
                    compute_return_rate(purchase, h.profit_loss_amount)
                }
            };
            let trend = if raw_rate >= Decimal::ZERO {
                Trend::Up
            } else {
                Trend::Down
            };
            EnrichedHolding {
                holding: h.clone(),
                return_rate_percent: round_rate(raw_rate),
                trend,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccountFetch {
    Fetched(BalanceSnapshot),
    Degraded {
        snapshot: BalanceSnapshot,
        reason: String,
    },
    Failed {
        reason: String,
    },
}

impl AccountFetch {
    pub fn snapshot(&self) -> Option<&BalanceSnapshot> {
        match self {
            AccountFetch::Fetched(s) => Some(s),
            AccountFetch::Degraded { snapshot, .. } => Some(snapshot),
            AccountFetch::Failed { .. } => None,
        }
    }

    pub fn status(&self) -> FetchStatus {
        match self {
            AccountFetch::Fetched(_) => FetchStatus::Fresh,
            AccountFetch::Degraded { .. } => FetchStatus::Degraded,
            AccountFetch::Failed { .. } => FetchStatus::Failed,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            AccountFetch::Fetched(_) => None,
            AccountFetch::Degraded { reason, .. } | AccountFetch::Failed { reason } => {
                Some(reason.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Fresh,
    Degraded,
    Failed,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Fresh => "fresh",
            FetchStatus::Degraded => "degraded",
            FetchStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub account_id: i64,
    pub display_name: String,
    pub return_rate_percent: Decimal,
    pub is_active: bool,
    pub account_type: AccountType,
    pub status: FetchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

pub fn account_summary(account: &BrokerAccount, fetch: &AccountFetch) -> AccountSummary {
    let return_rate_percent = match fetch.snapshot() {
        Some(s) => summarize_account(s).return_rate_percent,
        None => round_rate(Decimal::ZERO),
    };
    AccountSummary {
        account_id: account.id,
        display_name: account.name.clone(),
        return_rate_percent,
        is_active: account.is_active,
        account_type: account.account_type,
        status: fetch.status(),
        note: fetch.reason().map(str::to_string),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioTotals {
    pub total_assets: Decimal,
    pub average_monthly_return_percent: Decimal,
    pub average_daily_return_percent: Decimal,
    pub valid_accounts: usize,
    pub degraded_accounts: usize,
    pub failed_accounts: usize,
}

// Failed accounts are left out of the sums and the averaging denominator.
// Degraded accounts count as valid.
pub fn aggregate_portfolio(results: &[AccountFetch]) -> PortfolioTotals {
    let mut total_assets = Decimal::ZERO;
    let mut monthly_sum = Decimal::ZERO;
    let mut daily_sum = Decimal::ZERO;
    let mut valid = 0usize;
    let mut degraded = 0usize;
    let mut failed = 0usize;

    for result in results {
        let Some(snapshot) = result.snapshot() else {
            failed += 1;
            continue;
        };
        if matches!(result, AccountFetch::Degraded { .. }) {
            degraded += 1;
        }
        valid += 1;
        total_assets = total_assets.saturating_add(snapshot.total_evaluation_amount);
        monthly_sum = monthly_sum.saturating_add(snapshot.monthly_return_rate);
        daily_sum = daily_sum.saturating_add(snapshot.daily_return_rate);
    }

    PortfolioTotals {
        total_assets,
        average_monthly_return_percent: mean(monthly_sum, valid),
        average_daily_return_percent: mean(daily_sum, valid),
        valid_accounts: valid,
        degraded_accounts: degraded,
        failed_accounts: failed,
    }
}

fn mean(sum: Decimal, count: usize) -> Decimal {
    if count == 0 {
        return round_rate(Decimal::ZERO);
    }
    sum.checked_div(Decimal::from(count))
        .map(round_rate)
        .unwrap_or_else(|| round_rate(Decimal::ZERO))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesBasis {
    #[default]
    Total,
    Securities,
}

impl SeriesBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesBasis::Total => "total",
            SeriesBasis::Securities => "securities",
        }
    }

    pub fn value_of(&self, snapshot: &BalanceSnapshot) -> Decimal {
        match self {
            SeriesBasis::Total => snapshot.total_evaluation_amount,
            SeriesBasis::Securities => snapshot.securities_evaluation_amount,
        }
    }
}

impl FromStr for SeriesBasis {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "total" => Ok(SeriesBasis::Total),
            "securities" => Ok(SeriesBasis::Securities),
            other => Err(anyhow!(
                "Unknown series basis '{}', expected total|securities",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub return_rate_percent: Decimal,
}

/// Cumulative return of each snapshot relative to the earliest one.
pub fn build_return_series<F>(
    history: &[BalanceSnapshot],
    basis: SeriesBasis,
    mut label: F,
) -> Vec<ReturnSeriesPoint>
where
    F: FnMut(DateTime<Utc>) -> String,
{
    let mut ordered: Vec<&BalanceSnapshot> = history.iter().collect();
    ordered.sort_by_key(|s| s.timestamp);

    let Some(first) = ordered.first() else {
        return Vec::new();
    };
    let baseline = basis.value_of(first);

    ordered
        .into_iter()
        .map(|snapshot| {
            let change = basis
                .value_of(snapshot)
                .checked_sub(baseline)
                .unwrap_or(Decimal::ZERO);
            ReturnSeriesPoint {
                timestamp: snapshot.timestamp,
                label: label(snapshot.timestamp),
                return_rate_percent: compute_return_rate(baseline, change),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn round_rate_pins_two_decimals() {
        assert_eq!(round_rate(dec!(10)).to_string(), "10.00");
        assert_eq!(round_rate(dec!(2.345)).to_string(), "2.35");
        assert_eq!(round_rate(dec!(-2.345)).to_string(), "-2.35");
    }

    #[test]
    fn derived_holding_rate_uses_evaluation_minus_profit() {
        let h = Holding {
            product_name: "NAVER".into(),
            product_code: "035420".into(),
            quantity: dec!(50),
            evaluation_amount: dec!(9468000),
            profit_loss_amount: dec!(-532000),
            profit_loss_rate: None,
        };
        let out = summarize_holdings(&[h]);
        assert_eq!(out[0].return_rate_percent, dec!(-5.32));
        assert_eq!(out[0].trend, Trend::Down);
    }

    #[test]
    fn series_ties_keep_input_order() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 1, 0, 0).unwrap();
        let mut a = BalanceSnapshot::empty(ts);
        a.total_evaluation_amount = dec!(100);
        let mut b = BalanceSnapshot::empty(ts);
        b.total_evaluation_amount = dec!(110);
        let points = build_return_series(&[a, b], SeriesBasis::Total, |_| String::new());
        assert_eq!(points[0].return_rate_percent, dec!(0));
        assert_eq!(points[1].return_rate_percent, dec!(10));
    }
}
