// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Paper,
    Live,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Paper => "paper",
            AccountType::Live => "live",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paper" => Ok(AccountType::Paper),
            "live" => Ok(AccountType::Live),
            other => Err(anyhow!(
                "Unknown account type '{}', expected paper|live",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerAccount {
    pub id: i64,
    pub name: String,
    pub cano: String,         // 8-digit account number
    pub product_code: String, // ACNT_PRDT_CD, usually "01"
    pub account_type: AccountType,
    pub hts_id: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub app_key: String,
    #[serde(skip_serializing)]
    pub app_secret: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub product_name: String,
    pub product_code: String,
    #[serde(default)]
    pub quantity: Decimal,
    #[serde(default)]
    pub evaluation_amount: Decimal,
    #[serde(default)]
    pub profit_loss_amount: Decimal,
    #[serde(default)]
    pub profit_loss_rate: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub total_evaluation_amount: Decimal,
    #[serde(default)]
    pub securities_evaluation_amount: Decimal,
    #[serde(default)]
    pub total_purchase_amount: Decimal,
    #[serde(default)]
    pub total_profit_loss: Decimal,
    #[serde(default)]
    pub cash_balance: Decimal,
    #[serde(default)]
    pub cash_balance_d2: Decimal,
    #[serde(default)]
    pub asset_change_amount: Decimal,
    #[serde(default)]
    pub monthly_return_rate: Decimal,
    #[serde(default)]
    pub daily_return_rate: Decimal,
    #[serde(default)]
    pub holdings: Vec<Holding>,
}

impl BalanceSnapshot {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        BalanceSnapshot {
            timestamp,
            total_evaluation_amount: Decimal::ZERO,
            securities_evaluation_amount: Decimal::ZERO,
            total_purchase_amount: Decimal::ZERO,
            total_profit_loss: Decimal::ZERO,
            cash_balance: Decimal::ZERO,
            cash_balance_d2: Decimal::ZERO,
            asset_change_amount: Decimal::ZERO,
            monthly_return_rate: Decimal::ZERO,
            daily_return_rate: Decimal::ZERO,
            holdings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Sell,
    Buy,
    Other,
}

impl TradeSide {
    // KIS `sll_buy_dvsn_cd`: `01` sell, `02` buy.
    pub fn from_kis_code(code: &str) -> Self {
        match code.trim() {
            "01" => TradeSide::Sell,
            "02" => TradeSide::Buy,
            _ => TradeSide::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Sell => "sell",
            TradeSide::Buy => "buy",
            TradeSide::Other => "other",
        }
    }
}

impl FromStr for TradeSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sell" => Ok(TradeSide::Sell),
            "buy" => Ok(TradeSide::Buy),
            "other" => Ok(TradeSide::Other),
            other => Err(anyhow!("Unknown trade side '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub order_date: String, // YYYYMMDD, KST
    pub order_no: String,
    pub order_time: String, // HHMMSS
    pub product_code: String,
    pub product_name: String,
    pub side: TradeSide,
    pub order_price: Decimal,
    pub order_quantity: Decimal,
    pub filled_price: Decimal,
    pub filled_quantity: Decimal,
    pub filled_amount: Decimal,
    pub remaining_quantity: Decimal,
    pub cancelled_quantity: Decimal,
}
