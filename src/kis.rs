// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::models::{AccountType, BalanceSnapshot, BrokerAccount, Holding, Trade, TradeSide};
use crate::utils::http_client;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Asia::Seoul;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

const LIVE_BASE_URL: &str = "https://openapi.koreainvestment.com:9443";
const PAPER_BASE_URL: &str = "https://openapivts.koreainvestment.com:29443";
const TOKEN_PATH: &str = "/oauth2/tokenP";
const BALANCE_PATH: &str = "/uapi/domestic-stock/v1/trading/inquire-balance";
const DAILY_TRADES_PATH: &str = "/uapi/domestic-stock/v1/trading/inquire-daily-ccld";

pub fn base_url(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::Live => LIVE_BASE_URL,
        AccountType::Paper => PAPER_BASE_URL,
    }
}

fn balance_tr_id(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::Live => "TTTC8434R",
        AccountType::Paper => "VTTC8434R",
    }
}

fn daily_trades_tr_id(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::Live => "TTTC8001R",
        AccountType::Paper => "VTTC8001R",
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no access token stored for account '{0}'")]
    MissingToken(String),
    #[error("access token expired at {0}")]
    TokenExpired(DateTime<Utc>),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("KIS API error {code}: {message}")]
    Api { code: String, message: String },
    #[error("balance response carried no account totals")]
    MissingTotals,
    #[error("could not parse KIS response: {0}")]
    Parse(#[from] serde_json::Error),
}

impl FetchError {
    pub fn is_credential_problem(&self) -> bool {
        match self {
            FetchError::MissingToken(_)
            | FetchError::TokenExpired(_)
            | FetchError::Unauthorized(_) => true,
            FetchError::Status { status, .. } => *status == 401 || *status == 403,
            // EGW00121: invalid token, EGW00123: expired token
            FetchError::Api { code, .. } => matches!(code.as_str(), "EGW00121" | "EGW00123"),
            _ => false,
        }
    }
}

/// Parse a KIS amount. Blank, `-` and garbage all read as zero.
pub fn parse_amount(raw: &str) -> Decimal {
    let s = raw.trim().replace(',', "");
    if s.is_empty() || s == "-" {
        return Decimal::ZERO;
    }
    s.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&s))
        .unwrap_or(Decimal::ZERO)
}

fn lenient_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_decimal(deserializer)?.unwrap_or(Decimal::ZERO))
}

fn lenient_opt_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if s.trim().is_empty() || s.trim() == "-" => None,
        Some(Value::String(s)) => Some(parse_amount(&s)),
        Some(Value::Number(n)) => Some(parse_amount(&n.to_string())),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KisHolding {
    #[serde(default, deserialize_with = "lenient_string")]
    pub prdt_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pdno: String,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub hldg_qty: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub evlu_amt: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub evlu_pfls_amt: Decimal,
    #[serde(default, deserialize_with = "lenient_opt_decimal")]
    pub evlu_pfls_rt: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KisAccountTotals {
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub dnca_tot_amt: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub prvs_rcdl_excc_amt: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub tot_evlu_amt: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub evlu_amt_smtl_amt: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub pchs_amt_smtl_amt: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub evlu_pfls_smtl_amt: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub asst_icdc_amt: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub asst_icdc_erng_rt: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub asst_icdc_erng_rt_1: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KisBalanceResponse {
    #[serde(default, deserialize_with = "lenient_string")]
    pub rt_cd: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub msg_cd: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub msg1: String,
    #[serde(default)]
    pub output1: Option<Vec<KisHolding>>,
    #[serde(default)]
    pub output2: Option<Vec<KisAccountTotals>>,
}

impl KisBalanceResponse {
    pub fn into_snapshot(self, timestamp: DateTime<Utc>) -> Result<BalanceSnapshot, FetchError> {
        if !self.rt_cd.is_empty() && self.rt_cd != "0" {
            return Err(FetchError::Api {
                code: self.msg_cd,
                message: self.msg1,
            });
        }
        let totals = self
            .output2
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or(FetchError::MissingTotals)?;
        let holdings = self
            .output1
            .unwrap_or_default()
            .into_iter()
            .map(|h| Holding {
                product_name: h.prdt_name,
                product_code: h.pdno,
                quantity: h.hldg_qty,
                evaluation_amount: h.evlu_amt,
                profit_loss_amount: h.evlu_pfls_amt,
                profit_loss_rate: h.evlu_pfls_rt,
            })
            .collect();

        Ok(BalanceSnapshot {
            timestamp,
            total_evaluation_amount: totals.tot_evlu_amt,
            securities_evaluation_amount: totals.evlu_amt_smtl_amt,
            total_purchase_amount: totals.pchs_amt_smtl_amt,
            total_profit_loss: totals.evlu_pfls_smtl_amt,
            cash_balance: totals.dnca_tot_amt,
            cash_balance_d2: totals.prvs_rcdl_excc_amt,
            asset_change_amount: totals.asst_icdc_amt,
            monthly_return_rate: totals.asst_icdc_erng_rt,
            daily_return_rate: totals.asst_icdc_erng_rt_1,
            holdings,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KisTrade {
    #[serde(default, deserialize_with = "lenient_string")]
    pub ord_dt: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub odno: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ord_tmd: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pdno: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub prdt_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sll_buy_dvsn_cd: String,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub ord_unpr: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub ord_qty: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub avg_prvs: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub tot_ccld_qty: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub tot_ccld_amt: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub rmn_qty: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub cncl_cfrm_qty: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KisTradesResponse {
    #[serde(default, deserialize_with = "lenient_string")]
    pub rt_cd: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub msg_cd: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub msg1: String,
    #[serde(default)]
    pub output1: Option<Vec<KisTrade>>,
}

impl KisTradesResponse {
    pub fn into_trades(self) -> Result<Vec<Trade>, FetchError> {
        if !self.rt_cd.is_empty() && self.rt_cd != "0" {
            return Err(FetchError::Api {
                code: self.msg_cd,
                message: self.msg1,
            });
        }
        Ok(self
            .output1
            .unwrap_or_default()
            .into_iter()
            .filter(|t| !t.odno.is_empty() && !t.ord_dt.is_empty())
            .map(|t| Trade {
                order_date: t.ord_dt,
                order_no: t.odno,
                order_time: t.ord_tmd,
                product_code: t.pdno,
                product_name: t.prdt_name,
                side: TradeSide::from_kis_code(&t.sll_buy_dvsn_cd),
                order_price: t.ord_unpr,
                order_quantity: t.ord_qty,
                filled_price: t.avg_prvs,
                filled_quantity: t.tot_ccld_qty,
                filled_amount: t.tot_ccld_amt,
                remaining_quantity: t.rmn_qty,
                cancelled_quantity: t.cncl_cfrm_qty,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    access_token_token_expired: String,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error_code: String,
    error_description: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    msg_cd: String,
    msg1: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Parse the KIS `YYYY-MM-DD HH:MM:SS` format, which is KST.
pub fn parse_kis_datetime(s: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
    let kst = Seoul.from_local_datetime(&naive).single()?;
    Some(kst.with_timezone(&Utc))
}

/// True when no expiry is known or it falls within `threshold_minutes` of `now`.
pub fn token_needs_refresh(
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold_minutes: i64,
) -> bool {
    match expires_at {
        None => true,
        Some(at) => now + Duration::minutes(threshold_minutes) >= at,
    }
}

pub struct KisClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl KisClient {
    pub fn new(account_type: AccountType) -> anyhow::Result<Self> {
        Ok(Self::with_base_url(http_client()?, base_url(account_type)))
    }

    pub fn with_base_url(http: reqwest::blocking::Client, base_url: &str) -> Self {
        KisClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn issue_token(&self, app_key: &str, app_secret: &str) -> Result<AccessToken, FetchError> {
        if app_key.trim().is_empty() || app_secret.trim().is_empty() {
            return Err(FetchError::Unauthorized(
                "app key and secret must be set".to_string(),
            ));
        }
        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        let body = serde_json::json!({
            "grant_type": "client_credentials",
            "appkey": app_key,
            "appsecret": app_secret,
        });
        let resp = self
            .http
            .post(url)
            .header("content-type", "application/json; charset=utf-8")
            .json(&body)
            .send()?;
        let status = resp.status();
        let text = resp.text()?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<OAuthErrorResponse>(&text) {
                return Err(FetchError::Unauthorized(format!(
                    "{} ({})",
                    err.error_description, err.error_code
                )));
            }
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let token: TokenResponse = serde_json::from_str(&text)?;
        let expires_at = parse_kis_datetime(&token.access_token_token_expired)
            .unwrap_or_else(|| Utc::now() + Duration::seconds(token.expires_in));
        info!(expires_at = %expires_at, "issued KIS access token");
        Ok(AccessToken {
            token: token.access_token,
            expires_at,
        })
    }

    fn get_json(
        &self,
        account: &BrokerAccount,
        path: &str,
        tr_id: &str,
        query: &[(&str, &str)],
    ) -> Result<String, FetchError> {
        let token = account
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FetchError::MissingToken(account.name.clone()))?;
        if let Some(at) = account.access_token_expires_at {
            if at <= Utc::now() {
                return Err(FetchError::TokenExpired(at));
            }
        }

        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(url)
            .header("authorization", format!("Bearer {}", token))
            .header("appkey", &account.app_key)
            .header("appsecret", &account.app_secret)
            .header("tr_id", tr_id)
            .header("custtype", "P")
            .header("content-type", "application/json; charset=utf-8")
            .query(query)
            .send()?;
        let status = resp.status();
        let text = resp.text()?;

        if !status.is_success() {
            warn!(account = %account.name, status = status.as_u16(), tr_id, "KIS inquiry failed");
            if let Ok(err) = serde_json::from_str::<ApiErrorResponse>(&text) {
                return Err(FetchError::Api {
                    code: err.msg_cd,
                    message: err.msg1,
                });
            }
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        debug!(account = %account.name, tr_id, body = %text, "KIS response");
        Ok(text)
    }

    pub fn inquire_balance(&self, account: &BrokerAccount) -> Result<KisBalanceResponse, FetchError> {
        let text = self.get_json(
            account,
            BALANCE_PATH,
            balance_tr_id(account.account_type),
            &[
                ("CANO", account.cano.as_str()),
                ("ACNT_PRDT_CD", account.product_code.as_str()),
                ("AFHR_FLPR_YN", "N"),
                ("OFL_YN", ""),
                ("INQR_DVSN", "02"),
                ("UNPR_DVSN", "01"),
                ("FUND_STTL_ICLD_YN", "N"),
                ("FNCG_AMT_AUTO_RDPT_YN", "N"),
                ("PRCS_DVSN", "00"),
                ("CTX_AREA_FK100", ""),
                ("CTX_AREA_NK100", ""),
            ],
        )?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn inquire_daily_trades(
        &self,
        account: &BrokerAccount,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<KisTradesResponse, FetchError> {
        let start = start.format("%Y%m%d").to_string();
        let end = end.format("%Y%m%d").to_string();
        let text = self.get_json(
            account,
            DAILY_TRADES_PATH,
            daily_trades_tr_id(account.account_type),
            &[
                ("CANO", account.cano.as_str()),
                ("ACNT_PRDT_CD", account.product_code.as_str()),
                ("INQR_STRT_DT", start.as_str()),
                ("INQR_END_DT", end.as_str()),
                ("SLL_BUY_DVSN_CD", "00"),
                ("INQR_DVSN", "00"),
                ("PDNO", ""),
                ("CCLD_DVSN", "00"),
                ("ORD_GNO_BRNO", ""),
                ("ODNO", ""),
                ("INQR_DVSN_3", "00"),
                ("INQR_DVSN_1", ""),
                ("INQR_DVSN_2", ""),
                ("CTX_AREA_FK100", ""),
                ("CTX_AREA_NK100", ""),
            ],
        )?;
        Ok(serde_json::from_str(&text)?)
    }
}

pub trait BalanceSource: Sync {
    fn issue_token(&self, account: &BrokerAccount) -> Result<AccessToken, FetchError>;
    fn inquire_balance(&self, account: &BrokerAccount) -> Result<KisBalanceResponse, FetchError>;
}

pub trait TradeSource: BalanceSource {
    fn inquire_daily_trades(
        &self,
        account: &BrokerAccount,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<KisTradesResponse, FetchError>;
}

pub struct KisGateway {
    http: reqwest::blocking::Client,
}

impl KisGateway {
    pub fn new() -> anyhow::Result<Self> {
        Ok(KisGateway {
            http: http_client()?,
        })
    }

    fn client_for(&self, account: &BrokerAccount) -> KisClient {
        KisClient::with_base_url(self.http.clone(), base_url(account.account_type))
    }
}

impl BalanceSource for KisGateway {
    fn issue_token(&self, account: &BrokerAccount) -> Result<AccessToken, FetchError> {
        self.client_for(account)
            .issue_token(&account.app_key, &account.app_secret)
    }

    fn inquire_balance(&self, account: &BrokerAccount) -> Result<KisBalanceResponse, FetchError> {
        self.client_for(account).inquire_balance(account)
    }
}

impl TradeSource for KisGateway {
    fn inquire_daily_trades(
        &self,
        account: &BrokerAccount,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<KisTradesResponse, FetchError> {
        self.client_for(account)
            .inquire_daily_trades(account, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_amount_tolerates_noise() {
        assert_eq!(parse_amount(" 1,234.5 "), dec!(1234.5));
        assert_eq!(parse_amount("-"), Decimal::ZERO);
        assert_eq!(parse_amount(""), Decimal::ZERO);
        assert_eq!(parse_amount("n/a"), Decimal::ZERO);
        assert_eq!(parse_amount("-532000"), dec!(-532000));
    }

    #[test]
    fn kis_datetime_is_kst() {
        let dt = parse_kis_datetime("2026-01-28 15:30:00").unwrap();
        assert_eq!(dt.hour(), 6);
        assert_eq!(dt.minute(), 30);
        assert!(parse_kis_datetime("28/01/2026").is_none());
    }

    #[test]
    fn refresh_threshold() {
        let now = Utc::now();
        assert!(token_needs_refresh(None, now, 30));
        assert!(token_needs_refresh(Some(now + Duration::minutes(10)), now, 30));
        assert!(!token_needs_refresh(Some(now + Duration::hours(5)), now, 30));
    }

    #[test]
    fn credential_errors_are_recognised() {
        let expired = FetchError::Api {
            code: "EGW00123".into(),
            message: "expired token".into(),
        };
        assert!(expired.is_credential_problem());
        assert!(FetchError::Status { status: 401, body: String::new() }.is_credential_problem());
        assert!(!FetchError::MissingTotals.is_credential_problem());
    }
}
