// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Asia::Seoul;
use serde::Serialize;
use std::str::FromStr;

const MARKET_OPEN: (u32, u32) = (9, 0);
const MARKET_CLOSE: (u32, u32) = (15, 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Intraday,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Intraday => "intraday",
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
            Period::Yearly => "yearly",
        }
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "intraday" | "today" => Ok(Period::Intraday),
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            "yearly" => Ok(Period::Yearly),
            other => Err(anyhow!(
                "Unknown period '{}', expected intraday|daily|weekly|monthly|yearly",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

fn kst_instant(date: NaiveDate, (h, m): (u32, u32)) -> Result<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(h, m, 0).context("Invalid KST time of day")?;
    let local = Seoul
        .from_local_datetime(&date.and_time(time))
        .single()
        .with_context(|| format!("Ambiguous KST time {} {:02}:{:02}", date, h, m))?;
    Ok(local.with_timezone(&Utc))
}

// Before 09:00 KST the previous day's session is still the current one.
pub fn session_date(now: DateTime<Utc>) -> Result<NaiveDate> {
    let today = now.with_timezone(&Seoul).date_naive();
    if now >= kst_instant(today, MARKET_OPEN)? {
        Ok(today)
    } else {
        today
            .pred_opt()
            .with_context(|| format!("No day before {}", today))
    }
}

pub fn window_for(period: Period, now: DateTime<Utc>) -> Result<TimeWindow> {
    if period == Period::Intraday {
        let session = session_date(now)?;
        let start = kst_instant(session, MARKET_OPEN)?;
        let close = kst_instant(session, MARKET_CLOSE)?;
        return Ok(TimeWindow {
            start,
            end: now.min(close),
        });
    }

    let today = now.with_timezone(&Seoul).date_naive();
    let first_day = match period {
        Period::Daily => today.checked_sub_signed(Duration::days(7)),
        Period::Weekly => today.checked_sub_signed(Duration::days(30)),
        Period::Monthly => today.checked_sub_months(Months::new(6)),
        Period::Yearly => today.checked_sub_months(Months::new(12)),
        Period::Intraday => Some(today),
    }
    .with_context(|| format!("Window for {} out of range", period.as_str()))?;

    Ok(TimeWindow {
        start: kst_instant(first_day, MARKET_OPEN)?,
        end: now,
    })
}

pub fn label_for(period: Period, timestamp: DateTime<Utc>) -> String {
    let local = timestamp.with_timezone(&Seoul);
    match period {
        Period::Intraday => local.format("%H:%M").to_string(),
        Period::Daily | Period::Weekly => local.format("%m/%d").to_string(),
        Period::Monthly | Period::Yearly => local.format("%Y-%m").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn intraday_during_session_starts_at_open() {
        // 11:00 KST on 2025-03-04
        let w = window_for(Period::Intraday, utc(2025, 3, 4, 2, 0)).unwrap();
        assert_eq!(w.start, utc(2025, 3, 4, 0, 0));
        assert_eq!(w.end, utc(2025, 3, 4, 2, 0));
    }

    #[test]
    fn intraday_after_close_is_clamped() {
        // 20:00 KST
        let w = window_for(Period::Intraday, utc(2025, 3, 4, 11, 0)).unwrap();
        assert_eq!(w.end, utc(2025, 3, 4, 6, 30));
    }

    #[test]
    fn intraday_before_open_uses_previous_session() {
        // 07:30 KST on 2025-03-04 is 22:30 UTC on 2025-03-03
        let w = window_for(Period::Intraday, utc(2025, 3, 3, 22, 30)).unwrap();
        assert_eq!(w.start, utc(2025, 3, 3, 0, 0));
        assert_eq!(w.end, utc(2025, 3, 3, 6, 30));
    }

    #[test]
    fn daily_goes_back_seven_kst_days() {
        // 01:00 KST on 2025-03-05 is still 2025-03-04 in UTC
        let w = window_for(Period::Daily, utc(2025, 3, 4, 16, 0)).unwrap();
        assert_eq!(w.start, utc(2025, 2, 26, 0, 0));
    }

    #[test]
    fn monthly_subtracts_calendar_months() {
        let w = window_for(Period::Monthly, utc(2025, 8, 31, 3, 0)).unwrap();
        assert_eq!(w.start, utc(2025, 2, 28, 0, 0));
    }

    #[test]
    fn labels_use_kst_clock() {
        let ts = utc(2025, 3, 4, 6, 5);
        assert_eq!(label_for(Period::Intraday, ts), "15:05");
        assert_eq!(label_for(Period::Weekly, ts), "03/04");
        assert_eq!(label_for(Period::Yearly, ts), "2025-03");
    }

    #[test]
    fn period_parses_aliases() {
        assert_eq!("Today".parse::<Period>().unwrap(), Period::Intraday);
        assert!("hourly".parse::<Period>().is_err());
    }
}
