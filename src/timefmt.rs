// Timestamp codecs for the two text boundaries:
// - log lines carry `dd/Mon/yyyy:HH:mm:ss +HHMM` (CLF) in the origin's local time
// - the store carries `yyyy-mm-dd HH:mm:ss` in UTC, which is also the form
//   date-range filters compare against

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;

pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn clf_month_map() -> HashMap<String, u32> {
    let months = vec![
        ("Jan", 1),
        ("Feb", 2),
        ("Mar", 3),
        ("Apr", 4),
        ("May", 5),
        ("Jun", 6),
        ("Jul", 7),
        ("Aug", 8),
        ("Sep", 9),
        ("Oct", 10),
        ("Nov", 11),
        ("Dec", 12),
    ];

    months
        .into_iter()
        .map(|(m, v)| (m.to_string(), v))
        .collect()
}

/// Parse a CLF timestamp (`10/Jan/2024:12:00:00 +0100`) into a UTC instant.
pub fn parse_clf(s: &str) -> Result<DateTime<Utc>> {
    if s.len() != 26 || !s.is_ascii() {
        bail!("unexpected CLF timestamp length: {:?}", s);
    }
    let month_map = clf_month_map();

    let day: u32 = s[0..2].parse()?;
    let month_str = &s[3..6];
    let month = *month_map
        .get(month_str)
        .ok_or_else(|| anyhow!("invalid month: {}", month_str))?;
    let year: i32 = s[7..11].parse()?;
    let hour: u32 = s[12..14].parse()?;
    let minute: u32 = s[15..17].parse()?;
    let second: u32 = s[18..20].parse()?;

    let timezone_sign = match &s[21..22] {
        "-" => -1,
        "+" => 1,
        other => bail!("invalid timezone sign: {}", other),
    };
    let timezone_hour: i32 = s[22..24].parse()?;
    let timezone_minute: i32 = s[24..26].parse()?;
    let timezone_offset = timezone_sign * (timezone_hour * 3600 + timezone_minute * 60);
    let timezone = FixedOffset::east_opt(timezone_offset).ok_or(anyhow!("invalid timezone"))?;

    let datetime = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .map(|date| date.and_local_timezone(timezone))
        .ok_or(anyhow!("invalid datetime"))?;
    let datetime = datetime
        .single()
        .ok_or(anyhow!("ambiguous or invalid datetime"))?;
    Ok(datetime.with_timezone(&Utc))
}

/// Parse a storage-format wall clock time (`2024-01-10 00:00:00`) as local
/// time in `zone` and convert to a UTC instant. Times that fall into a DST
/// gap or repeat during a fall-back hour are rejected.
pub fn parse_wall(s: &str, zone: Tz) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, STORAGE_FORMAT)?;
    let datetime = naive
        .and_local_timezone(zone)
        .single()
        .ok_or_else(|| anyhow!("ambiguous or invalid local time: {} in {}", s, zone))?;
    Ok(datetime.with_timezone(&Utc))
}

/// Render an instant as a CLF timestamp in `zone`. Inverse of [`parse_clf`].
pub fn format_clf(t: DateTime<Utc>, zone: Tz) -> String {
    t.with_timezone(&zone)
        .format("%d/%b/%Y:%H:%M:%S %z")
        .to_string()
}

/// Render an instant in the canonical storage form, always UTC.
pub fn format_storage(t: DateTime<Utc>) -> String {
    t.format(STORAGE_FORMAT).to_string()
}
