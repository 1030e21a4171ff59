use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Parses datetimes printed by `pbsnodes` and `qstat`, e.g. `Thu Aug 19 13:05:17 2021`.
/// Days are space padded by PBS (`Mon Jun  3`), so runs of whitespace are collapsed first.
pub fn parse_pbs_datetime(datetime: &str) -> anyhow::Result<NaiveDateTime> {
    let normalized = datetime.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(NaiveDateTime::parse_from_str(
        &normalized,
        "%a %b %d %H:%M:%S %Y",
    )?)
}

pub fn local_to_utc(datetime: NaiveDateTime) -> anyhow::Result<DateTime<Utc>> {
    Local
        .from_local_datetime(&datetime)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| anyhow::anyhow!("Invalid local time {datetime}"))
}

/// Accepts both the textual form and seconds since the epoch (`-F json` output).
pub fn parse_pbs_timestamp(value: &str) -> anyhow::Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<i64>() {
        return DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| anyhow::anyhow!("Invalid timestamp {seconds}"));
    }
    local_to_utc(parse_pbs_datetime(value)?)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

/// Deserializes a duration given either as seconds or as a human readable string (`5m`).
pub fn deserialize_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Duration, D::Error> {
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
        RawDuration::Text(text) => {
            humantime::parse_duration(&text).map_err(serde::de::Error::custom)
        }
    }
}
