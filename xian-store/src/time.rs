use chrono::{DateTime, Local, NaiveDate, SecondsFormat, Utc};

/// Current time as ISO-8601 UTC with millisecond precision.
pub fn now_iso() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

/// Local wall-clock time for chat lines.
pub fn local_clock() -> String {
  Local::now().format("%H:%M:%S").to_string()
}

pub fn to_iso(ms: i64) -> String {
  DateTime::<Utc>::from_timestamp_millis(ms)
    .unwrap_or_default()
    .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp, or a bare `YYYY-MM-DD` date (midnight UTC),
/// into Unix milliseconds.
pub fn parse_ms(raw: &str) -> Option<i64> {
  let raw = raw.trim();
  if raw.is_empty() {
    return None;
  }
  if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
    return Some(parsed.timestamp_millis());
  }
  NaiveDate::parse_from_str(raw, "%Y-%m-%d")
    .ok()
    .and_then(|date| date.and_hms_opt(0, 0, 0))
    .map(|naive| naive.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_rfc3339_with_millis() {
    assert_eq!(parse_ms("1970-01-01T00:00:01.500Z"), Some(1500));
  }

  #[test]
  fn test_parse_offset() {
    assert_eq!(parse_ms("1970-01-01T01:00:00+01:00"), Some(0));
  }

  #[test]
  fn test_parse_bare_date() {
    assert_eq!(parse_ms("1970-01-02"), Some(86_400_000));
  }

  #[test]
  fn test_parse_garbage() {
    assert_eq!(parse_ms("yesterday"), None);
    assert_eq!(parse_ms(""), None);
  }

  #[test]
  fn test_iso_round_trip() {
    let ms = 1_700_000_000_123;
    assert_eq!(parse_ms(&to_iso(ms)), Some(ms));
    assert!(to_iso(ms).ends_with('Z'));
  }
}
