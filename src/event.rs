use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Separator used only inside the internal sortable-line encoding (`SortedRun`
/// / `PartialTimeline` files). Never appears in the RFC 4180 output the
/// Final Merger writes — that goes through the `csv` crate instead.
const FIELD_SEP: char = '\u{1f}';

const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn escape_field(s: &str) -> String {
    if s.contains(['\\', '\n', '\r']) {
        s.replace('\\', "\\\\").replace('\n', "\\n").replace('\r', "\\r")
    } else {
        s.to_string()
    }
}

fn unescape_field(s: &str) -> String {
    if !s.contains('\\') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// One timeline row. An event with an unparseable or missing timestamp is
/// discarded before it ever reaches this type — see `parse_permissive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub source_type: String,
    pub description: String,
    pub source: String,
}

impl Event {
    pub fn new(
        timestamp: DateTime<Utc>,
        hostname: impl Into<String>,
        source_type: impl Into<String>,
        description: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Event {
            timestamp,
            hostname: hostname.into(),
            source_type: source_type.into(),
            description: description.into(),
            source: source.into(),
        }
    }

    /// Fixed-width ISO-8601-like key such that lexical order equals temporal
    /// order.
    pub fn timestamp_key(&self) -> String {
        self.timestamp.format(TIMESTAMP_FMT).to_string()
    }

    /// Encodes the composite sort key `(timestamp, source_type, description,
    /// source)` plus `hostname` as a single line whose byte-lexical order
    /// equals the required ordering: a `SortedRun` is just the sorted lines,
    /// and byte-identical adjacent lines are exactly the duplicates to drop.
    /// Fields are escaped so an embedded newline can never split a record
    /// across lines.
    pub fn to_sortable_line(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}{sep}{}",
            self.timestamp_key(),
            escape_field(&self.source_type),
            escape_field(&self.description),
            escape_field(&self.source),
            escape_field(&self.hostname),
            sep = FIELD_SEP
        )
    }

    pub fn from_sortable_line(line: &str) -> Option<Event> {
        let mut parts = line.splitn(5, FIELD_SEP);
        let ts = parts.next()?;
        let source_type = unescape_field(parts.next()?);
        let description = unescape_field(parts.next()?);
        let source = unescape_field(parts.next()?);
        let hostname = unescape_field(parts.next()?);

        let naive = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FMT).ok()?;
        let timestamp = Utc.from_utc_datetime(&naive);

        Some(Event {
            timestamp,
            hostname,
            source_type,
            description,
            source,
        })
    }
}

/// Permissive string timestamp parser shared by every plugin. Accepts
/// RFC 3339 and a handful of common forensic formats; timezone-naive
/// timestamps are assumed UTC.
pub fn parse_permissive(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d",
    ];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
        if let Ok(date) = chrono::NaiveDate::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trips_through_sortable_line() {
        let ts = Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap();
        let ev = Event::new(ts, "A.dom", "EVTX", "logon, ok", "C:\\f.evtx");
        let line = ev.to_sortable_line();
        let back = Event::from_sortable_line(&line).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn lexical_order_matches_temporal_order() {
        let earlier = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 1).unwrap();
        let a = Event::new(earlier, "h", "T", "d", "s").to_sortable_line();
        let b = Event::new(later, "h", "T", "d", "s").to_sortable_line();
        assert!(a < b);
    }

    #[test]
    fn embedded_newline_survives_round_trip() {
        let ts = Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap();
        let ev = Event::new(ts, "A.dom", "EVTX", "line one\nline two\\done", "C:\\f.evtx");
        let line = ev.to_sortable_line();
        assert!(!line.contains('\n'));
        let back = Event::from_sortable_line(&line).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn permissive_parser_handles_common_formats() {
        assert!(parse_permissive("2023-04-05T06:07:08Z").is_some());
        assert!(parse_permissive("2023-04-05 06:07:08.123").is_some());
        assert!(parse_permissive("2023-04-05").is_some());
        assert!(parse_permissive("not a date").is_none());
        assert!(parse_permissive("").is_none());
    }
}
