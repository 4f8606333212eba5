use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RemarkEntry {
    /// Local wall-clock time in the business timezone; `None` for legacy free text.
    pub recorded_at: Option<NaiveDateTime>,
    pub text: String,
}

/// Append-only note log stored in a single `remarks` column, one entry per
/// line as `[YYYY-MM-DD HH:MM:SS] text`. Lines without a stamp are kept as
/// unstamped entries so older free-text remarks survive a round trip.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RemarkLog {
    entries: Vec<RemarkEntry>,
}

impl RemarkLog {
    pub fn parse(raw: Option<&str>) -> Self {
        let entries = raw
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(parse_line)
            .collect();
        Self { entries }
    }

    pub fn append(&mut self, at: DateTime<Utc>, timezone: Tz, text: &str) {
        let text = text.replace(['\r', '\n'], " ");
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.entries.push(RemarkEntry {
            recorded_at: Some(timezone.from_utc_datetime(&at.naive_utc()).naive_local()),
            text: text.to_string(),
        });
    }

    pub fn serialize(&self) -> String {
        self.entries
            .iter()
            .map(|entry| match entry.recorded_at {
                Some(stamp) => format!("[{}] {}", stamp.format(STAMP_FORMAT), entry.text),
                None => entry.text.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Appends one stamped entry to an existing remarks column value.
pub fn append_remark(existing: Option<&str>, at: DateTime<Utc>, timezone: Tz, text: &str) -> String {
    let mut log = RemarkLog::parse(existing);
    log.append(at, timezone, text);
    log.serialize()
}

fn parse_line(line: &str) -> RemarkEntry {
    if let Some(rest) = line.strip_prefix('[') {
        if let Some((stamp, text)) = rest.split_once(']') {
            if let Ok(recorded_at) = NaiveDateTime::parse_from_str(stamp.trim(), STAMP_FORMAT) {
                return RemarkEntry {
                    recorded_at: Some(recorded_at),
                    text: text.trim().to_string(),
                };
            }
        }
    }
    RemarkEntry {
        recorded_at: None,
        text: line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{append_remark, RemarkLog};

    #[test]
    fn appends_without_overwriting_prior_notes() {
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 2, 30, 0).single().expect("valid time");
        let first = append_remark(Some("签约时备注"), at, chrono_tz::Asia::Shanghai, "退房：合同到期");
        assert_eq!(first, "签约时备注\n[2026-06-01 10:30:00] 退房：合同到期");

        let second = append_remark(Some(&first), at, chrono_tz::Asia::Shanghai, "押金已退");
        let log = RemarkLog::parse(Some(&second));
        assert_eq!(log.entries.len(), 3);
        assert!(log.entries[0].recorded_at.is_none());
        assert_eq!(log.entries[2].text, "押金已退");
    }

    #[test]
    fn flattens_multiline_text_and_skips_empty_notes() {
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single().expect("valid time");
        let mut log = RemarkLog::parse(None);
        log.append(at, chrono_tz::UTC, "line one\nline two");
        log.append(at, chrono_tz::UTC, "   ");
        assert_eq!(log.serialize(), "[2026-06-01 00:00:00] line one line two");
    }
}
