//! Java-style date patterns (`yyyy-MM-dd'T'HH:mm:ss'Z'`).
//!
//! Index mappings declare date formats in the backend's Java syntax, so the
//! same pattern string is kept in the schema and compiled here into a chrono
//! format string for formatting and parsing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::MarshalError;

/// Pattern used for timestamps whose field declares no format.
pub const DEFAULT_TIMESTAMP_PATTERN: &str = "yyyy-MM-dd'T'HH:mm:ss'Z'";

/// A compiled date pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatePattern {
    source: String,
    chrono_format: String,
    has_time: bool,
    has_offset: bool,
}

impl DatePattern {
    /// Compiles a Java-style pattern.
    pub fn compile(pattern: &str) -> Result<Self, MarshalError> {
        let invalid = |message: String| MarshalError::InvalidDatePattern {
            pattern: pattern.to_string(),
            message,
        };

        let chars: Vec<char> = pattern.chars().collect();
        let mut out = String::with_capacity(pattern.len() * 2);
        let mut has_time = false;
        let mut has_offset = false;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            if c == '\'' {
                // '' is an escaped quote, otherwise a quoted literal runs to the next quote
                if chars.get(i + 1) == Some(&'\'') {
                    out.push('\'');
                    i += 2;
                    continue;
                }
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(invalid("unterminated quoted literal".to_string())),
                        Some('\'') if chars.get(j + 1) == Some(&'\'') => {
                            out.push('\'');
                            j += 2;
                        }
                        Some('\'') => break,
                        Some(&literal) => {
                            push_literal(&mut out, literal);
                            j += 1;
                        }
                    }
                }
                i = j + 1;
                continue;
            }

            if !c.is_ascii_alphabetic() {
                push_literal(&mut out, c);
                i += 1;
                continue;
            }

            let mut run = 1;
            while chars.get(i + run) == Some(&c) {
                run += 1;
            }

            let item = match (c, run) {
                ('y', 2) => "%y",
                ('y', _) => "%Y",
                ('M', 1) => "%-m",
                ('M', 2) => "%m",
                ('M', 3) => "%b",
                ('M', _) => "%B",
                ('d', 1) => "%-d",
                ('d', _) => "%d",
                ('D', _) => "%j",
                ('E', 1..=3) => "%a",
                ('E', _) => "%A",
                ('a', _) => "%p",
                ('H', 1) => "%-H",
                ('H', _) => "%H",
                ('h', 1) => "%-I",
                ('h', _) => "%I",
                ('m', 1) => "%-M",
                ('m', _) => "%M",
                ('s', 1) => "%-S",
                ('s', _) => "%S",
                ('S', 1..=3) => "%3f",
                ('S', 4..=6) => "%6f",
                ('S', _) => "%9f",
                ('Z', _) => "%z",
                ('X', 1) | ('x', 1) => "%z",
                ('X', _) | ('x', _) => "%:z",
                (other, _) => {
                    return Err(invalid(format!("unsupported pattern letter '{}'", other)));
                }
            };

            if matches!(c, 'H' | 'h' | 'm' | 's' | 'S' | 'a') {
                has_time = true;
            }
            if matches!(c, 'Z' | 'X' | 'x') {
                has_offset = true;
            }

            out.push_str(item);
            i += run;
        }

        Ok(Self {
            source: pattern.to_string(),
            chrono_format: out,
            has_time,
            has_offset,
        })
    }

    /// The original Java-style pattern.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The compiled chrono format string.
    pub fn chrono_format(&self) -> &str {
        &self.chrono_format
    }

    /// Formats a UTC timestamp.
    pub fn format(&self, ts: &DateTime<Utc>) -> String {
        ts.format(&self.chrono_format).to_string()
    }

    /// Parses a string produced by [`format`](Self::format).
    ///
    /// Patterns without an offset are read as UTC; patterns without a time
    /// component yield midnight.
    pub fn parse(&self, value: &str) -> Option<DateTime<Utc>> {
        if self.has_offset {
            return DateTime::parse_from_str(value, &self.chrono_format)
                .ok()
                .map(|dt| dt.with_timezone(&Utc));
        }
        if self.has_time {
            return NaiveDateTime::parse_from_str(value, &self.chrono_format)
                .ok()
                .map(|naive| naive.and_utc());
        }
        NaiveDate::parse_from_str(value, &self.chrono_format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }
}

impl Default for DatePattern {
    fn default() -> Self {
        Self {
            source: DEFAULT_TIMESTAMP_PATTERN.to_string(),
            chrono_format: "%Y-%m-%dT%H:%M:%SZ".to_string(),
            has_time: true,
            has_offset: false,
        }
    }
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}
