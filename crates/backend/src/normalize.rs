//! Pure value coercion helpers shared by the parsers and adapters.
//!
//! Everything here is I/O free and idempotent: running a normalizer over its
//! own output yields the same value.

use chrono::{Duration, NaiveDate};

/// Maximum length of a stored filename, in code points.
pub const MAX_FILENAME_LENGTH: usize = 100;

/// Tokens that coerce to `true`. Anything else, including empty input,
/// coerces to `false`.
const TRUE_TOKENS: &[&str] = &["verdadero", "true", "si", "sí", "1", "x"];

/// Coerce a textual date into a calendar date.
///
/// Accepts ISO (`YYYY-MM-DD`), day-first `D/M/YYYY`, and the compact
/// `YYYYMMDD` form. `3/7/2025` is the 3rd of July regardless of locale.
pub fn coerce_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%d/%m/%Y") {
        return Some(date);
    }
    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y%m%d") {
            return Some(date);
        }
    }
    None
}

/// Convert an Excel serial date (1899-12-30 epoch) into a calendar date.
pub fn excel_serial_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 || serial > 400_000.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// Coerce a textual token into a boolean. Never absent: unknown and empty
/// values are both `false`.
pub fn coerce_bool(value: &str) -> bool {
    let token = value.trim().to_lowercase();
    TRUE_TOKENS.contains(&token.as_str())
}

/// Exact case-sensitive prefix match against the configured subject pattern.
pub fn subject_matches(subject: &str, pattern: &str) -> bool {
    !pattern.is_empty() && subject.starts_with(pattern)
}

/// Replace filesystem-hostile characters with `_`, collapse whitespace runs
/// into a single `_`, and cap the result at [`MAX_FILENAME_LENGTH`] code
/// points while keeping the extension.
pub fn sanitize_filename(name: &str) -> String {
    let source = if name.is_empty() { "archivo" } else { name };

    let mut out = String::with_capacity(source.len());
    let mut in_whitespace = false;
    for ch in source.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                out.push('_');
                in_whitespace = true;
            }
            continue;
        }
        in_whitespace = false;
        match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => out.push('_'),
            other => out.push(other),
        }
    }

    enforce_max_length(&out)
}

/// Split `name` into `(base, extension)` where the extension includes its
/// leading dot. Names without a dot, or starting with one, have no extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(idx) => name.split_at(idx),
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

fn enforce_max_length(name: &str) -> String {
    if name.chars().count() <= MAX_FILENAME_LENGTH {
        return name.to_string();
    }

    let (base, ext) = split_extension(name);
    let ext_len = ext.chars().count();
    if ext.is_empty() || ext_len >= MAX_FILENAME_LENGTH {
        return truncate_chars(name, MAX_FILENAME_LENGTH).to_string();
    }

    let allowed = (MAX_FILENAME_LENGTH - ext_len).max(1);
    format!("{}{}", truncate_chars(base, allowed), ext)
}

/// Produce a name not currently taken according to `exists`, appending a
/// millisecond timestamp (and a counter on repeated collisions) before the
/// extension.
pub fn resolve_collision<F>(desired: &str, exists: F, now_millis: i64) -> String
where
    F: Fn(&str) -> bool,
{
    if !exists(desired) {
        return desired.to_string();
    }

    let (base, ext) = split_extension(desired);
    let mut counter: u32 = 0;
    loop {
        let suffix = if counter == 0 {
            format!("_{now_millis}")
        } else {
            format!("_{now_millis}_{counter}")
        };
        let allowed = MAX_FILENAME_LENGTH
            .saturating_sub(ext.chars().count() + suffix.chars().count())
            .max(1);
        let candidate = format!("{}{}{}", truncate_chars(base, allowed), suffix, ext);
        if !exists(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Capitalize each whitespace-separated word, used for country names.
pub fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
