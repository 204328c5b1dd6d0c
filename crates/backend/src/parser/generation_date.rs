//! Generation-date derivation from announcement text.
//!
//! The phrase "Generación del 10 de enero de 2025" (and, as a fallback, the
//! generic "10 de enero de 2025") is searched across the plain body, the
//! HTML-stripped body, the texts captured around the table, and finally the
//! subject. The first match wins; the ordering is load-bearing for real
//! inbound mail.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static PATTERN_GENERATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Generación\s+del\s+(\d{1,2})\s+de\s+([A-Za-zÁÉÍÓÚáéíóúñÑ]+)\s+de\s+(\d{4})")
        .expect("static regex")
});

static PATTERN_GENERIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d{1,2})\s+de\s+([A-Za-zÁÉÍÓÚáéíóúñÑ]+)\s+(?:de\s+)?(\d{4})")
        .expect("static regex")
});

const MONTHS: &[(&str, u32)] = &[
    ("enero", 1),
    ("febrero", 2),
    ("marzo", 3),
    ("abril", 4),
    ("mayo", 5),
    ("junio", 6),
    ("julio", 7),
    ("agosto", 8),
    ("septiembre", 9),
    ("setiembre", 9),
    ("sept", 9),
    ("octubre", 10),
    ("oct", 10),
    ("noviembre", 11),
    ("diciembre", 12),
];

fn strip_accents(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'Á' | 'À' | 'Ä' => 'a',
            'É' | 'È' | 'Ë' => 'e',
            'Í' | 'Ì' | 'Ï' => 'i',
            'Ó' | 'Ò' | 'Ö' => 'o',
            'Ú' | 'Ù' | 'Ü' => 'u',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

fn month_number(name: &str) -> Option<u32> {
    let normalized = strip_accents(name.trim());
    MONTHS
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, number)| *number)
}

fn apply_patterns(content: &str, patterns: &[&Regex]) -> Option<String> {
    for pattern in patterns {
        for captures in pattern.captures_iter(content) {
            let day: u32 = captures[1].parse().ok()?;
            let year: i32 = captures[3].parse().ok()?;
            let Some(month) = month_number(&captures[2]) else {
                continue;
            };
            // Reject phrases that only look like dates ("32 de enero de 2025").
            if NaiveDate::from_ymd_opt(year, month, day).is_none() {
                continue;
            }
            return Some(format!("{year:04}{month:02}{day:02}"));
        }
    }
    None
}

/// Derive the `YYYYMMDD` generation date from the message sources, in the
/// fixed fallback order described above.
pub fn extract_generation_date(
    body: &str,
    stripped_html: &str,
    table_texts: &[String],
    subject: &str,
) -> Option<String> {
    let full: [&Regex; 2] = [&PATTERN_GENERATION, &PATTERN_GENERIC];

    if !body.is_empty() {
        if let Some(found) = apply_patterns(body, &full) {
            tracing::debug!(source = "body", generation_date = %found, "generation date derived");
            return Some(found);
        }
    }
    if !stripped_html.is_empty() {
        if let Some(found) = apply_patterns(stripped_html, &full) {
            tracing::debug!(source = "html", generation_date = %found, "generation date derived");
            return Some(found);
        }
    }
    for text in table_texts {
        if text.is_empty() {
            continue;
        }
        if let Some(found) = apply_patterns(text, &full) {
            tracing::debug!(source = "table", generation_date = %found, "generation date derived");
            return Some(found);
        }
    }
    if !subject.is_empty() {
        if let Some(found) = apply_patterns(subject, &[&PATTERN_GENERIC]) {
            tracing::debug!(source = "subject", generation_date = %found, "generation date derived");
            return Some(found);
        }
    }

    None
}
