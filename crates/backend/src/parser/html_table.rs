//! HTML table extraction for arrival announcement bodies.

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};
use shared_types::ParsedTable;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cell_text(cell: ElementRef<'_>) -> String {
    collapse_whitespace(&cell.text().collect::<Vec<_>>().join(" "))
}

/// Strip markup from an HTML fragment, returning its visible text.
pub fn strip_tags(html: &str) -> String {
    let document = Html::parse_document(html);
    collapse_whitespace(
        &document
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Extract the first table of the HTML body.
///
/// The header row is the first `th`-only row, or the first row with at least
/// two non-empty cells. Text encountered before the header row (captions and
/// title rows included) is collected into `extra_texts`. Data rows are zipped
/// against the headers: short rows are right-padded with empty strings; long
/// rows are truncated and reported as `row_overflow:<index>`.
pub fn extract_primary_table(html: &str) -> (Option<ParsedTable>, Vec<String>) {
    let mut errors = Vec::new();

    if html.trim().is_empty() {
        errors.push("html_missing".to_string());
        return (None, errors);
    }

    let document = Html::parse_document(html);
    let table = match document.select(&selector("table")).next() {
        Some(table) => table,
        None => {
            errors.push("table_missing".to_string());
            return (None, errors);
        }
    };

    let mut headers: Vec<String> = Vec::new();
    let mut raw_rows: Vec<Vec<String>> = Vec::new();
    let mut extra_texts: Vec<String> = Vec::new();

    if let Some(caption) = table.select(&selector("caption")).next() {
        let text = cell_text(caption);
        if !text.is_empty() {
            extra_texts.push(text);
        }
    }

    let cell_selector = selector("th, td");
    let mut header_found = false;

    for row in table.select(&selector("tr")) {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_selector).collect();
        if cells.is_empty() {
            continue;
        }

        let texts: Vec<String> = cells.iter().map(|c| cell_text(*c)).collect();
        let non_empty: Vec<&String> = texts.iter().filter(|t| !t.is_empty()).collect();

        if !header_found {
            let all_th = cells.iter().all(|c| c.value().name() == "th");
            if (all_th && !non_empty.is_empty()) || non_empty.len() >= 2 {
                headers = dedupe_headers(texts.into_iter().filter(|t| !t.is_empty()).collect());
                header_found = true;
            } else {
                extra_texts.extend(non_empty.into_iter().cloned());
            }
            continue;
        }

        raw_rows.push(texts);
    }

    if headers.is_empty() {
        errors.push("headers_missing".to_string());
        return (None, errors);
    }

    let mut rows: Vec<HashMap<String, String>> = Vec::new();
    for (index, mut cells) in raw_rows.into_iter().enumerate() {
        let filled = cells.iter().filter(|c| !c.is_empty()).count();
        // Separator rows like "6 SEMANAS" carry a single cell; skip them
        // along with fully empty rows and header echoes.
        if filled == 0 || filled == 1 {
            continue;
        }
        if row_resembles_headers(&cells, &headers) {
            continue;
        }

        if cells.len() > headers.len() {
            errors.push(format!("row_overflow:{index}"));
            cells.truncate(headers.len());
        }
        cells.resize(headers.len(), String::new());

        rows.push(
            headers
                .iter()
                .cloned()
                .zip(cells)
                .collect::<HashMap<_, _>>(),
        );
    }

    (
        Some(ParsedTable {
            headers,
            rows,
            extra_texts,
        }),
        errors,
    )
}

fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .map(|header| {
            let count = seen.entry(header.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                header
            } else {
                format!("{header} ({count})")
            }
        })
        .collect()
}

fn row_resembles_headers(cells: &[String], headers: &[String]) -> bool {
    let values: Vec<&String> = cells.iter().filter(|c| !c.is_empty()).collect();
    !values.is_empty()
        && values
            .iter()
            .all(|value| headers.iter().any(|h| h.eq_ignore_ascii_case(value)))
}

/// Check the parsed table against the configured required columns.
///
/// Emits `column_missing:<col>` when a column is absent and
/// `value_missing:<col>:<row>` for each empty cell of a present column.
pub fn validate_table(table: &ParsedTable, required_columns: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    for column in required_columns {
        if !table.headers.iter().any(|h| h == column) {
            errors.push(format!("column_missing:{column}"));
            continue;
        }
        for (index, row) in table.rows.iter().enumerate() {
            if row.get(column).map(String::as_str).unwrap_or("").is_empty() {
                errors.push(format!("value_missing:{column}:{index}"));
            }
        }
    }
    errors
}
