//! Positional spreadsheet row → [`MissionaryRecord`] mapping.
//!
//! Columns are addressed by index (0–34); index 8 is unused. The mapper
//! fills `treatment` (absent), `active = true`, and stamps both timestamps
//! with its invocation instant.

use chrono::{DateTime, NaiveDate, Utc};
use shared_types::MissionaryRecord;

use crate::normalize;

/// A spreadsheet cell, already lifted out of the workbook format.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
}

impl Cell {
    fn text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(value) => {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Cell::Number(value) => {
                if value.fract() == 0.0 {
                    Some(format!("{}", *value as i64))
                } else {
                    Some(value.to_string())
                }
            }
            Cell::Bool(value) => Some(value.to_string()),
            Cell::Date(value) => Some(value.to_string()),
        }
    }

    fn integer(&self) -> Option<i32> {
        match self {
            Cell::Number(value) if value.fract() == 0.0 => Some(*value as i32),
            Cell::Text(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    fn boolean(&self) -> bool {
        match self {
            Cell::Bool(value) => *value,
            Cell::Number(value) => *value == 1.0,
            Cell::Text(value) => normalize::coerce_bool(value),
            _ => false,
        }
    }

    /// Date coercion outcome: `Ok(None)` for absence, `Err` for a value that
    /// looked like a date but was not one.
    fn date(&self) -> Result<Option<NaiveDate>, ()> {
        match self {
            Cell::Empty => Ok(None),
            Cell::Date(value) => Ok(Some(*value)),
            Cell::Number(value) => normalize::excel_serial_date(*value).map(Some).ok_or(()),
            Cell::Text(value) => {
                if value.trim().is_empty() {
                    Ok(None)
                } else {
                    normalize::coerce_date(value).map(Some).ok_or(())
                }
            }
            Cell::Bool(_) => Err(()),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(value) => value.trim().is_empty(),
            _ => false,
        }
    }
}

/// Errors attributed to one source row (0-based, header excluded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub row_index: usize,
    pub codes: Vec<String>,
}

const EMPTY_CELL: Cell = Cell::Empty;

fn cell(cells: &[Cell], index: usize) -> &Cell {
    cells.get(index).unwrap_or(&EMPTY_CELL)
}

fn date_field(
    cells: &[Cell],
    index: usize,
    field: &str,
    codes: &mut Vec<String>,
) -> Option<NaiveDate> {
    match cell(cells, index).date() {
        Ok(value) => value,
        Err(()) => {
            codes.push(format!("date_invalid:{field}"));
            None
        }
    }
}

/// Map one positional row. Returns the record (when an id could be
/// established) together with any per-row validation codes.
pub fn map_row(cells: &[Cell], now: DateTime<Utc>) -> (Option<MissionaryRecord>, Vec<String>) {
    let mut codes = Vec::new();

    if cells.iter().all(Cell::is_empty) {
        return (None, vec!["row_empty".to_string()]);
    }

    let id = match cell(cells, 0).integer() {
        Some(id) if id > 0 => id,
        _ => {
            return (None, vec!["id_missing".to_string()]);
        }
    };

    let name = cell(cells, 9).text().unwrap_or_default();
    if name.is_empty() {
        codes.push("name_missing".to_string());
    }

    let record = MissionaryRecord {
        id,
        district_id: cell(cells, 1).text(),
        kind: cell(cells, 2).text(),
        branch: cell(cells, 3).integer(),
        district: cell(cells, 4).text(),
        country: cell(cells, 5).text().map(|c| normalize::title_case(&c)),
        list_number: cell(cells, 6).integer(),
        companionship_number: cell(cells, 7).integer(),
        treatment: None,
        name,
        companion: cell(cells, 10).text(),
        assigned_mission: cell(cells, 11).text(),
        stake: cell(cells, 12).text(),
        lodging: cell(cells, 13).text(),
        photo: cell(cells, 14).text(),
        arrival: date_field(cells, 15, "arrival", &mut codes),
        departure: date_field(cells, 16, "departure", &mut codes),
        generation: date_field(cells, 17, "generation", &mut codes),
        comments: cell(cells, 18).text(),
        endowed: cell(cells, 19).boolean(),
        birth_date: date_field(cells, 20, "birth_date", &mut codes),
        photo_taken: cell(cells, 21).boolean(),
        passport: cell(cells, 22).boolean(),
        passport_folio: cell(cells, 23).text(),
        fm: cell(cells, 24).text(),
        ipad: cell(cells, 25).boolean(),
        closet: cell(cells, 26).text(),
        secondary_arrival: cell(cells, 27).text(),
        p_day: cell(cells, 28).text(),
        host: cell(cells, 29).boolean(),
        three_weeks: cell(cells, 30).boolean(),
        device: cell(cells, 31).boolean(),
        mission_email: cell(cells, 32).text(),
        personal_email: cell(cells, 33).text(),
        in_person_date: date_field(cells, 34, "in_person_date", &mut codes),
        active: true,
        created_at: now,
        updated_at: now,
    };

    (Some(record), codes)
}

/// Map a sequence of rows, collecting records and per-row errors.
pub fn map_rows(
    rows: &[Vec<Cell>],
    now: DateTime<Utc>,
) -> (Vec<MissionaryRecord>, Vec<RowError>) {
    let mut records = Vec::new();
    let mut errors = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let (record, codes) = map_row(row, now);
        if !codes.is_empty() {
            errors.push(RowError {
                row_index: index,
                codes,
            });
        }
        if let Some(record) = record {
            records.push(record);
        }
    }

    (records, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Cell {
        Cell::Text(value.to_string())
    }

    fn full_row() -> Vec<Cell> {
        vec![
            Cell::Number(101.0),             // id
            text("14A"),                     // district_id
            text("Elder"),                   // type
            Cell::Number(14.0),              // branch
            text("District 10A"),            // district
            text("estados unidos"),          // country
            Cell::Number(3.0),               // list_number
            Cell::Number(2.0),               // companionship_number
            Cell::Empty,                     // unused
            text("Smith, John"),             // name
            text("Jones, Mark"),             // companion
            text("México Norte"),            // assigned_mission
            text("Estaca Centro"),           // stake
            text("Casa 4"),                  // lodging
            text("foto.jpg"),                // photo
            text("10/1/2025"),               // arrival (D/M/YYYY)
            Cell::Number(45709.0),           // departure (excel serial)
            text("2025-01-10"),              // generation
            text("sin comentarios"),         // comments
            text("sí"),                      // endowed
            text("2004-06-15"),              // birth_date
            text("x"),                       // photo_taken
            text("VERDADERO"),               // passport
            text("AB1234"),                  // passport_folio
            text("FM-9"),                    // fm
            text("1"),                       // ipad
            text("C-12"),                    // closet
            text("virtual"),                 // secondary_arrival
            text("martes"),                  // p_day
            text("no"),                      // host
            text("si"),                      // three_weeks
            text(""),                        // device
            text("smith@example.org"),       // mission_email
            text("john@example.com"),        // personal_email
            text("18/3/2025"),               // in_person_date
        ]
    }

    #[test]
    fn maps_a_complete_row() {
        let now = Utc::now();
        let (record, codes) = map_row(&full_row(), now);
        let record = record.unwrap();

        assert!(codes.is_empty());
        assert_eq!(record.id, 101);
        assert_eq!(record.branch, Some(14));
        assert_eq!(record.country.as_deref(), Some("Estados Unidos"));
        assert_eq!(record.name, "Smith, John");
        assert_eq!(record.arrival, NaiveDate::from_ymd_opt(2025, 1, 10));
        assert_eq!(record.departure, NaiveDate::from_ymd_opt(2025, 2, 21));
        assert_eq!(record.generation, NaiveDate::from_ymd_opt(2025, 1, 10));
        assert_eq!(record.in_person_date, NaiveDate::from_ymd_opt(2025, 3, 18));
        assert!(record.endowed);
        assert!(record.photo_taken);
        assert!(record.passport);
        assert!(record.ipad);
        assert!(!record.host);
        assert!(record.three_weeks);
        assert!(!record.device);
        assert_eq!(record.treatment, None);
        assert!(record.active);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn short_rows_coerce_missing_cells_to_absence() {
        let now = Utc::now();
        let row = vec![Cell::Number(7.0), Cell::Empty, Cell::Empty, Cell::Empty,
                       Cell::Empty, Cell::Empty, Cell::Empty, Cell::Empty, Cell::Empty,
                       text("Solo, Han")];
        let (record, codes) = map_row(&row, now);
        let record = record.unwrap();

        assert!(codes.is_empty());
        assert_eq!(record.id, 7);
        assert_eq!(record.arrival, None);
        assert!(!record.endowed);
        assert_eq!(record.mission_email, None);
    }

    #[test]
    fn rows_without_id_are_dropped() {
        let now = Utc::now();
        for first in [Cell::Empty, text("no-numérico"), Cell::Number(-3.0)] {
            let mut row = full_row();
            row[0] = first;
            let (record, codes) = map_row(&row, now);
            assert!(record.is_none());
            assert_eq!(codes, vec!["id_missing".to_string()]);
        }
    }

    #[test]
    fn empty_rows_are_reported_as_such() {
        let now = Utc::now();
        let (record, codes) = map_row(&[Cell::Empty, text("  ")], now);
        assert!(record.is_none());
        assert_eq!(codes, vec!["row_empty".to_string()]);
    }

    #[test]
    fn missing_name_is_reported_but_the_record_survives() {
        let now = Utc::now();
        let mut row = full_row();
        row[9] = Cell::Empty;
        let (record, codes) = map_row(&row, now);
        assert!(record.is_some());
        assert_eq!(codes, vec!["name_missing".to_string()]);
    }

    #[test]
    fn unparseable_dates_yield_field_codes_and_absence() {
        let now = Utc::now();
        let mut row = full_row();
        row[15] = text("fecha_invalida");
        let (record, codes) = map_row(&row, now);
        let record = record.unwrap();

        assert_eq!(record.arrival, None);
        assert_eq!(codes, vec!["date_invalid:arrival".to_string()]);
    }

    #[test]
    fn map_rows_collects_records_and_errors() {
        let now = Utc::now();
        let rows = vec![
            full_row(),
            vec![Cell::Empty],
            vec![text("abc"), text("x")],
        ];
        let (records, errors) = map_rows(&rows, now);

        assert_eq!(records.len(), 1);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].row_index, 1);
        assert_eq!(errors[0].codes, vec!["row_empty".to_string()]);
        assert_eq!(errors[1].codes, vec!["id_missing".to_string()]);
    }
}
