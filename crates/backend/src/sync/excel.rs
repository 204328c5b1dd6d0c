//! XLSX reading for generation spreadsheets.

use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};

use crate::parser::row_mapper::Cell;

/// Read the first worksheet of an XLSX payload into positional cells.
pub fn read_first_worksheet(bytes: &[u8]) -> Result<Vec<Vec<Cell>>, String> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes)).map_err(|e| format!("workbook open failed: {e}"))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| "workbook has no worksheets".to_string())?
        .map_err(|e| format!("worksheet read failed: {e}"))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(convert_cell).collect())
        .collect())
}

fn convert_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(value) => Cell::Text(value.clone()),
        Data::Float(value) => Cell::Number(*value),
        Data::Int(value) => Cell::Number(*value as f64),
        Data::Bool(value) => Cell::Bool(*value),
        Data::DateTime(value) => match value.as_datetime() {
            Some(datetime) => Cell::Date(datetime.date()),
            None => Cell::Number(value.as_f64()),
        },
        Data::DateTimeIso(value) | Data::DurationIso(value) => Cell::Text(value.clone()),
        Data::Error(_) => Cell::Empty,
    }
}
