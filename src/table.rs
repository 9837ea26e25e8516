//! Typed sheet model produced by workbook extraction.
//!
//! A [`Sheet`] is a rectangle of named columns; every cell carries its
//! declared type so later analysis passes can dispatch on a
//! [`ColumnKind`] instead of re-probing values.

use chrono::NaiveDate;

/// A single cell, tagged with the type declared by the source format.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Empty,
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Column type assigned once during the structure pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Date,
    Text,
}

/// A named column of cells.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub cells: Vec<CellValue>,
}

impl Column {
    pub fn new(name: impl Into<String>, cells: Vec<CellValue>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    /// Classify the column from its declared cell types: numeric when all
    /// non-empty cells are numbers, date when a majority of non-empty
    /// cells parse as calendar dates, text otherwise. Empty columns are
    /// text.
    pub fn kind(&self) -> ColumnKind {
        let mut numbers = 0usize;
        let mut dates = 0usize;
        let mut filled = 0usize;
        for cell in &self.cells {
            match cell {
                CellValue::Number(_) => {
                    numbers += 1;
                    filled += 1;
                }
                CellValue::Text(s) => {
                    if parse_date(s).is_some() {
                        dates += 1;
                    }
                    filled += 1;
                }
                CellValue::Empty => {}
            }
        }
        if filled == 0 {
            ColumnKind::Text
        } else if numbers == filled {
            ColumnKind::Numeric
        } else if dates * 2 > filled {
            ColumnKind::Date
        } else {
            ColumnKind::Text
        }
    }

    /// Non-missing numeric values in row order.
    pub fn numeric_values(&self) -> Vec<f64> {
        self.cells.iter().filter_map(CellValue::as_number).collect()
    }

    pub fn is_fully_empty(&self) -> bool {
        self.cells.iter().all(CellValue::is_empty)
    }
}

/// A rectangular sheet: equally long columns under a sheet name.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn row_count(&self) -> usize {
        self.columns.iter().map(|c| c.cells.len()).max().unwrap_or(0)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.row_count() == 0
    }

    /// Drop fully-empty rows and fully-empty columns, preserving order.
    pub fn compact(mut self) -> Sheet {
        let rows = self.row_count();
        let keep_row: Vec<bool> = (0..rows)
            .map(|r| {
                self.columns
                    .iter()
                    .any(|c| c.cells.get(r).map(|v| !v.is_empty()).unwrap_or(false))
            })
            .collect();

        for col in &mut self.columns {
            col.cells = col
                .cells
                .iter()
                .enumerate()
                .filter(|(r, _)| keep_row[*r])
                .map(|(_, v)| v.clone())
                .collect();
        }
        self.columns.retain(|c| !c.is_fully_empty());
        self
    }

    /// Values from two columns paired row-wise where both are numeric.
    pub fn paired_numeric(&self, a: usize, b: usize) -> (Vec<f64>, Vec<f64>) {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        let ca = &self.columns[a];
        let cb = &self.columns[b];
        for r in 0..self.row_count() {
            if let (Some(CellValue::Number(x)), Some(CellValue::Number(y))) =
                (ca.cells.get(r), cb.cells.get(r))
            {
                xs.push(*x);
                ys.push(*y);
            }
        }
        (xs, ys)
    }
}

/// Lenient calendar-date parse for cell classification.
fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d.%m.%Y"))
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(v: f64) -> CellValue {
        CellValue::Number(v)
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn column_kinds() {
        let numeric = Column::new("Sales", vec![num(1.0), CellValue::Empty, num(2.0)]);
        assert_eq!(numeric.kind(), ColumnKind::Numeric);

        let dates = Column::new(
            "Period",
            vec![text("2024-01-31"), text("2024-02-29"), text("notes")],
        );
        assert_eq!(dates.kind(), ColumnKind::Date);

        let labels = Column::new("Quarter", vec![text("Q1"), text("Q2")]);
        assert_eq!(labels.kind(), ColumnKind::Text);

        let mixed = Column::new("Mixed", vec![num(1.0), text("n/a")]);
        assert_eq!(mixed.kind(), ColumnKind::Text);
    }

    #[test]
    fn compact_drops_empty_rows_and_columns() {
        let sheet = Sheet::new(
            "S",
            vec![
                Column::new("A", vec![num(1.0), CellValue::Empty, num(3.0)]),
                Column::new("B", vec![CellValue::Empty; 3]),
                Column::new("C", vec![text("x"), CellValue::Empty, text("z")]),
            ],
        )
        .compact();

        assert_eq!(sheet.column_count(), 2);
        assert_eq!(sheet.row_count(), 2);
        assert_eq!(sheet.columns[0].numeric_values(), vec![1.0, 3.0]);
    }

    #[test]
    fn paired_numeric_skips_incomplete_rows() {
        let sheet = Sheet::new(
            "S",
            vec![
                Column::new("A", vec![num(1.0), num(2.0), CellValue::Empty]),
                Column::new("B", vec![num(10.0), CellValue::Empty, num(30.0)]),
            ],
        );
        let (xs, ys) = sheet.paired_numeric(0, 1);
        assert_eq!(xs, vec![1.0]);
        assert_eq!(ys, vec![10.0]);
    }
}
