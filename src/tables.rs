use std::io::Write;

use crate::error::CamberError;

/// Header names of the independent-variable exchange file. Defaults match
/// the optimizer's stock file; every name is overridable from the
/// run-settings file.
#[derive(Debug, Clone)]
pub struct VariableColumns {
    pub name: String,
    pub current: String,
    pub initial: String,
    pub min: String,
    pub max: String,
    pub typical: String,
    pub table: String,
    pub table_row: String,
    pub table_col: String,
}

impl Default for VariableColumns {
    fn default() -> VariableColumns {
        VariableColumns {
            name: "VarName".to_string(),
            current: "X".to_string(),
            initial: "X0".to_string(),
            min: "Xmin".to_string(),
            max: "Xmax".to_string(),
            typical: "TypicalX".to_string(),
            table: "ControlPointTableID".to_string(),
            table_row: "ControlPointTableRow".to_string(),
            table_col: "ControlPointTableCol".to_string(),
        }
    }
}

/// Header names of the dependent-variable exchange file. Gradient columns
/// are `<gradient_prefix><variable name>`.
#[derive(Debug, Clone)]
pub struct FunctionColumns {
    pub kind: String,
    pub name: String,
    pub value: String,
    pub gradient_prefix: String,
}

impl Default for FunctionColumns {
    fn default() -> FunctionColumns {
        FunctionColumns {
            kind: "Type".to_string(),
            name: "Name".to_string(),
            value: "F".to_string(),
            gradient_prefix: "dFd".to_string(),
        }
    }
}

/// In-memory copy of a CSV exchange file. Row 0 is the header row; cell
/// updates re-read the file before modifying so edits from other writers
/// between calls are preserved, then rewrite the whole file.
#[derive(Debug, Clone)]
pub struct CsvTable {
    path: String,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Reads a CSV file into memory
    ///
    /// # Arguments
    /// * `path` - The path to the csv file
    ///
    /// # Returns
    /// A CsvTable with one row per non-empty line, cells trimmed
    pub fn open(path: &str) -> Result<CsvTable, CamberError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_err) => {
                return Err(CamberError::Io(format!(
                    "Unable to open csv file {}",
                    path
                )))
            }
        };

        let mut rows: Vec<Vec<String>> = Vec::new();
        for line in contents.split("\n") {
            if line.trim().is_empty() {
                continue;
            }
            rows.push(line.split(",").map(|x| x.trim().to_string()).collect());
        }

        if rows.is_empty() {
            return Err(CamberError::Io(format!(
                "Error in csv file {}: file is empty",
                path
            )));
        }

        Ok(CsvTable {
            path: path.to_string(),
            rows,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn header_index(&self, name: &str) -> Option<usize> {
        self.rows[0].iter().position(|h| h == name)
    }

    /// Resolves a header name to its column index, erroring if absent
    pub fn column(&self, name: &str) -> Result<usize, CamberError> {
        match self.header_index(name) {
            Some(index) => Ok(index),
            None => Err(CamberError::Io(format!(
                "Error in csv file {}: missing {} column",
                self.path, name
            ))),
        }
    }

    pub fn value(&self, row: usize, col: usize) -> Result<&str, CamberError> {
        match self.rows.get(row).and_then(|r| r.get(col)) {
            Some(cell) => Ok(cell.as_str()),
            None => Err(CamberError::Io(format!(
                "Error in csv file {}: no cell at row {}, column {}",
                self.path, row, col
            ))),
        }
    }

    /// Parses one cell as a float
    ///
    /// # Arguments
    /// * `row` - Absolute row index (the header row is 0)
    /// * `col` - Column index
    /// * `column_name` - Header name used in the error message
    pub fn parse_f64(&self, row: usize, col: usize, column_name: &str) -> Result<f64, CamberError> {
        let raw = self.value(row, col)?;

        match raw.parse::<f64>() {
            Ok(value) => Ok(value),
            Err(_err) => Err(CamberError::Parse(format!(
                "Non-numeric {} value '{}' in csv file {}",
                column_name, raw, self.path
            ))),
        }
    }

    /// Finds the first row whose cell in `col` equals `item`
    ///
    /// # Arguments
    /// * `col` - Column index to search
    /// * `item` - Exact cell contents to match
    ///
    /// # Returns
    /// The absolute row index (the header row is 0), or None if no row
    /// matches
    pub fn find_row(&self, col: usize, item: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.get(col).map(|cell| cell == item).unwrap_or(false))
    }

    /// Overwrites one cell and rewrites the file. The file is re-read
    /// first so cells changed by other writers since open are kept.
    ///
    /// # Arguments
    /// * `row` - Absolute row index (the header row is 0)
    /// * `col` - Column index
    /// * `value` - New cell contents
    pub fn update(&mut self, row: usize, col: usize, value: &str) -> Result<(), CamberError> {
        let fresh = CsvTable::open(&self.path)?;
        self.rows = fresh.rows;

        if row >= self.rows.len() || col >= self.rows[row].len() {
            return Err(CamberError::Io(format!(
                "Error in csv file {}: no cell at row {}, column {}",
                self.path, row, col
            )));
        }

        self.rows[row][col] = value.to_string();
        self.write()
    }

    pub fn update_f64(&mut self, row: usize, col: usize, value: f64) -> Result<(), CamberError> {
        self.update(row, col, &format!("{}", value))
    }

    /// Rewrites the file from the in-memory rows
    pub fn write(&self) -> Result<(), CamberError> {
        let mut file = match std::fs::File::create(&self.path) {
            Ok(f) => f,
            Err(err) => {
                return Err(CamberError::Io(format!(
                    "Failed to rewrite csv file {}: {err}",
                    self.path
                )));
            }
        };

        for row in &self.rows {
            file.write(format!("{}\n", row.join(",")).as_bytes())
                .unwrap();
        }

        Ok(())
    }
}

/// One control-point table CSV: `dX,dY,dZ,X,Y,Z` columns, one record per
/// table row, header on record 0. The engine exports its gradient tables
/// in the same shape, so reads share the column convention.
#[derive(Debug)]
pub struct ControlPointTable {
    csv: CsvTable,
}

impl ControlPointTable {
    pub fn open(path: &str) -> Result<ControlPointTable, CamberError> {
        Ok(ControlPointTable {
            csv: CsvTable::open(path)?,
        })
    }

    /// Maps a variable's coordinate column onto the table's delta column.
    /// Coordinate columns are 3 (X), 4 (Y), 5 (Z); the matching delta
    /// lives three columns to the left.
    pub fn delta_column(col: usize) -> Result<usize, CamberError> {
        if !(3..=5).contains(&col) {
            return Err(CamberError::Config(format!(
                "Invalid control-point column {} (expected 3..=5)",
                col
            )));
        }

        Ok(col - 3)
    }

    /// Writes a displacement into the delta cell for a variable's
    /// (row, col) address. The header row means table row r lands on CSV
    /// record r + 1.
    pub fn set_delta(&mut self, row: usize, col: usize, value: f64) -> Result<(), CamberError> {
        let delta_col = ControlPointTable::delta_column(col)?;
        self.csv.update_f64(row + 1, delta_col, value)
    }

    /// Reads the cell a variable's (row, col) address maps to under the
    /// same convention as `set_delta`
    pub fn value_at(&self, row: usize, col: usize) -> Result<f64, CamberError> {
        let delta_col = ControlPointTable::delta_column(col)?;
        self.csv
            .parse_f64(row + 1, delta_col, "control-point delta")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    fn write_table(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let result = CsvTable::open("/nonexistent/vars.csv");
        assert!(matches!(result, Err(CamberError::Io(_))));
    }

    #[test]
    fn missing_column_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(&dir, "vars.csv", "VarName,X\ncp0,0.5\n");

        let table = CsvTable::open(&path).unwrap();
        assert_eq!(table.column("X").unwrap(), 1);
        assert!(matches!(table.column("Xmin"), Err(CamberError::Io(_))));
    }

    #[test]
    fn find_row_returns_absolute_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(&dir, "deps.csv", "Type,Name,F\nObjective,CD,0\nEquality,CL,0\n");

        let table = CsvTable::open(&path).unwrap();
        let name_col = table.column("Name").unwrap();

        assert_eq!(table.find_row(name_col, "CD"), Some(1));
        assert_eq!(table.find_row(name_col, "CL"), Some(2));
        assert_eq!(table.find_row(name_col, "CM"), None);
    }

    #[test]
    fn update_round_trips_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(&dir, "deps.csv", "Type,Name,F\nObjective,CD,0\n");

        let mut table = CsvTable::open(&path).unwrap();
        table.update_f64(1, 2, 0.02543).unwrap();

        let reread = CsvTable::open(&path).unwrap();
        assert_relative_eq!(reread.parse_f64(1, 2, "F").unwrap(), 0.02543);
    }

    #[test]
    fn update_keeps_out_of_band_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(&dir, "deps.csv", "Type,Name,F\nObjective,CD,0\nEquality,CL,0\n");

        let mut table = CsvTable::open(&path).unwrap();

        // another writer changes CL's value after we opened the file
        std::fs::write(&path, "Type,Name,F\nObjective,CD,0\nEquality,CL,0.31\n").unwrap();

        table.update(1, 2, "0.02").unwrap();

        let reread = CsvTable::open(&path).unwrap();
        assert_eq!(reread.value(1, 2).unwrap(), "0.02");
        assert_eq!(reread.value(2, 2).unwrap(), "0.31");
    }

    #[test]
    fn malformed_number_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(&dir, "vars.csv", "VarName,X\ncp0,zero\n");

        let table = CsvTable::open(&path).unwrap();
        let result = table.parse_f64(1, 1, "X");

        match result {
            Err(CamberError::Parse(message)) => {
                assert!(message.contains("X"));
                assert!(message.contains("zero"));
            }
            other => panic!("expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn set_delta_lands_on_record_and_delta_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(
            &dir,
            "upper.csv",
            "dX,dY,dZ,X,Y,Z\n0,0,0,1.0,0.1,0\n0,0,0,1.5,0.2,0\n0,0,0,2.0,0.3,0\n",
        );

        let mut table = ControlPointTable::open(&path).unwrap();
        // table row 2, coordinate column 4 (Y) -> CSV record 2, delta column 1
        table.set_delta(2, 4, 0.005).unwrap();

        let reread = CsvTable::open(&path).unwrap();
        assert_eq!(reread.value(3, 1).unwrap(), "0.005");
        // neighbors untouched
        assert_eq!(reread.value(3, 0).unwrap(), "0");
        assert_eq!(reread.value(2, 1).unwrap(), "0");
    }

    #[test]
    fn coordinate_column_outside_range_is_config_error() {
        assert!(matches!(
            ControlPointTable::delta_column(2),
            Err(CamberError::Config(_))
        ));
        assert!(matches!(
            ControlPointTable::delta_column(6),
            Err(CamberError::Config(_))
        ));
        assert_eq!(ControlPointTable::delta_column(3).unwrap(), 0);
        assert_eq!(ControlPointTable::delta_column(5).unwrap(), 2);
    }
}
