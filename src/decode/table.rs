//! Column tables.
//!
//! ```text
//! | ID  | RLOC16 | Timeout    | Age        | LQ In |R|D|N| Extended MAC     |
//! +-----+--------+------------+------------+-------+-+-+-+------------------+
//! |   1 | 0xc801 |        240 |         24 |     3 |1|0|0| 4ecede68435358ac |
//! ```

use std::collections::BTreeMap;

use super::content;
use crate::error::ParseSkipped;

const DECODER: &str = "table";

/// One data row, keyed by column header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    fields: BTreeMap<String, String>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// Column parsed as a decimal integer.
    pub fn int(&self, column: &str) -> Option<i64> {
        self.get(column)?.parse().ok()
    }

    /// Column parsed as hex, with or without a `0x` prefix.
    pub fn hex(&self, column: &str) -> Option<u64> {
        let value = self.get(column)?;
        let digits = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);
        u64::from_str_radix(digits, 16).ok()
    }

    /// Column parsed as a `0`/`1` or `true`/`false` flag.
    pub fn flag(&self, column: &str) -> Option<bool> {
        match self.get(column)? {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        }
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn remove(&mut self, column: &str) -> Option<String> {
        self.fields.remove(column)
    }
}

/// A decoded table: headers in display order and rows in output order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn decode<S: AsRef<str>>(lines: &[S]) -> Table {
        let mut table = Table::default();
        let mut have_header = false;

        for line in content(lines) {
            if is_separator(line) {
                continue;
            }
            let Some(cells) = split_row(line) else {
                ParseSkipped::new(DECODER, line, "not a table row").log();
                continue;
            };

            if !have_header {
                table.headers = cells;
                have_header = true;
                continue;
            }

            if cells.len() != table.headers.len() {
                ParseSkipped::new(
                    DECODER,
                    line,
                    format!("{} cells for {} columns", cells.len(), table.headers.len()),
                )
                .log();
                continue;
            }

            let fields = table.headers.iter().cloned().zip(cells).collect();
            table.rows.push(Row { fields });
        }

        table
    }

    /// Rows keyed by their first column parsed as an integer. The key column
    /// is removed from each row.
    pub fn keyed<S: AsRef<str>>(lines: &[S]) -> BTreeMap<u32, Row> {
        let table = Table::decode(lines);
        let Some(key_column) = table.headers.first() else {
            return BTreeMap::new();
        };

        let mut keyed = BTreeMap::new();
        for mut row in table.rows {
            let Some(raw) = row.remove(key_column) else {
                continue;
            };
            match raw.parse::<u32>() {
                Ok(key) => {
                    keyed.insert(key, row);
                }
                Err(_) => ParseSkipped::new(DECODER, &raw, format!("{key_column} is not an integer")).log(),
            }
        }
        keyed
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl IntoIterator for Table {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// A rule line such as `+----+----+`. A row of empty cells is not one.
fn is_separator(line: &str) -> bool {
    line.contains(['-', '='])
        && line.chars().all(|c| matches!(c, '+' | '-' | '|' | '=' | ' '))
}

fn split_row(line: &str) -> Option<Vec<String>> {
    let inner = line.strip_prefix('|')?.strip_suffix('|')?;
    Some(inner.split('|').map(|cell| cell.trim().to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHILD_TABLE: &[&str] = &[
        "| ID  | RLOC16 | Timeout    | Age        | LQ In | C_VN |R|D|N|Ver|CSL|QMsgCnt|Suprvsn| Extended MAC     |",
        "+-----+--------+------------+------------+-------+------+-+-+-+---+---+-------+-------+------------------+",
        "|   1 | 0xc801 |        240 |         24 |     3 |  131 |1|0|0|  3| 0 |     0 |   129 | 4ecede68435358ac |",
        "|   2 | 0xc802 |        240 |          2 |     3 |  131 |0|0|0|  3| 1 |     0 |     0 | a672a601d2ce37d8 |",
    ];

    #[test]
    fn test_two_column_table_keyed() {
        let lines = ["| ID | RLOC16 |", "+----+--------+", "| 1  | 0xc801 |"];
        let keyed = Table::keyed(&lines);

        assert_eq!(keyed.len(), 1);
        let row = &keyed[&1];
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("RLOC16"), Some("0xc801"));
        assert_eq!(row.hex("RLOC16"), Some(0xc801));
    }

    #[test]
    fn test_child_table_accessors() {
        let table = Table::decode(CHILD_TABLE);
        assert_eq!(table.headers().len(), 14);
        assert_eq!(table.len(), 2);

        let first = &table.rows()[0];
        assert_eq!(first.int("ID"), Some(1));
        assert_eq!(first.int("Timeout"), Some(240));
        assert_eq!(first.flag("R"), Some(true));
        assert_eq!(first.flag("D"), Some(false));
        assert_eq!(first.get("Extended MAC"), Some("4ecede68435358ac"));

        let second = &table.rows()[1];
        assert_eq!(second.flag("CSL"), Some(true));
        assert_eq!(second.hex("RLOC16"), Some(0xc802));
    }

    #[test]
    fn test_mismatched_rows_are_skipped() {
        let lines = [
            "| ID | RLOC16 |",
            "+----+--------+",
            "| 1  | 0xc801 | extra |",
            "garbage",
            "| 2  | 0xc802 |",
        ];
        let keyed = Table::keyed(&lines);
        assert_eq!(keyed.keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_row_of_empty_cells_is_kept() {
        let lines = [
            "| Name | Value |",
            "+------+-------+",
            "|      |       |",
            "| a    | 1     |",
        ];
        let table = Table::decode(&lines);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].get("Name"), Some(""));
        assert_eq!(table.rows()[1].int("Value"), Some(1));
    }

    #[test]
    fn test_empty_input() {
        let lines: [&str; 0] = [];
        assert!(Table::decode(&lines).is_empty());
        assert!(Table::keyed(&lines).is_empty());
        assert!(Table::decode(&["", "   "]).is_empty());
    }

    #[test]
    fn test_header_only() {
        let table = Table::decode(&["| Prefix | Flags |", "+========+=======+"]);
        assert_eq!(table.headers(), ["Prefix", "Flags"]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_decode_is_idempotent() {
        assert_eq!(Table::decode(CHILD_TABLE), Table::decode(CHILD_TABLE));
        assert_eq!(Table::keyed(CHILD_TABLE), Table::keyed(CHILD_TABLE));
    }
}
