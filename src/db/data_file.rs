//! Seed data files.
//!
//! A data file is delimited text: the first record names the columns (by
//! field name), each following record is one row. Values may be wrapped in
//! double quotes, with `""` standing for a literal quote inside them; quoted
//! values may contain the separator and line breaks. An empty unquoted value
//! loads as NULL.

use crate::error::{DirectoryError, DirectoryResult};
use std::path::Path;

/// One parsed value: `None` is an empty unquoted cell.
pub type Cell = Option<String>;

/// Header plus rows of a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl DataFile {
    /// Read and parse a data file.
    pub fn read(path: impl AsRef<Path>, separator: char) -> DirectoryResult<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| DirectoryError::io(&display, e))?;
        Self::parse(&content, separator).map_err(|e| DirectoryError::io(display, e))
    }

    /// Parse data file content.
    pub fn parse(content: &str, separator: char) -> Result<Self, String> {
        let mut records = parse_records(content, separator)?.into_iter();
        let header: Vec<String> = match records.next() {
            Some(header) => header
                .into_iter()
                .map(|cell| cell.unwrap_or_default().trim().to_string())
                .collect(),
            None => return Err("data file is empty".to_string()),
        };
        if header.iter().any(String::is_empty) {
            return Err("data file header contains an empty column name".to_string());
        }

        let mut rows = Vec::new();
        for (line, record) in records.enumerate() {
            if record.len() != header.len() {
                return Err(format!(
                    "record {} has {} values, header has {}",
                    line + 2,
                    record.len(),
                    header.len()
                ));
            }
            rows.push(record);
        }
        Ok(Self { header, rows })
    }
}

fn parse_records(content: &str, separator: char) -> Result<Vec<Vec<Cell>>, String> {
    let mut records = Vec::new();
    let mut record: Vec<Cell> = Vec::new();
    let mut value = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    value.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                value.push(c);
            }
            continue;
        }
        match c {
            '"' if value.is_empty() && !quoted => {
                quoted = true;
                in_quotes = true;
            }
            c if c == separator => {
                record.push(take_cell(&mut value, &mut quoted));
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                end_record(&mut records, &mut record, &mut value, &mut quoted);
            }
            c => value.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted value".to_string());
    }
    end_record(&mut records, &mut record, &mut value, &mut quoted);
    Ok(records)
}

fn take_cell(value: &mut String, quoted: &mut bool) -> Cell {
    let cell = if value.is_empty() && !*quoted {
        None
    } else {
        Some(std::mem::take(value))
    };
    *quoted = false;
    cell
}

fn end_record(
    records: &mut Vec<Vec<Cell>>,
    record: &mut Vec<Cell>,
    value: &mut String,
    quoted: &mut bool,
) {
    // blank lines are skipped
    if record.is_empty() && value.is_empty() && !*quoted {
        return;
    }
    record.push(take_cell(value, quoted));
    records.push(std::mem::take(record));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_and_rows() {
        let file = DataFile::parse("username,password\nAdministrator,secret\njdoe,\n", ',').unwrap();
        assert_eq!(file.header, vec!["username", "password"]);
        assert_eq!(
            file.rows,
            vec![
                vec![Some("Administrator".to_string()), Some("secret".to_string())],
                vec![Some("jdoe".to_string()), None],
            ]
        );
    }

    #[test]
    fn test_quoted_values() {
        let file = DataFile::parse("id;label\n1;\"a;b \"\"c\"\"\"\n2;\"\"\n", ';').unwrap();
        assert_eq!(file.rows[0][1].as_deref(), Some("a;b \"c\""));
        // quoted empty string is not NULL
        assert_eq!(file.rows[1][1].as_deref(), Some(""));
    }

    #[test]
    fn test_quoted_line_break_and_crlf() {
        let file = DataFile::parse("id,note\r\n1,\"two\nlines\"\r\n\r\n", ',').unwrap();
        assert_eq!(file.rows.len(), 1);
        assert_eq!(file.rows[0][1].as_deref(), Some("two\nlines"));
    }

    #[test]
    fn test_errors() {
        assert!(DataFile::parse("", ',').is_err());
        assert!(DataFile::parse("a,b\n1\n", ',').unwrap_err().contains("record 2"));
        assert!(DataFile::parse("a\n\"open\n", ',').unwrap_err().contains("unterminated"));
        assert!(DataFile::parse("a,,b\n", ',').unwrap_err().contains("empty column name"));
    }

    #[test]
    fn test_read_missing_file() {
        let err = DataFile::read("/nonexistent/users.csv", ',').unwrap_err();
        assert!(matches!(err, DirectoryError::Io { .. }));
    }
}
