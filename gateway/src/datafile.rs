//! Plates data files
//!
//! Comma-delimited, one plate per line, header on the first line:
//!
//! ```text
//! plate,well,runtime,optical_density,run,corrected_optical_density
//! 1,A1,10,0.5,R1,0.45
//! ```
//!
//! Fields may be double-quoted, in which case they can hold commas and `""` stands
//! for a literal quote. Empty or missing columns become zero values. A number that
//! does not parse is an error naming the line.

use crate::error::{PlatesError, Result};
use crate::record::Record;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Read every plate from a data file
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    let path = path.as_ref();
    info!(file = %path.display(), "Reading plates file");

    let contents = std::fs::read_to_string(path)?;
    parse_records(&contents)
}

/// Parse plates from the text of a data file
pub fn parse_records(contents: &str) -> Result<Vec<Record>> {
    contents
        .lines()
        .enumerate()
        // header
        .skip(1)
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| parse_line(i + 1, line))
        .collect()
}

fn parse_line(line_no: usize, line: &str) -> Result<Record> {
    let columns = split_fields(line_no, line)?;
    let column = |i: usize| columns.get(i).map(|c| c.trim()).unwrap_or("");

    Ok(Record::new(
        number(line_no, "plate", column(0))?,
        column(1),
        number(line_no, "runtime", column(2))?,
        number(line_no, "optical_density", column(3))?,
        column(4),
        number(line_no, "corrected_optical_density", column(5))?,
    ))
}

fn split_fields(line_no: usize, line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            // opening quote, only leading whitespace may precede it
            '"' if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }

    if in_quotes {
        return Err(PlatesError::DataFile {
            line: line_no,
            message: "unterminated quoted field".to_string(),
        });
    }
    fields.push(field);
    Ok(fields)
}

fn number<T>(line: usize, name: &str, raw: &str) -> Result<T>
where
    T: FromStr + Default,
    T::Err: std::fmt::Display,
{
    if raw.is_empty() {
        return Ok(T::default());
    }
    raw.parse().map_err(|e| PlatesError::DataFile {
        line,
        message: format!("invalid {name} '{raw}': {e}"),
    })
}
