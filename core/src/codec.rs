//! Small CSV helpers shared by the table, fragment and store codecs.

use crate::error::{FlagError, FlagResult};
use csv::{ReaderBuilder, StringRecord, Trim, Writer};
use std::io::Read;

pub(crate) fn reader<R: Read>(input: R) -> csv::Reader<R> {
    ReaderBuilder::new().trim(Trim::All).from_reader(input)
}

/// Flush an in-memory writer and hand back its contents.
pub(crate) fn finish(writer: Writer<Vec<u8>>) -> FlagResult<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| FlagError::Io(e.into_error()))?;
    let text = String::from_utf8(bytes).map_err(anyhow::Error::new)?;
    Ok(text)
}

pub(crate) fn position(headers: &StringRecord, name: &str) -> FlagResult<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| FlagError::MissingColumn { column: name.to_string() })
}

pub(crate) fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

pub(crate) fn field<'r>(record: &'r StringRecord, index: usize) -> FlagResult<&'r str> {
    record.get(index).ok_or_else(|| FlagError::InvalidRecord {
        line:   line_of(record),
        reason: format!("missing field {index}"),
    })
}

/// Parse a stored flag cell. Empty means "no value for this column".
/// Float spellings (`1.0`) are accepted since widened tables written by
/// other tools often carry them.
pub(crate) fn parse_flag(value: &str, line: u64) -> FlagResult<Option<bool>> {
    match value {
        "" => Ok(None),
        "1" | "true" | "True" => Ok(Some(true)),
        "0" | "false" | "False" => Ok(Some(false)),
        other => match other.parse::<f64>() {
            Ok(v) if v == 1.0 => Ok(Some(true)),
            Ok(v) if v == 0.0 => Ok(Some(false)),
            _ => Err(FlagError::InvalidRecord {
                line,
                reason: format!("'{other}' is not a flag value"),
            }),
        },
    }
}

pub(crate) fn flag_cell(value: Option<bool>) -> &'static str {
    match value {
        Some(true)  => "1",
        Some(false) => "0",
        None        => "",
    }
}
