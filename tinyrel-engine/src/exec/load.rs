//! LOAD driver
//!
//! Streams a CSV load file into a table, appending each record to the heap
//! store and, when requested, inserting its key into the B+ tree index with
//! the record id the append returned.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::exec::predicate::atoi;
use crate::exec::table_paths;
use crate::storage::btree::BTreeIndex;
use crate::storage::pagefile::OpenMode;
use crate::storage::record::RecordFile;

/// Load `file` into `table`, optionally building its key index
///
/// Returns the number of records loaded. Blank lines are skipped; a
/// non-blank line without a comma is an `InvalidFileFormat` error.
pub fn load(table: &str, file: &Path, with_index: bool) -> EngineResult<usize> {
    let (tbl_path, idx_path) = table_paths(table);
    let mut rf = RecordFile::open(&tbl_path, OpenMode::ReadWrite)?;
    let mut index = if with_index {
        Some(BTreeIndex::open(&idx_path, OpenMode::ReadWrite)?)
    } else {
        None
    };

    let reader = BufReader::new(File::open(file).map_err(EngineError::FileOpenFailed)?);
    let mut rows = 0;
    for line in reader.lines() {
        let line = line.map_err(EngineError::FileReadFailed)?;
        if line.trim().is_empty() {
            continue;
        }
        let (key, value) = parse_load_line(&line)?;
        let rid = rf.append(key, &value)?;
        if let Some(index) = index.as_mut() {
            index.insert(key, rid)?;
        }
        rows += 1;
    }

    if let Some(index) = index.as_mut() {
        index.close()?;
    }
    debug!(table, rows, with_index, "load complete");
    Ok(rows)
}

/// Parse one load line: `<ws>* <integer> <ws>* , <ws>* [quote] <value>`
///
/// The value may be delimited by `'` or `"`; unquoted values run to the end
/// of the line, and a missing value is the empty string.
pub fn parse_load_line(line: &str) -> EngineResult<(i32, String)> {
    let s = line.trim_start_matches([' ', '\t']);
    let key = atoi(s);

    let Some(comma) = s.find(',') else {
        return Err(EngineError::InvalidFileFormat(format!(
            "no comma in load line: {:?}",
            line
        )));
    };

    let rest = s[comma + 1..].trim_start_matches([' ', '\t']);
    if rest.is_empty() {
        return Ok((key, String::new()));
    }

    let value = match rest.as_bytes()[0] {
        quote @ (b'\'' | b'"') => {
            let body = &rest[1..];
            match body.find(quote as char) {
                Some(end) => &body[..end],
                None => body,
            }
        }
        _ => rest,
    };
    Ok((key, value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::exec::predicate::{Attr, CompOp, Predicate};
    use crate::exec::select::{select, Projection};

    fn key_pred(op: CompOp, literal: &str) -> Predicate {
        Predicate {
            attr: Attr::Key,
            op,
            literal: literal.to_string(),
        }
    }

    fn write_csv(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("load.csv");
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_quoted_values() {
        assert_eq!(
            parse_load_line("1,'hello'").unwrap(),
            (1, "hello".to_string())
        );
        assert_eq!(
            parse_load_line("2, \"world\"").unwrap(),
            (2, "world".to_string())
        );
        // an unterminated quote runs to end of line
        assert_eq!(
            parse_load_line("3,'open").unwrap(),
            (3, "open".to_string())
        );
    }

    #[test]
    fn test_parse_bare_and_empty_values() {
        assert_eq!(parse_load_line("4,plain").unwrap(), (4, "plain".to_string()));
        assert_eq!(parse_load_line("5,").unwrap(), (5, String::new()));
        assert_eq!(parse_load_line("6,   ").unwrap(), (6, String::new()));
    }

    #[test]
    fn test_parse_whitespace_and_junk_keys() {
        assert_eq!(
            parse_load_line("  \t 7 , 'x'").unwrap(),
            (7, "x".to_string())
        );
        // atoi semantics: digits up to the first non-digit
        assert_eq!(parse_load_line("12abc,'y'").unwrap(), (12, "y".to_string()));
        assert_eq!(parse_load_line("-3,'z'").unwrap(), (-3, "z".to_string()));
    }

    #[test]
    fn test_parse_missing_comma_is_invalid() {
        assert!(matches!(
            parse_load_line("42 no comma here"),
            Err(EngineError::InvalidFileFormat(_))
        ));
    }

    #[test]
    fn test_load_then_select_through_index() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(&dir, "1,'a'\n2,'b'\n3,'c'\n");
        let table = dir.path().join("movies").to_str().unwrap().to_string();

        let rows = load(&table, &csv, true).unwrap();
        assert_eq!(rows, 3);

        let preds = [key_pred(CompOp::Eq, "2")];
        let mut out = Vec::new();
        let count = select(&table, Projection::All, &preds, &mut out).unwrap();
        assert_eq!(count, 1);
        assert_eq!(String::from_utf8(out).unwrap(), "2 'b'\n");
    }

    #[test]
    fn test_load_without_index_uses_heap_scan() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(&dir, "10,ten\n20,twenty\n");
        let table = dir.path().join("nums").to_str().unwrap().to_string();

        load(&table, &csv, false).unwrap();

        let mut out = Vec::new();
        let count = select(&table, Projection::Key, &[], &mut out).unwrap();
        assert_eq!(count, 2);
        assert_eq!(String::from_utf8(out).unwrap(), "10\n20\n");
    }

    #[test]
    fn test_load_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(&dir, "1,'a'\n\n2,'b'\n\n");
        let table = dir.path().join("t").to_str().unwrap().to_string();

        assert_eq!(load(&table, &csv, true).unwrap(), 2);
    }

    #[test]
    fn test_load_rejects_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(&dir, "1,'a'\nbroken line\n");
        let table = dir.path().join("t").to_str().unwrap().to_string();

        let err = load(&table, &csv, true).unwrap_err();
        assert_eq!(err.code(), -6);
    }

    #[test]
    fn test_load_large_file_survives_splits() {
        let dir = tempfile::tempdir().unwrap();
        let mut contents = String::new();
        for key in 0..500 {
            contents.push_str(&format!("{},'val{}'\n", key, key));
        }
        let csv = write_csv(&dir, &contents);
        let table = dir.path().join("big").to_str().unwrap().to_string();

        assert_eq!(load(&table, &csv, true).unwrap(), 500);

        let preds = [
            key_pred(CompOp::Ge, "100"),
            key_pred(CompOp::Lt, "110"),
        ];
        let mut out = Vec::new();
        let count = select(&table, Projection::Count, &preds, &mut out).unwrap();
        assert_eq!(count, 10);
        assert_eq!(String::from_utf8(out).unwrap(), "10\n");
    }
}
