//! SELECT planner and executor
//!
//! Key predicates are folded into a single key range plus a set of
//! disequalities; the range bounds an index scan along the leaf chain, and
//! value predicates are evaluated per tuple against the heap store. Without
//! an index the same evaluation runs over a full heap scan.

use std::io::Write;

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::exec::predicate::{self, Attr, CompOp, Predicate};
use crate::exec::table_paths;
use crate::storage::btree::{BTreeIndex, IndexCursor};
use crate::storage::pagefile::OpenMode;
use crate::storage::record::{RecordFile, RecordId};

/// What a SELECT emits per matching tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// The key column
    Key,
    /// The value column
    Value,
    /// Both columns
    All,
    /// Only the final tuple count
    Count,
}

/// Key range folded from the key predicates of a conjunction
struct KeyRange {
    min: i32,
    include_min: bool,
    max: i32,
    include_max: bool,
    ne: Vec<i32>,
}

impl KeyRange {
    fn fold(predicates: &[Predicate]) -> (KeyRange, Vec<Predicate>) {
        let mut range = KeyRange {
            min: i32::MIN,
            include_min: true,
            max: i32::MAX,
            include_max: true,
            ne: Vec::new(),
        };
        let mut residual = Vec::new();

        for pred in predicates {
            if pred.attr == Attr::Value {
                residual.push(pred.clone());
                continue;
            }
            let v = pred.key_literal();
            match pred.op {
                CompOp::Eq => {
                    if v > range.min {
                        range.min = v;
                        range.include_min = true;
                    }
                    if v < range.max {
                        range.max = v;
                        range.include_max = true;
                    }
                }
                CompOp::Ge => {
                    if v > range.min {
                        range.min = v;
                        range.include_min = true;
                    }
                }
                CompOp::Gt => {
                    if v > range.min || (v == range.min && range.include_min) {
                        range.min = v;
                        range.include_min = false;
                    }
                }
                CompOp::Le => {
                    if v < range.max {
                        range.max = v;
                        range.include_max = true;
                    }
                }
                CompOp::Lt => {
                    if v < range.max || (v == range.max && range.include_max) {
                        range.max = v;
                        range.include_max = false;
                    }
                }
                CompOp::Ne => range.ne.push(v),
            }
        }
        (range, residual)
    }

    fn is_empty(&self) -> bool {
        self.min > self.max
            || (self.min == self.max && !(self.include_min && self.include_max))
    }
}

/// Run a SELECT over `table`, writing tuples to `out`
///
/// Uses the key index when `<table>.idx` opens; otherwise falls back to a
/// full heap scan with the same predicate evaluation. Returns the matching
/// tuple count.
pub fn select<W: Write>(
    table: &str,
    projection: Projection,
    predicates: &[Predicate],
    out: &mut W,
) -> EngineResult<usize> {
    let (tbl_path, idx_path) = table_paths(table);
    let mut rf = RecordFile::open(&tbl_path, OpenMode::ReadOnly)?;

    match BTreeIndex::open(&idx_path, OpenMode::ReadOnly) {
        Ok(mut index) => indexed_scan(&mut rf, &mut index, projection, predicates, out),
        Err(EngineError::FileOpenFailed(_)) => {
            debug!(table, "no index file, falling back to heap scan");
            heap_scan(&mut rf, projection, predicates, out)
        }
        Err(err) => Err(err),
    }
}

fn indexed_scan<W: Write>(
    rf: &mut RecordFile,
    index: &mut BTreeIndex,
    projection: Projection,
    predicates: &[Predicate],
    out: &mut W,
) -> EngineResult<usize> {
    let (range, residual) = KeyRange::fold(predicates);
    if range.is_empty() {
        return finish(projection, 0, out);
    }

    let Some((mut cursor, end)) = position_cursors(index, &range)? else {
        return finish(projection, 0, out);
    };

    let mut count = 0;
    while cursor.pid != -1 && cursor != end {
        let (key, rid) = index.read_forward(&mut cursor)?;
        if range.ne.contains(&key) {
            continue;
        }

        // key-only projections need no heap access when nothing residual
        // remains to check
        if residual.is_empty()
            && matches!(projection, Projection::Key | Projection::Count)
        {
            count += 1;
            if projection == Projection::Key {
                writeln!(out, "{}", key).map_err(EngineError::FileWriteFailed)?;
            }
            continue;
        }

        let (key, value) = rf.read(rid)?;
        if !predicate::matches(key, &value, &residual) {
            continue;
        }
        count += 1;
        emit(projection, key, &value, out)?;
    }
    finish(projection, count, out)
}

/// Position the scan cursors: start at the first in-range entry, end
/// (exclusive) at the first entry past the range. `None` means the tree is
/// empty.
fn position_cursors(
    index: &mut BTreeIndex,
    range: &KeyRange,
) -> EngineResult<Option<(IndexCursor, IndexCursor)>> {
    let (mut start, _) = match index.locate(range.min) {
        Ok(located) => located,
        Err(EngineError::NoSuchRecord) => return Ok(None),
        Err(err) => return Err(err),
    };
    if !range.include_min {
        advance_past(index, &mut start, range.min)?;
    }
    index.normalize(&mut start)?;

    let (mut end, _) = index.locate(range.max)?;
    if range.include_max {
        advance_past(index, &mut end, range.max)?;
    }
    index.normalize(&mut end)?;

    Ok(Some((start, end)))
}

/// Move the cursor past every entry whose key equals `key`
fn advance_past(
    index: &mut BTreeIndex,
    cursor: &mut IndexCursor,
    key: i32,
) -> EngineResult<()> {
    loop {
        let mut probe = *cursor;
        match index.read_forward(&mut probe) {
            Ok((k, _)) if k == key => *cursor = probe,
            Ok(_) => break,
            Err(EngineError::NoSuchRecord) => {
                *cursor = probe;
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn heap_scan<W: Write>(
    rf: &mut RecordFile,
    projection: Projection,
    predicates: &[Predicate],
    out: &mut W,
) -> EngineResult<usize> {
    let mut cursor = RecordId::default();
    let mut count = 0;
    while let Some((key, value)) = rf.next(&mut cursor)? {
        if !predicate::matches(key, &value, predicates) {
            continue;
        }
        count += 1;
        emit(projection, key, &value, out)?;
    }
    finish(projection, count, out)
}

fn emit<W: Write>(
    projection: Projection,
    key: i32,
    value: &str,
    out: &mut W,
) -> EngineResult<()> {
    let result = match projection {
        Projection::Key => writeln!(out, "{}", key),
        Projection::Value => writeln!(out, "{}", value),
        Projection::All => writeln!(out, "{} '{}'", key, value),
        Projection::Count => Ok(()),
    };
    result.map_err(EngineError::FileWriteFailed)
}

fn finish<W: Write>(projection: Projection, count: usize, out: &mut W) -> EngineResult<usize> {
    if projection == Projection::Count {
        writeln!(out, "{}", count).map_err(EngineError::FileWriteFailed)?;
    }
    Ok(count)
}
