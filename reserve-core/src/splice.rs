//! Structural edits: inserting and deleting fixed records inside an array.
//!
//! Records always enter at the head of their array. Each edit validates
//! everything it is going to touch before the first byte is written, then
//! bumps the array counter, shifts header and tree offsets, splices the
//! payload, and mirrors the change in the array's child list.

use tracing::debug;

use crate::buffer::{check_range, insert_bytes, read_u32, remove_bytes, write_u32};
use crate::propagate::{propagate, propagate_header};
use crate::record::{FixedRecord, RecordView, RECORD_SIZE};
use crate::value::{ParsedTree, Value, ValuePath};
use crate::{ReserveError, Result};

/// Offset of the element count within an array descriptor.
const COUNT_FIELD: usize = 8;
/// Offset of the format version word in the payload header.
const VERSION_FIELD: usize = 4;
/// Version loaders accept after records were added or removed.
const EDITED_VERSION: u32 = 3;

/// What a structural edit did to the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splice {
    /// Payload position the record was inserted at or removed from.
    pub position: usize,
    pub delta: i64,
    /// Element count written to the array descriptor.
    pub new_count: u32,
}

/// Inserts `record` at the head of the array at `array_path`.
///
/// The array's current head element provides the node shape for the new
/// entry; empty arrays are rejected.
pub fn insert_record(
    payload: &mut Vec<u8>,
    tree: &mut ParsedTree,
    array_path: &ValuePath,
    record: &FixedRecord,
) -> Result<Splice> {
    let bytes = record.to_bytes();
    let delta = bytes.len() as i64;

    let array = resolve_array(&tree.root, array_path)?;
    let head = array
        .elements()
        .and_then(|items| items.first())
        .ok_or_else(|| ReserveError::NotFound(format!("no record at the head of {array_path} to insert before")))?;
    let position = head.data_offset as usize;
    let count_position = array.info_offset as usize + COUNT_FIELD;
    let count = read_u32(payload, count_position)?;
    check_range(payload, position, 0)?;
    check_range(payload, VERSION_FIELD, 4)?;

    let mut new_node = head.clone();
    RecordView::apply(&mut new_node, record)?;

    let new_count = count
        .checked_add(1)
        .ok_or_else(|| ReserveError::Schema(format!("element count of {array_path} overflows")))?;

    let mut shifted_meta = tree.meta.clone();
    let mut shifted_root = tree.root.clone();
    let mut scratch = payload.clone();
    debug!(offset = count_position, from = count, to = new_count, "updating array length");
    write_u32(&mut scratch, count_position, new_count)?;
    propagate_header(&mut shifted_meta, delta, &mut scratch)?;
    propagate(&mut shifted_root, delta, position as u32, &mut scratch)?;

    debug!(offset = position, len = bytes.len(), "writing record");
    insert_bytes(&mut scratch, position, &bytes)?;
    write_u32(&mut scratch, VERSION_FIELD, EDITED_VERSION)?;

    let items = shifted_root
        .get_mut(array_path)
        .and_then(Value::elements_mut)
        .ok_or_else(|| ReserveError::Schema(format!("{array_path} vanished during propagation")))?;
    items.insert(0, new_node);

    *payload = scratch;
    tree.meta = shifted_meta;
    tree.root = shifted_root;

    Ok(Splice {
        position,
        delta,
        new_count,
    })
}

/// Removes the record at `victim` from the array at `array_path`.
///
/// The victim is re-encoded from its tree values and compared with the live
/// payload bytes first; a mismatch means the tree no longer describes the
/// payload and nothing is changed. The in-memory child list drops its head
/// entry, so callers pick victims at the head of the array.
pub fn remove_record(
    payload: &mut Vec<u8>,
    tree: &mut ParsedTree,
    array_path: &ValuePath,
    victim: usize,
) -> Result<Splice> {
    let array = resolve_array(&tree.root, array_path)?;
    let node = array
        .elements()
        .and_then(|items| items.get(victim))
        .ok_or_else(|| ReserveError::NotFound(format!("no record {victim} in {array_path}")))?;
    let record = RecordView::read(node)?;
    let bytes = record.to_bytes();
    let delta = -(bytes.len() as i64);
    let position = node.data_offset as usize;

    check_range(payload, position, RECORD_SIZE)?;
    if payload[position..position + RECORD_SIZE] != bytes {
        return Err(ReserveError::Consistency { offset: position });
    }

    let count_position = array.info_offset as usize + COUNT_FIELD;
    let count = read_u32(payload, count_position)?;
    let new_count = count
        .checked_sub(1)
        .ok_or_else(|| ReserveError::Schema(format!("{array_path} already records zero elements")))?;
    check_range(payload, VERSION_FIELD, 4)?;

    let mut shifted_meta = tree.meta.clone();
    let mut shifted_root = tree.root.clone();
    let mut scratch = payload.clone();
    debug!(offset = count_position, from = count, to = new_count, "updating array length");
    write_u32(&mut scratch, count_position, new_count)?;
    propagate_header(&mut shifted_meta, delta, &mut scratch)?;
    propagate(&mut shifted_root, delta, position as u32, &mut scratch)?;

    debug!(offset = position, len = bytes.len(), "deleting record");
    remove_bytes(&mut scratch, position, RECORD_SIZE)?;
    write_u32(&mut scratch, VERSION_FIELD, EDITED_VERSION)?;

    if let Some(items) = shifted_root.get_mut(array_path).and_then(Value::elements_mut) {
        if !items.is_empty() {
            items.remove(0);
        }
    }

    *payload = scratch;
    tree.meta = shifted_meta;
    tree.root = shifted_root;

    Ok(Splice {
        position,
        delta,
        new_count,
    })
}

fn resolve_array<'a>(root: &'a Value, path: &ValuePath) -> Result<&'a Value> {
    let node = root
        .get(path)
        .ok_or_else(|| ReserveError::NotFound(format!("no value at {path}")))?;
    match node.elements() {
        Some(_) => Ok(node),
        None => Err(ReserveError::Schema(format!("{path} is not an array"))),
    }
}
