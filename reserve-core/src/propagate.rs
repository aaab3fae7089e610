//! Shifting offsets and sizes after a change in payload length.
//!
//! Both walks run against copies first and collect the buffer writes they
//! need. Every write is bounds-checked before the first byte changes, so a
//! failed propagation leaves tree, metadata and buffer as they were.

use std::collections::BTreeMap;
use tracing::debug;

use crate::buffer::{check_range, read_u32, shift_offset, write_u32};
use crate::value::{ContainerMeta, HeaderField, Value};
use crate::Result;

/// Pending u32 writes keyed by buffer position. Later reads of a position
/// see the pending value, matching a walk that writes as it goes.
#[derive(Default)]
struct Patches(BTreeMap<usize, u32>);

impl Patches {
    fn read(&self, buf: &[u8], position: usize) -> Result<u32> {
        match self.0.get(&position) {
            Some(v) => Ok(*v),
            None => read_u32(buf, position),
        }
    }

    fn write(&mut self, position: usize, value: u32) {
        self.0.insert(position, value);
    }

    fn apply(self, buf: &mut [u8]) -> Result<()> {
        for &position in self.0.keys() {
            check_range(buf, position, 4)?;
        }
        for (position, value) in self.0 {
            write_u32(buf, position, value)?;
        }
        Ok(())
    }
}

/// Shifts every offset after `reference` by `delta`.
///
/// A node whose payload starts past `reference` moves by `delta`; when it is
/// addressed through a separate descriptor, the pointer stored at its
/// `info_offset` is rewritten too. Children are only visited when the node's
/// (shifted) `data_offset` differs from `reference`, so the node being edited
/// keeps its subtree as is.
pub fn propagate(node: &mut Value, delta: i64, reference: u32, buf: &mut [u8]) -> Result<()> {
    let mut shifted = node.clone();
    let mut patches = Patches::default();
    walk(&mut shifted, delta, reference, buf, &mut patches)?;
    debug!(
        reference,
        delta,
        pointers = patches.0.len(),
        "updating offsets larger than reference"
    );
    patches.apply(buf)?;
    *node = shifted;
    Ok(())
}

fn walk(node: &mut Value, delta: i64, reference: u32, buf: &[u8], patches: &mut Patches) -> Result<()> {
    if node.data_offset > reference {
        if node.data_offset != node.info_offset {
            let position = node.info_offset as usize;
            let current = patches.read(buf, position)?;
            patches.write(position, shift_offset(current, delta));
        }
        node.data_offset = shift_offset(node.data_offset, delta);
    }
    if node.info_offset > reference {
        node.info_offset = shift_offset(node.info_offset, delta);
    }
    if node.data_offset != reference {
        for child in node.children_mut() {
            walk(child, delta, reference, buf, patches)?;
        }
    }
    Ok(())
}

/// Shifts the container's table offsets and sizes by `delta`.
///
/// Stored values of zero mark unused tables and are never rewritten in the
/// buffer. A missing string-hash table also stays zero in memory.
pub fn propagate_header(meta: &mut ContainerMeta, delta: i64, buf: &mut [u8]) -> Result<()> {
    debug!(delta, "updating file header offsets");
    let mut patches = Patches::default();
    let fields = [
        meta.instance_offset,
        meta.typedef_offset,
        meta.stringhash_offset,
        meta.nametable_offset,
        meta.total_size,
        meta.root_instance_size,
    ];
    for field in fields {
        if field.value > 0 {
            patches.write(field.position, shift_offset(field.value, delta));
        }
    }
    patches.apply(buf)?;

    let shift = |field: &mut HeaderField| field.value = shift_offset(field.value, delta);
    shift(&mut meta.instance_offset);
    shift(&mut meta.typedef_offset);
    if meta.stringhash_offset.value != 0 {
        shift(&mut meta.stringhash_offset);
    }
    shift(&mut meta.nametable_offset);
    shift(&mut meta.total_size);
    shift(&mut meta.root_instance_size);
    // The instance table sits after the data region, so the size field moves
    // with the payload.
    meta.root_instance_size.position = shift_offset(meta.root_instance_size.position as u32, delta) as usize;
    Ok(())
}
