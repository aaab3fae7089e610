//! A miniature population container for tests.
//!
//! Layout of the payload:
//!
//! ```text
//! 0   magic " FDA", version u32
//! 8   instance table offset, 12 typedef offset, 16 string-hash offset (0),
//!     20 name table offset, 24 total size
//! 64  root instance: `Groups` descriptor [ptr, flags, count, 0]
//! 80  one 16-byte `Animals` descriptor per group
//! ..  records, group after group
//! T   instance table entry [name, type, offset, size], typedef (8 bytes),
//!     name table (8 bytes)
//! ```

use crate::buffer::read_u32;
use crate::container::{DecompressedContainer, FILE_HEADER_LEN, MARKER_LEN};
use crate::record::{FixedRecord, Gender, RecordView, RECORD_SIZE};
use crate::value::{ContainerMeta, HeaderField, ParsedTree, TreeParser, Value};
use crate::Result;

const ROOT_OFFSET: usize = 64;
const DESCRIPTOR_LEN: usize = 16;

pub(crate) fn record(gender: Gender, id: u32) -> FixedRecord {
    FixedRecord {
        flag: 0,
        gender,
        weight: 60.0 + id as f32,
        score: 150.5 + id as f32,
        great_one: false,
        scripted: false,
        visual_seed: 1_000 + id,
        id,
        pos_x: id as f32 * 10.0,
        pos_y: id as f32 * -10.0,
    }
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut [u8], at: usize, v: u32) {
    out[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn build_payload(groups: &[Vec<FixedRecord>]) -> Vec<u8> {
    let mut out = vec![0u8; ROOT_OFFSET];
    out[..4].copy_from_slice(b" FDA");
    put_u32(&mut out, 4, 4);

    let group_table = ROOT_OFFSET + DESCRIPTOR_LEN;
    push_u32(&mut out, group_table as u32);
    push_u32(&mut out, 0);
    push_u32(&mut out, groups.len() as u32);
    push_u32(&mut out, 0);

    let mut cursor = group_table + groups.len() * DESCRIPTOR_LEN;
    for g in groups {
        push_u32(&mut out, cursor as u32);
        push_u32(&mut out, 0);
        push_u32(&mut out, g.len() as u32);
        push_u32(&mut out, 0);
        cursor += g.len() * RECORD_SIZE;
    }
    for r in groups.iter().flatten() {
        out.extend_from_slice(&r.to_bytes());
    }

    let instance_table = out.len();
    push_u32(&mut out, 0xA1B2_C3D4);
    push_u32(&mut out, 0x0BAD_F00D);
    push_u32(&mut out, ROOT_OFFSET as u32);
    push_u32(&mut out, (instance_table - ROOT_OFFSET) as u32);
    let typedef = out.len();
    out.extend_from_slice(&[0x11; 8]);
    let nametable = out.len();
    out.extend_from_slice(&[0x22; 8]);
    let total = out.len();

    put_u32(&mut out, 8, instance_table as u32);
    put_u32(&mut out, 12, typedef as u32);
    put_u32(&mut out, 16, 0);
    put_u32(&mut out, 20, nametable as u32);
    put_u32(&mut out, 24, total as u32);
    out
}

pub(crate) fn build_container(groups: &[Vec<FixedRecord>]) -> DecompressedContainer {
    let payload = build_payload(groups);
    let mut header = [0u8; FILE_HEADER_LEN];
    header[..4].copy_from_slice(b"AAF\0");
    let size = ((MARKER_LEN + payload.len()) as u32).to_le_bytes();
    header[8..12].copy_from_slice(&size);
    header[24..28].copy_from_slice(&size);
    DecompressedContainer::new(header, *b"\x01\x02\x03\x04\x05", payload)
}

pub(crate) struct FixtureParser;

impl TreeParser for FixtureParser {
    fn parse(&self, payload: &[u8]) -> Result<ParsedTree> {
        let field = |position: usize| -> Result<HeaderField> { Ok(HeaderField::new(read_u32(payload, position)?, position)) };
        let instance_offset = field(8)?;
        let root_offset = read_u32(payload, instance_offset.value as usize + 8)?;
        let meta = ContainerMeta {
            instance_offset,
            typedef_offset: field(12)?,
            stringhash_offset: field(16)?,
            nametable_offset: field(20)?,
            total_size: field(24)?,
            root_instance_size: field(instance_offset.value as usize + 12)?,
        };

        let groups_info = root_offset as usize;
        let groups_ptr = read_u32(payload, groups_info)?;
        let group_count = read_u32(payload, groups_info + 8)?;

        let mut groups = Vec::with_capacity(group_count as usize);
        for g in 0..group_count as usize {
            let info = groups_ptr as usize + g * DESCRIPTOR_LEN;
            let ptr = read_u32(payload, info)?;
            let count = read_u32(payload, info + 8)?;
            let mut animals = Vec::with_capacity(count as usize);
            for i in 0..count as usize {
                let at = ptr as usize + i * RECORD_SIZE;
                let raw = payload.get(at..).unwrap_or(&[]);
                animals.push(RecordView::node_at(at as u32, &FixedRecord::from_bytes(raw)?));
            }
            groups.push(Value::structure(
                info as u32,
                vec![("Animals".to_string(), Value::array(info as u32, ptr, animals))],
            ));
        }

        let root = Value::structure(
            root_offset,
            vec![("Groups".to_string(), Value::array(root_offset, groups_ptr, groups))],
        );
        Ok(ParsedTree { meta, root })
    }
}
