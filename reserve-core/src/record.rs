//! The fixed 44-byte population record and its mapping onto tree members.

use crate::buffer::{check_range, write_f32, write_u32, write_u8};
use crate::value::{Scalar, Value, ValueKind};
use crate::{ReserveError, Result};

pub const RECORD_SIZE: usize = 44;

// Field positions inside an encoded record. Bytes 2..5, 15..17 and the tail
// from 33 onwards are zero padding.
const FLAG: usize = 0;
const GENDER: usize = 1;
const WEIGHT: usize = 5;
const SCORE: usize = 9;
const GREAT_ONE: usize = 13;
const SCRIPTED: usize = 14;
const VISUAL_SEED: usize = 17;
const ID: usize = 21;
const POS_X: usize = 25;
const POS_Y: usize = 29;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn to_byte(self) -> u8 {
        match self {
            Gender::Male => 1,
            Gender::Female => 2,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl TryFrom<u8> for Gender {
    type Error = ReserveError;

    fn try_from(b: u8) -> Result<Self> {
        match b {
            1 => Ok(Gender::Male),
            2 => Ok(Gender::Female),
            other => Err(ReserveError::Schema(format!("invalid gender byte {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedRecord {
    pub flag: u8,
    pub gender: Gender,
    pub weight: f32,
    pub score: f32,
    pub great_one: bool,
    pub scripted: bool,
    pub visual_seed: u32,
    pub id: u32,
    pub pos_x: f32,
    pub pos_y: f32,
}

impl FixedRecord {
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[FLAG] = self.flag;
        out[GENDER] = self.gender.to_byte();
        out[WEIGHT..WEIGHT + 4].copy_from_slice(&self.weight.to_le_bytes());
        out[SCORE..SCORE + 4].copy_from_slice(&self.score.to_le_bytes());
        out[GREAT_ONE] = u8::from(self.great_one);
        out[SCRIPTED] = u8::from(self.scripted);
        out[VISUAL_SEED..VISUAL_SEED + 4].copy_from_slice(&self.visual_seed.to_le_bytes());
        out[ID..ID + 4].copy_from_slice(&self.id.to_le_bytes());
        out[POS_X..POS_X + 4].copy_from_slice(&self.pos_x.to_le_bytes());
        out[POS_Y..POS_Y + 4].copy_from_slice(&self.pos_y.to_le_bytes());
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        check_range(raw, 0, RECORD_SIZE)?;
        let u32_at = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let f32_at = |at: usize| f32::from_bits(u32_at(at));
        Ok(Self {
            flag: raw[FLAG],
            gender: Gender::try_from(raw[GENDER])?,
            weight: f32_at(WEIGHT),
            score: f32_at(SCORE),
            great_one: raw[GREAT_ONE] != 0,
            scripted: raw[SCRIPTED] != 0,
            visual_seed: u32_at(VISUAL_SEED),
            id: u32_at(ID),
            pos_x: f32_at(POS_X),
            pos_y: f32_at(POS_Y),
        })
    }
}

/// Maps a [`FixedRecord`] onto the named members of a record node.
///
/// Older containers flag Great Ones through `FeatureModifiers.Flags` instead
/// of `IsGreatOne`; both shapes are accepted. `Flag` and `IsScripted` are
/// absent from some containers and read as zero.
pub struct RecordView;

impl RecordView {
    pub fn read(node: &Value) -> Result<FixedRecord> {
        let gender = Gender::try_from(int_member::<u8>(node, "Gender")?)?;
        let great_one: u64 = match node.member("IsGreatOne") {
            Some(_) => int_member(node, "IsGreatOne")?,
            None => int_member(nested(node, "FeatureModifiers")?, "Flags")?,
        };
        let position = nested(node, "MapPosition")?;
        Ok(FixedRecord {
            flag: optional_int_member(node, "Flag")?,
            gender,
            weight: float_member(node, "Weight")?,
            score: float_member(node, "Score")?,
            great_one: great_one == 1,
            scripted: optional_int_member::<u64>(node, "IsScripted")? == 1,
            visual_seed: int_member(node, "VisualVariationSeed")?,
            id: int_member(node, "Id")?,
            pos_x: float_member(position, "X")?,
            pos_y: float_member(position, "Y")?,
        })
    }

    /// Overwrites the node's scalar members with the record's values.
    /// Offsets are left alone.
    pub fn apply(node: &mut Value, record: &FixedRecord) -> Result<()> {
        if let Some(flag) = node.member_mut("Flag") {
            set(flag, Scalar::U8(record.flag));
        }
        set(required_mut(node, "Gender")?, Scalar::U8(record.gender.to_byte()));
        set(required_mut(node, "Weight")?, Scalar::F32(record.weight));
        set(required_mut(node, "Score")?, Scalar::F32(record.score));
        let great_one = Scalar::U8(u8::from(record.great_one));
        match node.member_mut("IsGreatOne") {
            Some(v) => set(v, great_one),
            None => set(required_mut(required_mut(node, "FeatureModifiers")?, "Flags")?, great_one),
        }
        if let Some(scripted) = node.member_mut("IsScripted") {
            set(scripted, Scalar::U8(u8::from(record.scripted)));
        }
        set(required_mut(node, "VisualVariationSeed")?, Scalar::U32(record.visual_seed));
        set(required_mut(node, "Id")?, Scalar::U32(record.id));
        let position = required_mut(node, "MapPosition")?;
        set(required_mut(position, "X")?, Scalar::F32(record.pos_x));
        set(required_mut(position, "Y")?, Scalar::F32(record.pos_y));
        Ok(())
    }

    /// The canonical node shape for a record encoded at `offset`.
    pub fn node_at(offset: u32, record: &FixedRecord) -> Value {
        let at = |field: usize| offset + field as u32;
        let member = |name: &str, field: usize, scalar: Scalar| (name.to_string(), Value::scalar(at(field), scalar));
        Value::structure(
            offset,
            vec![
                member("Flag", FLAG, Scalar::U8(record.flag)),
                member("Gender", GENDER, Scalar::U8(record.gender.to_byte())),
                member("Weight", WEIGHT, Scalar::F32(record.weight)),
                member("Score", SCORE, Scalar::F32(record.score)),
                member("IsGreatOne", GREAT_ONE, Scalar::U8(u8::from(record.great_one))),
                member("IsScripted", SCRIPTED, Scalar::U8(u8::from(record.scripted))),
                member("VisualVariationSeed", VISUAL_SEED, Scalar::U32(record.visual_seed)),
                member("Id", ID, Scalar::U32(record.id)),
                (
                    "MapPosition".to_string(),
                    Value::structure(
                        at(POS_X),
                        vec![
                            member("X", POS_X, Scalar::F32(record.pos_x)),
                            member("Y", POS_Y, Scalar::F32(record.pos_y)),
                        ],
                    ),
                ),
            ],
        )
    }

    /// Same-size edit: writes the record's values at the data offsets of the
    /// node's members and mirrors them into the node.
    pub fn write_in_place(buf: &mut [u8], node: &mut Value, record: &FixedRecord) -> Result<()> {
        let mut writes: Vec<(usize, FieldWrite)> = Vec::new();
        if let Some(flag) = node.member("Flag") {
            writes.push((flag.data_offset as usize, FieldWrite::U8(record.flag)));
        }
        writes.push((required(node, "Gender")?.data_offset as usize, FieldWrite::U8(record.gender.to_byte())));
        writes.push((required(node, "Weight")?.data_offset as usize, FieldWrite::F32(record.weight)));
        writes.push((required(node, "Score")?.data_offset as usize, FieldWrite::F32(record.score)));
        let great_one = match node.member("IsGreatOne") {
            Some(v) => v,
            None => required(required(node, "FeatureModifiers")?, "Flags")?,
        };
        writes.push((great_one.data_offset as usize, FieldWrite::U8(u8::from(record.great_one))));
        if let Some(scripted) = node.member("IsScripted") {
            writes.push((scripted.data_offset as usize, FieldWrite::U8(u8::from(record.scripted))));
        }
        writes.push((
            required(node, "VisualVariationSeed")?.data_offset as usize,
            FieldWrite::U32(record.visual_seed),
        ));
        writes.push((required(node, "Id")?.data_offset as usize, FieldWrite::U32(record.id)));
        let position = required(node, "MapPosition")?;
        writes.push((required(position, "X")?.data_offset as usize, FieldWrite::F32(record.pos_x)));
        writes.push((required(position, "Y")?.data_offset as usize, FieldWrite::F32(record.pos_y)));

        for (offset, write) in &writes {
            check_range(buf, *offset, write.len())?;
        }
        for (offset, write) in writes {
            match write {
                FieldWrite::U8(v) => write_u8(buf, offset, v)?,
                FieldWrite::U32(v) => write_u32(buf, offset, v)?,
                FieldWrite::F32(v) => write_f32(buf, offset, v)?,
            }
        }
        Self::apply(node, record)
    }
}

enum FieldWrite {
    U8(u8),
    U32(u32),
    F32(f32),
}

impl FieldWrite {
    fn len(&self) -> usize {
        match self {
            FieldWrite::U8(_) => 1,
            FieldWrite::U32(_) | FieldWrite::F32(_) => 4,
        }
    }
}

fn set(node: &mut Value, scalar: Scalar) {
    node.kind = ValueKind::Scalar(scalar);
}

fn required<'a>(node: &'a Value, name: &str) -> Result<&'a Value> {
    node.member(name)
        .ok_or_else(|| ReserveError::Schema(format!("record has no `{name}` member")))
}

fn required_mut<'a>(node: &'a mut Value, name: &str) -> Result<&'a mut Value> {
    node.member_mut(name)
        .ok_or_else(|| ReserveError::Schema(format!("record has no `{name}` member")))
}

fn nested<'a>(node: &'a Value, name: &str) -> Result<&'a Value> {
    let inner = required(node, name)?;
    match inner.kind {
        ValueKind::Struct(_) => Ok(inner),
        _ => Err(ReserveError::Schema(format!("`{name}` is not a struct"))),
    }
}

fn int_member<T: TryFrom<u64>>(node: &Value, name: &str) -> Result<T> {
    let raw = required(node, name)?
        .as_scalar()
        .and_then(Scalar::as_u64)
        .ok_or_else(|| ReserveError::Schema(format!("`{name}` is not an unsigned integer")))?;
    T::try_from(raw).map_err(|_| ReserveError::Schema(format!("`{name}` value {raw} is out of range")))
}

fn optional_int_member<T: TryFrom<u64> + Default>(node: &Value, name: &str) -> Result<T> {
    match node.member(name) {
        Some(_) => int_member(node, name),
        None => Ok(T::default()),
    }
}

fn float_member(node: &Value, name: &str) -> Result<f32> {
    required(node, name)?
        .as_scalar()
        .and_then(Scalar::as_f64)
        .map(|v| v as f32)
        .ok_or_else(|| ReserveError::Schema(format!("`{name}` is not numeric")))
}
