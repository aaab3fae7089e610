//! In-memory view of the typed value tree produced by an external parser.
//!
//! Every node records where its payload lives (`data_offset`) and where the
//! descriptor pointing at that payload lives (`info_offset`). Inline values
//! carry the same offset in both.

use std::fmt;

use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    U8(u8),
    U16(u16),
    U32(u32),
    I32(i32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
}

impl Scalar {
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Scalar::U8(v) => Some(u64::from(v)),
            Scalar::U16(v) => Some(u64::from(v)),
            Scalar::U32(v) => Some(u64::from(v)),
            Scalar::I32(v) => u64::try_from(v).ok(),
            Scalar::U64(v) => Some(v),
            Scalar::F32(_) | Scalar::F64(_) | Scalar::Str(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Scalar::F32(v) => Some(f64::from(v)),
            Scalar::F64(v) => Some(v),
            _ => self.as_u64().map(|v| v as f64),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Scalar(Scalar),
    /// Named members in stored order.
    Struct(Vec<(String, Value)>),
    Array(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub data_offset: u32,
    pub info_offset: u32,
    pub kind: ValueKind,
}

impl Value {
    pub fn scalar(offset: u32, scalar: Scalar) -> Self {
        Self {
            data_offset: offset,
            info_offset: offset,
            kind: ValueKind::Scalar(scalar),
        }
    }

    pub fn structure(offset: u32, members: Vec<(String, Value)>) -> Self {
        Self {
            data_offset: offset,
            info_offset: offset,
            kind: ValueKind::Struct(members),
        }
    }

    pub fn array(info_offset: u32, data_offset: u32, elements: Vec<Value>) -> Self {
        Self {
            data_offset,
            info_offset,
            kind: ValueKind::Array(elements),
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match &self.kind {
            ValueKind::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn elements(&self) -> Option<&[Value]> {
        match &self.kind {
            ValueKind::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn elements_mut(&mut self) -> Option<&mut Vec<Value>> {
        match &mut self.kind {
            ValueKind::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&Value> {
        match &self.kind {
            ValueKind::Struct(members) => members.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn member_mut(&mut self, name: &str) -> Option<&mut Value> {
        match &mut self.kind {
            ValueKind::Struct(members) => members
                .iter_mut()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn get(&self, path: &ValuePath) -> Option<&Value> {
        path.segments().iter().try_fold(self, |node, seg| match seg {
            PathSegment::Member(name) => node.member(name),
            PathSegment::Index(i) => node.elements()?.get(*i),
        })
    }

    pub fn get_mut(&mut self, path: &ValuePath) -> Option<&mut Value> {
        let mut node = self;
        for seg in path.segments() {
            node = match seg {
                PathSegment::Member(name) => node.member_mut(name)?,
                PathSegment::Index(i) => node.elements_mut()?.get_mut(*i)?,
            };
        }
        Some(node)
    }

    /// Direct children: struct members in stored order, array elements in
    /// index order.
    pub fn children_mut(&mut self) -> Box<dyn Iterator<Item = &mut Value> + '_> {
        match &mut self.kind {
            ValueKind::Scalar(_) => Box::new(std::iter::empty()),
            ValueKind::Struct(members) => Box::new(members.iter_mut().map(|(_, v)| v)),
            ValueKind::Array(items) => Box::new(items.iter_mut()),
        }
    }

    /// Calls `f` on this node and every descendant, depth first.
    pub fn visit(&self, f: &mut dyn FnMut(&Value)) {
        f(self);
        match &self.kind {
            ValueKind::Scalar(_) => {}
            ValueKind::Struct(members) => members.iter().for_each(|(_, v)| v.visit(f)),
            ValueKind::Array(items) => items.iter().for_each(|v| v.visit(f)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Member(String),
    Index(usize),
}

/// Location of a node relative to the root instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ValuePath(Vec<PathSegment>);

impl ValuePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn member(mut self, name: impl Into<String>) -> Self {
        self.0.push(PathSegment::Member(name.into()));
        self
    }

    pub fn index(mut self, i: usize) -> Self {
        self.0.push(PathSegment::Index(i));
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                PathSegment::Member(name) if i == 0 => write!(f, "{name}")?,
                PathSegment::Member(name) => write!(f, ".{name}")?,
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

/// A header-level integer together with the payload position it is stored at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderField {
    pub value: u32,
    pub position: usize,
}

impl HeaderField {
    pub fn new(value: u32, position: usize) -> Self {
        Self { value, position }
    }
}

/// Offsets and sizes recorded in the container's own metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMeta {
    pub instance_offset: HeaderField,
    pub typedef_offset: HeaderField,
    /// Zero when this container variant has no string-hash table.
    pub stringhash_offset: HeaderField,
    pub nametable_offset: HeaderField,
    pub total_size: HeaderField,
    /// Size of the first root instance, stored in the instance table.
    pub root_instance_size: HeaderField,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTree {
    pub meta: ContainerMeta,
    pub root: Value,
}

/// Seam to the typed-value-tree library that understands the schema.
pub trait TreeParser {
    fn parse(&self, payload: &[u8]) -> Result<ParsedTree>;
}

impl<P: TreeParser + ?Sized> TreeParser for &P {
    fn parse(&self, payload: &[u8]) -> Result<ParsedTree> {
        (**self).parse(payload)
    }
}
