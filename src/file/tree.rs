// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{read_str, write_str, Decode, DecodeError, Encode, EncodeError},
    expr::{Expr, ExprError, Scope},
    primitive::{with_primitive, Primitive},
    registry::BufferRegistry,
    Error, LeafType,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

const SHAPE_SCALAR: u8 = 0;
const SHAPE_CONST_ARRAY: u8 = 1;
const SHAPE_VAR_ARRAY: u8 = 2;

/// Dimensionality of one leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// One element per event
    Scalar,

    /// A fixed number of elements per event
    ConstArray(u32),

    /// A per-event element count given by the named dimension leaf
    VarArray(String),
}

/// Branch title of the form `name/T`, `name[k]/T` or `name[dim]/T`.
fn make_title(name: &str, ty: LeafType, shape: &Shape) -> String {
    match shape {
        Shape::Scalar => format!("{name}/{}", ty.code()),
        Shape::ConstArray(k) => format!("{name}[{k}]/{}", ty.code()),
        Shape::VarArray(dim) => format!("{name}[{dim}]/{}", ty.code()),
    }
}

/// One column of a tree
///
/// The payload is stored contiguously in little-endian element order;
/// variable-length arrays additionally carry a prefix-summed offsets
/// table with `n_events + 1` entries.
pub struct Branch {
    name: String,
    title: String,
    ty: LeafType,
    shape: Shape,

    /// Raw little-endian column payload
    data: Vec<u8>,

    /// Prefix-summed element counts for variable arrays; empty otherwise
    offsets: Vec<u64>,

    /// Events written so far (tracked while filling, not serialized)
    rows: u64,

    /// Branch status; inactive branches are invisible to clone and filter
    active: bool,
}

impl Branch {
    fn new(name: &str, ty: LeafType, shape: Shape) -> Self {
        let title = make_title(name, ty, &shape);

        let offsets = match shape {
            Shape::VarArray(_) => vec![0],
            _ => Vec::new(),
        };

        Self {
            name: name.into(),
            title,
            ty,
            shape,
            data: Vec::new(),
            offsets,
            rows: 0,
            active: true,
        }
    }

    /// Leaf name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Branch title (`name/T`, `name[k]/T` or `name[dim]/T`).
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Primitive element type.
    #[must_use]
    pub fn leaf_type(&self) -> LeafType {
        self.ty
    }

    /// Dimensionality.
    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Dimension leaf name for variable arrays.
    #[must_use]
    pub fn dimension_leaf(&self) -> Option<&str> {
        match &self.shape {
            Shape::VarArray(dim) => Some(dim),
            _ => None,
        }
    }

    /// Branch status flag.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Byte offset and element count of `event`'s payload.
    #[allow(clippy::cast_possible_truncation)]
    fn event_range(&self, event: u64) -> (usize, usize) {
        let size = self.ty.size();

        match &self.shape {
            Shape::Scalar => ((event as usize) * size, 1),
            Shape::ConstArray(k) => ((event as usize) * (*k as usize) * size, *k as usize),
            Shape::VarArray(_) => {
                let start = self.offsets[event as usize] as usize;
                let end = self.offsets[event as usize + 1] as usize;
                (start * size, end - start)
            }
        }
    }

    fn push_count(&mut self, count: u64) {
        if let Shape::VarArray(_) = self.shape {
            let last = *self.offsets.last().unwrap_or(&0);
            self.offsets.push(last + count);
        }
        self.rows += 1;
    }

    fn validate(&self, n_events: u64) -> Result<(), DecodeError> {
        let size = self.ty.size() as u64;

        let expected = match &self.shape {
            Shape::Scalar => n_events * size,
            Shape::ConstArray(k) => n_events * u64::from(*k) * size,
            Shape::VarArray(_) => {
                if self.offsets.len() as u64 != n_events + 1 {
                    return Err(DecodeError::InvalidLength("Branch offsets"));
                }
                if self.offsets.first() != Some(&0)
                    || self.offsets.windows(2).any(|w| w[0] > w[1])
                {
                    return Err(DecodeError::InvalidLength("Branch offsets"));
                }
                *self.offsets.last().unwrap_or(&0) * size
            }
        };

        if self.data.len() as u64 != expected {
            return Err(DecodeError::InvalidLength("Branch payload"));
        }

        Ok(())
    }
}

impl Encode for Branch {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        write_str(writer, &self.name)?;
        write_str(writer, &self.title)?;
        writer.write_u8(u8::from(self.ty))?;

        match &self.shape {
            Shape::Scalar => writer.write_u8(SHAPE_SCALAR)?,
            Shape::ConstArray(k) => {
                writer.write_u8(SHAPE_CONST_ARRAY)?;
                writer.write_u32::<BigEndian>(*k)?;
            }
            Shape::VarArray(dim) => {
                writer.write_u8(SHAPE_VAR_ARRAY)?;
                write_str(writer, dim)?;
            }
        }

        writer.write_u64_varint(self.data.len() as u64)?;
        writer.write_all(&self.data)?;

        if let Shape::VarArray(_) = self.shape {
            writer.write_u64_varint(self.offsets.len() as u64)?;

            for offset in &self.offsets {
                writer.write_u64_varint(*offset)?;
            }
        }

        Ok(())
    }
}

impl Decode for Branch {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let name = read_str(reader)?;
        let title = read_str(reader)?;
        let ty = LeafType::try_from(reader.read_u8()?)?;

        let shape = match reader.read_u8()? {
            SHAPE_SCALAR => Shape::Scalar,
            SHAPE_CONST_ARRAY => Shape::ConstArray(reader.read_u32::<BigEndian>()?),
            SHAPE_VAR_ARRAY => Shape::VarArray(read_str(reader)?),
            tag => return Err(DecodeError::InvalidTag(("Shape", tag))),
        };

        #[allow(clippy::cast_possible_truncation)]
        let data_len = reader.read_u64_varint()? as usize;
        let mut data = vec![0u8; data_len];
        reader.read_exact(&mut data)?;

        let offsets = if matches!(shape, Shape::VarArray(_)) {
            #[allow(clippy::cast_possible_truncation)]
            let count = reader.read_u64_varint()? as usize;
            let mut offsets = Vec::with_capacity(count);

            for _ in 0..count {
                offsets.push(reader.read_u64_varint()?);
            }

            offsets
        } else {
            Vec::new()
        };

        Ok(Self {
            name,
            title,
            ty,
            shape,
            data,
            offsets,
            rows: 0,
            active: true,
        })
    }
}

/// A record-stream with a fixed schema of named typed columns
pub struct Tree {
    name: String,
    title: String,
    n_events: u64,
    branches: Vec<Branch>,
}

impl Tree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new(name: &str, title: &str) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            n_events: 0,
            branches: Vec::new(),
        }
    }

    /// Tree name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tree title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Renames the tree.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.into();
    }

    /// Retitles the tree.
    pub fn set_title(&mut self, title: &str) {
        self.title = title.into();
    }

    /// Number of events (rows).
    #[must_use]
    pub fn n_events(&self) -> u64 {
        self.n_events
    }

    /// All branches in schema order.
    #[must_use]
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// Branch at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of range.
    #[must_use]
    pub fn branch(&self, idx: usize) -> &Branch {
        &self.branches[idx]
    }

    /// Index of the branch named `name`.
    #[must_use]
    pub fn branch_index(&self, name: &str) -> Option<usize> {
        self.branches.iter().position(|b| b.name == name)
    }

    /// All leaf names in schema order.
    pub fn branch_names(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|b| b.name.as_str())
    }

    /// Adds a branch with an auto-generated title; returns its index.
    pub fn add_branch(&mut self, name: &str, ty: LeafType, shape: Shape) -> usize {
        self.branches.push(Branch::new(name, ty, shape));
        self.branches.len() - 1
    }

    /// Flags every branch (in)active.
    pub fn set_all_active(&mut self, active: bool) {
        for branch in &mut self.branches {
            branch.active = active;
        }
    }

    /// Flags the branch at `idx` (in)active.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of range.
    pub fn set_active(&mut self, idx: usize, active: bool) {
        self.branches[idx].active = active;
    }

    /// Flags the branch named `name` (in)active.
    pub(crate) fn set_active_by_name(&mut self, name: &str, active: bool) -> crate::Result<()> {
        let idx = self
            .branch_index(name)
            .ok_or_else(|| Error::BranchMissing {
                tree: self.name.clone(),
                branch: name.into(),
            })?;

        self.branches[idx].active = active;

        Ok(())
    }

    /// Appends one event's payload to branch `idx`.
    ///
    /// Scalars take exactly one value, constant arrays exactly `k`,
    /// variable arrays any count (recorded in the offsets table). The
    /// event becomes visible once every branch has advanced and
    /// [`Tree::commit_event`] ran.
    ///
    /// # Errors
    ///
    /// Fails when the value type or count does not match the branch.
    pub fn push_values<T: Primitive>(&mut self, idx: usize, values: &[T]) -> crate::Result<()> {
        let branch = &mut self.branches[idx];

        if T::TYPE != branch.ty {
            return Err(Error::TypeMismatch {
                branch: branch.name.clone(),
                expected: branch.ty,
                got: T::TYPE,
            });
        }

        let count_ok = match &branch.shape {
            Shape::Scalar => values.len() == 1,
            Shape::ConstArray(k) => values.len() == *k as usize,
            Shape::VarArray(_) => true,
        };

        if !count_ok {
            return Err(Error::ShapeMismatch {
                branch: branch.name.clone(),
            });
        }

        for value in values {
            value.write_le(&mut branch.data);
        }

        branch.push_count(values.len() as u64);

        Ok(())
    }

    /// Seals one row.
    ///
    /// # Errors
    ///
    /// Fails unless every branch has advanced exactly one event since
    /// the last call.
    pub fn commit_event(&mut self) -> crate::Result<()> {
        for branch in &self.branches {
            if branch.rows != self.n_events + 1 {
                return Err(Error::ShapeMismatch {
                    branch: branch.name.clone(),
                });
            }
        }

        self.n_events += 1;

        Ok(())
    }

    /// Reads event `event` into every bound buffer, clamped to each
    /// buffer's capacity.
    pub(crate) fn read_event(&self, event: u64, registry: &mut BufferRegistry) {
        for slot in registry.slots_mut() {
            let Some(idx) = slot.input else { continue };

            let branch = &self.branches[idx];
            let (offset, count) = branch.event_range(event);
            let count = count.min(slot.buffer.capacity());

            slot.buffer.load_le(&branch.data[offset..], count);
        }
    }

    /// All elements of branch `idx` at `event`, decoded as `T`.
    ///
    /// # Errors
    ///
    /// Fails when `T` does not match the branch's primitive type.
    pub fn values_at<T: Primitive>(&self, idx: usize, event: u64) -> crate::Result<Vec<T>> {
        let branch = &self.branches[idx];

        if T::TYPE != branch.ty {
            return Err(Error::TypeMismatch {
                branch: branch.name.clone(),
                expected: branch.ty,
                got: T::TYPE,
            });
        }

        let (offset, count) = branch.event_range(event);
        let size = branch.ty.size();

        Ok((0..count)
            .map(|k| T::read_le(&branch.data[offset + k * size..]))
            .collect())
    }

    /// Element 0 of branch `idx` at `event` as an `f64` (`0.0` for an
    /// empty array).
    #[must_use]
    pub fn value_as_f64(&self, idx: usize, event: u64) -> f64 {
        let branch = &self.branches[idx];
        let (offset, count) = branch.event_range(event);

        if count == 0 {
            return 0.0;
        }

        with_primitive!(branch.ty, T => T::read_le(&branch.data[offset..]).to_f64())
    }

    /// Element 0 of branch `idx` at `event` as an `i64` (`0` for an
    /// empty array).
    #[must_use]
    pub fn value_as_i64(&self, idx: usize, event: u64) -> i64 {
        let branch = &self.branches[idx];
        let (offset, count) = branch.event_range(event);

        if count == 0 {
            return 0;
        }

        with_primitive!(branch.ty, T => T::read_le(&branch.data[offset..]).to_i64())
    }

    /// Per-event maximum of the named column (dimension-leaf pre-scan).
    ///
    /// # Errors
    ///
    /// Fails when no branch has that name.
    pub fn max_of_column(&self, name: &str) -> crate::Result<i64> {
        let idx = self
            .branch_index(name)
            .ok_or_else(|| Error::BranchMissing {
                tree: self.name.clone(),
                branch: name.into(),
            })?;

        let mut max = 0;

        for event in 0..self.n_events {
            max = max.max(self.value_as_i64(idx, event));
        }

        Ok(max)
    }

    /// Copies the active branches into a new tree, keeping all events.
    #[must_use]
    pub fn clone_active(&self) -> Self {
        let mut out = Self::new(&self.name, &self.title);
        out.n_events = self.n_events;

        for branch in self.branches.iter().filter(|b| b.active) {
            out.branches.push(Branch {
                name: branch.name.clone(),
                title: branch.title.clone(),
                ty: branch.ty,
                shape: branch.shape.clone(),
                data: branch.data.clone(),
                offsets: branch.offsets.clone(),
                rows: branch.rows,
                active: true,
            });
        }

        out
    }

    /// Copies the active branches, keeping only events where `cut`
    /// evaluates non-zero.
    ///
    /// Cut identifiers resolve against all branches of this tree;
    /// element 0 is used for array leaves.
    ///
    /// # Errors
    ///
    /// Fails when the cut references an unknown leaf.
    pub fn filter_rows(&self, cut: &Expr) -> crate::Result<Self> {
        let mut keep = Vec::with_capacity(self.n_events as usize);

        for event in 0..self.n_events {
            keep.push(cut.eval(&RowScope { tree: self, event })? != 0.0);
        }

        let mut out = Self::new(&self.name, &self.title);

        let sources: Vec<&Branch> = self.branches.iter().filter(|b| b.active).collect();

        for branch in &sources {
            out.add_branch(&branch.name, branch.ty, branch.shape.clone());
        }

        for (event, &keep_it) in keep.iter().enumerate() {
            if !keep_it {
                continue;
            }

            for (out_branch, src) in out.branches.iter_mut().zip(&sources) {
                let (offset, count) = src.event_range(event as u64);
                let size = src.ty.size();

                out_branch
                    .data
                    .extend_from_slice(&src.data[offset..offset + count * size]);
                out_branch.push_count(count as u64);
            }

            out.n_events += 1;
        }

        Ok(out)
    }

    /// Creates or replaces the scalar `f64` column `name` with `values`.
    pub(crate) fn put_f64_column(&mut self, name: &str, values: &[f64]) -> crate::Result<()> {
        if values.len() as u64 != self.n_events {
            return Err(Error::ShapeMismatch {
                branch: name.into(),
            });
        }

        let mut data = Vec::with_capacity(values.len() * std::mem::size_of::<f64>());

        for value in values {
            value.write_le(&mut data);
        }

        if let Some(idx) = self.branch_index(name) {
            let branch = &mut self.branches[idx];

            if branch.ty != LeafType::F64 || branch.shape != Shape::Scalar {
                return Err(Error::TypeMismatch {
                    branch: name.into(),
                    expected: LeafType::F64,
                    got: branch.ty,
                });
            }

            branch.data = data;
        } else {
            let idx = self.add_branch(name, LeafType::F64, Shape::Scalar);
            let branch = &mut self.branches[idx];
            branch.data = data;
            branch.rows = self.n_events;
        }

        Ok(())
    }

    /// Total column payload in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u64 {
        self.branches.iter().map(|b| b.data.len() as u64).sum()
    }
}

impl Encode for Tree {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        write_str(writer, &self.name)?;
        write_str(writer, &self.title)?;
        writer.write_u64::<BigEndian>(self.n_events)?;

        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32_varint(self.branches.len() as u32)?;

        for branch in &self.branches {
            branch.encode_into(writer)?;
        }

        Ok(())
    }
}

impl Decode for Tree {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let name = read_str(reader)?;
        let title = read_str(reader)?;
        let n_events = reader.read_u64::<BigEndian>()?;
        let branch_count = reader.read_u32_varint()?;

        let mut branches = Vec::with_capacity(branch_count as usize);

        for _ in 0..branch_count {
            let mut branch = Branch::decode_from(reader)?;
            branch.validate(n_events)?;
            branch.rows = n_events;
            branches.push(branch);
        }

        Ok(Self {
            name,
            title,
            n_events,
            branches,
        })
    }
}

/// Scope resolving cut identifiers against one tree row
pub(crate) struct RowScope<'a> {
    pub(crate) tree: &'a Tree,
    pub(crate) event: u64,
}

impl Scope for RowScope<'_> {
    fn param(&self, index: usize) -> crate::Result<f64> {
        Err(ExprError::ParameterOutOfRange(index).into())
    }

    fn var(&self, name: &str) -> crate::Result<f64> {
        let idx = self
            .tree
            .branch_index(name)
            .ok_or_else(|| Error::BranchMissing {
                tree: self.tree.name.clone(),
                branch: name.into(),
            })?;

        Ok(self.tree.value_as_f64(idx, self.event))
    }
}
