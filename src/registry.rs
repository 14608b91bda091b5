// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Owns all leaf buffers of the currently executing job.

use crate::{
    buffer::{with_buffer, AnyLeafBuffer},
    file::tree::{Shape, Tree},
    Error, LeafType,
};

/// One staged leaf: its buffer plus its read and write bindings
pub(crate) struct BufferSlot {
    pub(crate) buffer: AnyLeafBuffer,

    /// Input branch index; `None` for output-only columns
    pub(crate) input: Option<usize>,

    /// Output branch index, set on binding
    pub(crate) output: Option<usize>,

    /// Whether row emits publish only slot 0 of this buffer
    pub(crate) is_flatten: bool,
}

/// Per-job buffer store keyed by slot index
///
/// Created empty at job start, populated during leaf analysis, torn
/// down between jobs. Flatten-marked slots are additionally tracked in
/// an index list so the per-step shift touches only those buffers.
#[derive(Default)]
pub struct BufferRegistry {
    slots: Vec<BufferSlot>,
    flatten: Vec<usize>,
}

impl BufferRegistry {
    /// Stages a buffer of `cap` elements; returns its slot index.
    pub fn append(&mut self, ty: LeafType, cap: usize, is_flatten: bool) -> usize {
        let idx = self.slots.len();

        if is_flatten {
            self.flatten.push(idx);
        }

        self.slots.push(BufferSlot {
            buffer: AnyLeafBuffer::new(ty, cap),
            input: None,
            output: None,
            is_flatten,
        });

        idx
    }

    /// Binds slot `idx` as the read target of `in_name` on the input
    /// tree and creates the matching output branch.
    pub(crate) fn bind_to_trees(
        &mut self,
        idx: usize,
        input: &Tree,
        in_name: &str,
        output: &mut Tree,
        out_name: &str,
        out_shape: Shape,
    ) -> crate::Result<()> {
        let in_idx = input
            .branch_index(in_name)
            .ok_or_else(|| Error::BranchMissing {
                tree: input.name().into(),
                branch: in_name.into(),
            })?;

        let slot = &mut self.slots[idx];
        slot.input = Some(in_idx);
        slot.output = Some(output.add_branch(out_name, slot.buffer.leaf_type(), out_shape));

        Ok(())
    }

    /// Binds slot `idx` to a fresh scalar output branch only (no read
    /// target); used for the flatten index column.
    pub(crate) fn bind_output(&mut self, idx: usize, output: &mut Tree, out_name: &str) {
        let slot = &mut self.slots[idx];
        slot.output = Some(output.add_branch(out_name, slot.buffer.leaf_type(), Shape::Scalar));
    }

    /// Shifts array element `i` into slot 0 of every flatten buffer.
    pub fn step_all(&mut self, i: usize) {
        for &idx in &self.flatten {
            let buffer = &mut self.slots[idx].buffer;

            if i < buffer.capacity() {
                buffer.increment(i);
            }
        }
    }

    /// Releases all buffers and flatten indices (between jobs).
    pub fn clear(&mut self) {
        self.slots.clear();
        self.flatten.clear();
    }

    /// Number of staged buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no buffer is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [BufferSlot] {
        &mut self.slots
    }

    pub(crate) fn buffer(&self, idx: usize) -> &AnyLeafBuffer {
        &self.slots[idx].buffer
    }

    pub(crate) fn set_counter(&mut self, idx: usize, value: u32) {
        self.slots[idx].buffer.set_counter(value);
    }

    /// Appends one output row from the bound buffers.
    ///
    /// Flatten buffers emit element 0 only; all other buffers emit the
    /// elements loaded for the current event.
    pub(crate) fn fill_into(&self, tree: &mut Tree) -> crate::Result<()> {
        for slot in &self.slots {
            let Some(out) = slot.output else { continue };

            let count = if slot.is_flatten { 1 } else { slot.buffer.len() };

            with_buffer!(&slot.buffer, buf => tree.push_values(out, &buf.values()[..count]))?;
        }

        tree.commit_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn registry_append_tracks_flatten() {
        let mut registry = BufferRegistry::default();

        let a = registry.append(LeafType::F64, 4, true);
        let b = registry.append(LeafType::I32, 1, false);
        let c = registry.append(LeafType::F64, 4, true);

        assert_eq!([0, 1, 2], [a, b, c]);
        assert_eq!(3, registry.len());
        assert_eq!(vec![0, 2], registry.flatten);
    }

    #[test]
    fn registry_step_all_touches_only_flatten() {
        let mut registry = BufferRegistry::default();

        let flat = registry.append(LeafType::I32, 2, true);
        let kept = registry.append(LeafType::I32, 2, false);

        registry.slots[flat].buffer.load_le(&[1, 0, 0, 0, 2, 0, 0, 0], 2);
        registry.slots[kept].buffer.load_le(&[5, 0, 0, 0, 6, 0, 0, 0], 2);

        registry.step_all(1);

        assert_eq!(2, registry.buffer(flat).first_as_i64());
        assert_eq!(5, registry.buffer(kept).first_as_i64());
    }

    #[test]
    fn registry_step_all_skips_out_of_range() {
        let mut registry = BufferRegistry::default();

        let flat = registry.append(LeafType::I32, 2, true);
        registry.slots[flat].buffer.load_le(&[1, 0, 0, 0, 2, 0, 0, 0], 2);

        registry.step_all(5);

        assert_eq!(1, registry.buffer(flat).first_as_i64());
    }

    #[test]
    fn registry_clear_releases_everything() {
        let mut registry = BufferRegistry::default();
        registry.append(LeafType::F64, 4, true);

        registry.clear();

        assert!(registry.is_empty());
        assert!(registry.flatten.is_empty());
    }
}
