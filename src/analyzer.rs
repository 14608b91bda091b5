// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Leaf classification, dimension-leaf pre-scan and buffer binding.

use crate::{
    file::tree::{Shape, Tree},
    registry::BufferRegistry,
};
use rustc_hash::FxHashMap;

/// Output name suffix for leaves selected for flattening or BPV
const FLAT_LEAF_SUFFIX: &str = "_flat";

/// Result of a leaf analysis pass
pub(crate) struct Analysis {
    /// Dimension leaf driving the flatten inner loop, if any
    pub(crate) alignment: Option<String>,
}

/// One dimension leaf touched during analysis
struct DimLeaf {
    name: String,

    /// Per-job maximum of the column
    max: i64,

    /// Whether a flatten-marked leaf aligns to it
    marked: bool,
}

/// Classifies every leaf in `all_leaves`, sizes and binds a buffer for
/// each, and picks the alignment dimension leaf.
///
/// Leaves listed in `sel_leaves` (a subset of `all_leaves`) are marked
/// for flattening: their output column is renamed with a `_flat` suffix
/// and row emits publish only element 0. Dimension leaves are enabled
/// and pre-scanned for their per-job maximum the first time they are
/// seen; that maximum sizes the buffers of every leaf aligned to them.
pub(crate) fn analyze_leaves(
    input: &mut Tree,
    output: &mut Tree,
    registry: &mut BufferRegistry,
    all_leaves: &[usize],
    sel_leaves: &[usize],
) -> crate::Result<Analysis> {
    // Nothing is read unless the analysis re-enables it
    input.set_all_active(false);

    let mut dim_leaves: Vec<DimLeaf> = Vec::new();
    let mut dim_index: FxHashMap<String, usize> = FxHashMap::default();

    for &leaf in all_leaves {
        let (in_name, ty, shape) = {
            let branch = input.branch(leaf);
            (
                branch.name().to_string(),
                branch.leaf_type(),
                branch.shape().clone(),
            )
        };

        let is_selected = sel_leaves.contains(&leaf);

        let mut out_name = in_name.clone();
        let mut is_flatten = false;

        let (cap, out_shape) = match &shape {
            Shape::Scalar => (1, Shape::Scalar),

            Shape::ConstArray(k) => {
                if is_selected {
                    // Constant-length array with flattening requested:
                    // treated as variable with cap = probe
                    is_flatten = true;
                    out_name.push_str(FLAT_LEAF_SUFFIX);
                    (*k as usize, Shape::Scalar)
                } else {
                    (*k as usize, Shape::ConstArray(*k))
                }
            }

            Shape::VarArray(dim) => {
                let slot = match dim_index.get(dim) {
                    Some(&slot) => slot,
                    None => {
                        input.set_active_by_name(dim, true)?;
                        let max = input.max_of_column(dim)?;

                        log::debug!("dimension leaf {dim:?} has maximum {max}");

                        let slot = dim_leaves.len();
                        dim_leaves.push(DimLeaf {
                            name: dim.clone(),
                            max,
                            marked: false,
                        });
                        dim_index.insert(dim.clone(), slot);
                        slot
                    }
                };

                if is_selected {
                    is_flatten = true;
                    out_name.push_str(FLAT_LEAF_SUFFIX);
                    dim_leaves[slot].marked = true;
                }

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let cap = dim_leaves[slot].max.max(1) as usize;

                let out_shape = if is_flatten {
                    Shape::Scalar
                } else {
                    Shape::VarArray(dim.clone())
                };

                (cap, out_shape)
            }
        };

        input.set_active(leaf, true);

        let idx = registry.append(ty, cap, is_flatten);
        registry.bind_to_trees(idx, input, &in_name, output, &out_name, out_shape)?;
    }

    if dim_leaves.len() > 1 {
        log::warn!(
            "more than one dimension leaf in a single job: {:?}; aligning to the first flattened one",
            dim_leaves.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
        );
    }

    let alignment = dim_leaves
        .iter()
        .find(|d| d.marked)
        .or_else(|| dim_leaves.first())
        .map(|d| d.name.clone());

    Ok(Analysis { alignment })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, LeafType};
    use test_log::test;

    fn vertex_tree() -> crate::Result<Tree> {
        let mut tree = Tree::new("T", "T");
        let n = tree.add_branch("n", LeafType::I32, Shape::Scalar);
        let m = tree.add_branch("m", LeafType::F64, Shape::VarArray("n".into()));
        let chi = tree.add_branch("chi", LeafType::F64, Shape::VarArray("n".into()));

        tree.push_values(n, &[2_i32])?;
        tree.push_values(m, &[10.0_f64, 20.0])?;
        tree.push_values(chi, &[0.5_f64, 0.9])?;
        tree.commit_event()?;

        tree.push_values(n, &[1_i32])?;
        tree.push_values(m, &[30.0_f64])?;
        tree.push_values(chi, &[0.1_f64])?;
        tree.commit_event()?;

        Ok(tree)
    }

    #[test]
    fn analyzer_classifies_and_renames() -> crate::Result<()> {
        let mut input = vertex_tree()?;
        let mut output = Tree::new("out", "out");
        let mut registry = BufferRegistry::default();

        let analysis = analyze_leaves(
            &mut input,
            &mut output,
            &mut registry,
            &[0, 1, 2],
            &[1, 2],
        )?;

        assert_eq!(Some("n"), analysis.alignment.as_deref());
        assert_eq!(
            vec!["n", "m_flat", "chi_flat"],
            output.branch_names().collect::<Vec<_>>(),
        );

        // Variable arrays were sized by the pre-scanned maximum
        assert_eq!(1, registry.buffer(0).capacity());
        assert_eq!(2, registry.buffer(1).capacity());
        assert_eq!(2, registry.buffer(2).capacity());

        Ok(())
    }

    #[test]
    fn analyzer_enables_exactly_the_bound_leaves() -> crate::Result<()> {
        let mut input = vertex_tree()?;
        let mut output = Tree::new("out", "out");
        let mut registry = BufferRegistry::default();

        // Only m is analyzed; its dimension leaf n is enabled for the
        // pre-scan but gets no buffer
        analyze_leaves(&mut input, &mut output, &mut registry, &[1], &[1])?;

        assert!(input.branch(0).is_active());
        assert!(input.branch(1).is_active());
        assert!(!input.branch(2).is_active());
        assert_eq!(1, registry.len());
        assert_eq!(
            vec!["m_flat"],
            output.branch_names().collect::<Vec<_>>(),
        );

        Ok(())
    }

    #[test]
    fn analyzer_keeps_unselected_arrays_variable() -> crate::Result<()> {
        let mut input = vertex_tree()?;
        let mut output = Tree::new("out", "out");
        let mut registry = BufferRegistry::default();

        analyze_leaves(&mut input, &mut output, &mut registry, &[0, 1, 2], &[1])?;

        assert_eq!(
            vec!["n", "m_flat", "chi"],
            output.branch_names().collect::<Vec<_>>(),
        );
        assert_eq!(
            &Shape::VarArray("n".into()),
            output.branch(2).shape(),
        );

        Ok(())
    }

    #[test]
    fn analyzer_alignment_prefers_marked_dimension() -> crate::Result<()> {
        let mut tree = Tree::new("T", "T");
        let na = tree.add_branch("na", LeafType::I32, Shape::Scalar);
        let nb = tree.add_branch("nb", LeafType::I32, Shape::Scalar);
        let a = tree.add_branch("a", LeafType::F64, Shape::VarArray("na".into()));
        let b = tree.add_branch("b", LeafType::F64, Shape::VarArray("nb".into()));

        tree.push_values(na, &[1_i32])?;
        tree.push_values(nb, &[2_i32])?;
        tree.push_values(a, &[1.0_f64])?;
        tree.push_values(b, &[2.0_f64, 3.0])?;
        tree.commit_event()?;

        let mut output = Tree::new("out", "out");
        let mut registry = BufferRegistry::default();

        // Both dimension leaves are touched, only b is flattened
        let analysis = analyze_leaves(
            &mut tree,
            &mut output,
            &mut registry,
            &[0, 1, 2, 3],
            &[3],
        )?;

        assert_eq!(Some("nb"), analysis.alignment.as_deref());

        Ok(())
    }

    #[test]
    fn analyzer_const_array_flatten() -> crate::Result<()> {
        let mut tree = Tree::new("T", "T");
        let arr = tree.add_branch("arr", LeafType::I32, Shape::ConstArray(3));
        tree.push_values(arr, &[7_i32, 8, 9])?;
        tree.commit_event()?;

        let mut output = Tree::new("out", "out");
        let mut registry = BufferRegistry::default();

        let analysis = analyze_leaves(&mut tree, &mut output, &mut registry, &[0], &[0])?;

        assert_eq!(None, analysis.alignment);
        assert_eq!(3, registry.buffer(0).capacity());
        assert_eq!(
            vec!["arr_flat"],
            output.branch_names().collect::<Vec<_>>(),
        );
        assert_eq!(&Shape::Scalar, output.branch(0).shape());

        Ok(())
    }

    #[test]
    fn analyzer_missing_dimension_leaf_fails() -> crate::Result<()> {
        let mut tree = Tree::new("T", "T");
        tree.add_branch("m", LeafType::F64, Shape::VarArray("gone".into()));

        let mut output = Tree::new("out", "out");
        let mut registry = BufferRegistry::default();

        assert!(matches!(
            analyze_leaves(&mut tree, &mut output, &mut registry, &[0], &[0]),
            Err(Error::BranchMissing { .. }),
        ));

        Ok(())
    }
}
