// Not every integration test uses every fixture
#![allow(dead_code)]

use ranger::{LeafType, Shape, Tree, TreeFile};
use std::path::Path;

/// Writes a tree `T` with a single `x:i32` leaf holding `values`.
pub fn write_scalar_file(path: &Path, values: &[i32]) -> ranger::Result<()> {
    let mut tree = Tree::new("T", "T");
    let x = tree.add_branch("x", LeafType::I32, Shape::Scalar);

    for &value in values {
        tree.push_values(x, &[value])?;
        tree.commit_event()?;
    }

    let mut file = TreeFile::create(path)?;
    file.put("T", tree)?;
    file.commit()?;

    Ok(())
}

/// Writes a tree `T` with leaves `{n:i32, m:f64[n], chi:f64[n]}` holding
/// the events `(2, [10,20], [0.5,0.9])` and `(1, [30], [0.1])`.
pub fn write_vertex_file(path: &Path) -> ranger::Result<()> {
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

    let mut file = TreeFile::create(path)?;
    file.put("T", tree)?;
    file.commit()?;

    Ok(())
}

/// Reads column `branch` of `tree` as one `f64` per event (element 0).
pub fn scalar_column(tree: &Tree, branch: &str) -> Vec<f64> {
    let idx = tree.branch_index(branch).unwrap_or_else(|| {
        panic!("no branch {branch:?} in tree {:?}", tree.name());
    });

    (0..tree.n_events())
        .map(|event| tree.value_as_f64(idx, event))
        .collect()
}
