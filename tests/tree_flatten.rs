mod fixtures;

use fixtures::{scalar_column, write_vertex_file};
use ranger::{LeafType, Ranger, Shape, Tree, TreeFile};
use test_log::test;

#[test]
fn flatten_expands_rows() -> ranger::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.rng");
    let output = dir.path().join("out.rng");

    write_vertex_file(&input)?;

    let mut ranger = Ranger::new(&input);
    ranger.flatten_tree("T", "(n|m|chi)", "(m|chi)", "", "T");
    ranger.run(&output)?;

    let tree = TreeFile::open(&output)?.tree("T")?;

    assert_eq!(
        vec!["n", "m_flat", "chi_flat", "array_length"],
        tree.branch_names().collect::<Vec<_>>(),
    );

    // One row per array element, scalars repeated
    assert_eq!(vec![2.0, 2.0, 1.0], scalar_column(&tree, "n"));
    assert_eq!(vec![10.0, 20.0, 30.0], scalar_column(&tree, "m_flat"));
    assert_eq!(vec![0.5, 0.9, 0.1], scalar_column(&tree, "chi_flat"));
    assert_eq!(vec![0.0, 1.0, 0.0], scalar_column(&tree, "array_length"));

    Ok(())
}

#[test]
fn flatten_row_count_conserved() -> ranger::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.rng");
    let output = dir.path().join("out.rng");

    // Events with n = 3, 0, 1; an empty array still emits one row
    let mut tree = Tree::new("T", "T");
    let n = tree.add_branch("n", LeafType::I32, Shape::Scalar);
    let v = tree.add_branch("v", LeafType::F64, Shape::VarArray("n".into()));

    tree.push_values(n, &[3_i32])?;
    tree.push_values(v, &[1.0_f64, 2.0, 3.0])?;
    tree.commit_event()?;

    tree.push_values(n, &[0_i32])?;
    tree.push_values(v, &[] as &[f64])?;
    tree.commit_event()?;

    tree.push_values(n, &[1_i32])?;
    tree.push_values(v, &[4.0_f64])?;
    tree.commit_event()?;

    let mut file = TreeFile::create(&input)?;
    file.put("T", tree)?;
    file.commit()?;

    let mut ranger = Ranger::new(&input);
    ranger.flatten_tree("T", "(n|v)", "v", "", "T");
    ranger.run(&output)?;

    let flat = TreeFile::open(&output)?.tree("T")?;

    // sum over events of max(1, n_e)
    assert_eq!(5, flat.n_events());
    assert_eq!(vec![3.0, 3.0, 3.0, 0.0, 1.0], scalar_column(&flat, "n"));

    // The empty array still emits one row carrying whatever slot 0
    // holds (the last shifted element of the previous event)
    assert_eq!(vec![1.0, 2.0, 3.0, 3.0, 4.0], scalar_column(&flat, "v_flat"));

    Ok(())
}

#[test]
fn flatten_with_cut_on_flattened_leaf() -> ranger::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.rng");
    let output = dir.path().join("out.rng");

    write_vertex_file(&input)?;

    let mut ranger = Ranger::new(&input);
    ranger.flatten_tree("T", "(n|m|chi)", "(m|chi)", "m_flat>15", "T");
    ranger.run(&output)?;

    let tree = TreeFile::open(&output)?.tree("T")?;

    assert_eq!(vec![20.0, 30.0], scalar_column(&tree, "m_flat"));
    assert_eq!(vec![0.9, 0.1], scalar_column(&tree, "chi_flat"));

    Ok(())
}

#[test]
fn flatten_const_array_follows_alignment() -> ranger::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.rng");
    let output = dir.path().join("out.rng");

    // A constant-length array flattened alongside a variable one
    let mut tree = Tree::new("T", "T");
    let n = tree.add_branch("n", LeafType::I32, Shape::Scalar);
    let v = tree.add_branch("v", LeafType::F64, Shape::VarArray("n".into()));
    let k = tree.add_branch("k", LeafType::I32, Shape::ConstArray(2));

    tree.push_values(n, &[2_i32])?;
    tree.push_values(v, &[1.0_f64, 2.0])?;
    tree.push_values(k, &[7_i32, 8])?;
    tree.commit_event()?;

    let mut file = TreeFile::create(&input)?;
    file.put("T", tree)?;
    file.commit()?;

    let mut ranger = Ranger::new(&input);
    ranger.flatten_tree("T", "(n|v|k)", "(v|k)", "", "T");
    ranger.run(&output)?;

    let flat = TreeFile::open(&output)?.tree("T")?;

    assert_eq!(2, flat.n_events());
    assert_eq!(vec![1.0, 2.0], scalar_column(&flat, "v_flat"));
    assert_eq!(vec![7.0, 8.0], scalar_column(&flat, "k_flat"));

    Ok(())
}

#[test]
fn flatten_keeps_unselected_arrays_intact() -> ranger::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.rng");
    let output = dir.path().join("out.rng");

    write_vertex_file(&input)?;

    let mut ranger = Ranger::new(&input);
    ranger.flatten_tree("T", "(n|m|chi)", "m", "", "T");
    ranger.run(&output)?;

    let tree = TreeFile::open(&output)?.tree("T")?;

    let chi = tree.branch_index("chi").ok_or(ranger::Error::BranchMissing {
        tree: "T".into(),
        branch: "chi".into(),
    })?;

    // chi was not flattened: each output row repeats the full array
    assert_eq!(3, tree.n_events());
    assert_eq!(vec![0.5, 0.9], tree.values_at::<f64>(chi, 0)?);
    assert_eq!(vec![0.5, 0.9], tree.values_at::<f64>(chi, 1)?);
    assert_eq!(vec![0.1], tree.values_at::<f64>(chi, 2)?);

    Ok(())
}

#[test]
fn flatten_zero_event_input() -> ranger::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.rng");
    let output = dir.path().join("out.rng");

    let mut tree = Tree::new("T", "T");
    tree.add_branch("n", LeafType::I32, Shape::Scalar);
    tree.add_branch("v", LeafType::F64, Shape::VarArray("n".into()));

    let mut file = TreeFile::create(&input)?;
    file.put("T", tree)?;
    file.commit()?;

    let mut ranger = Ranger::new(&input);
    ranger.flatten_tree("T", "(n|v)", "v", "", "T");
    ranger.run(&output)?;

    let flat = TreeFile::open(&output)?.tree("T")?;
    assert_eq!(0, flat.n_events());

    Ok(())
}
