// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The four per-tree operations and their shared post-processing.

use crate::{
    analyzer,
    file::tree::Tree,
    formula,
    job::{Action, TreeJob},
    registry::BufferRegistry,
    selector, Error, Expr, LeafType, TreeFile,
};
use std::path::{Path, PathBuf};

/// Spill-file key suffix of flatten intermediates
pub(crate) const FLAT_SUFFIX: &str = "_ROOTRANGER_FLAT";

/// Spill-file key suffix of BPV intermediates
pub(crate) const BPV_SUFFIX: &str = "_ROOTRANGER_BPV";

/// Title marker stamped on every committed tree
pub(crate) const TREE_TITLE: &str = "root_ranger_tree";

/// Auxiliary flatten column holding the array element index of each row
const ARRAY_LENGTH_BRANCH: &str = "array_length";

/// Executes tree jobs against the input, spill and output files
///
/// Every operation opens the input file itself; no handle is cached
/// across jobs.
pub(crate) struct JobExecutor {
    input_path: PathBuf,
    output_path: PathBuf,
    temp_path: PathBuf,
    max_tree_size: u64,
    registry: BufferRegistry,
}

impl JobExecutor {
    pub(crate) fn new(
        input_path: &Path,
        output_path: &Path,
        temp_path: &Path,
        max_tree_size: u64,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            temp_path: temp_path.into(),
            max_tree_size,
            registry: BufferRegistry::default(),
        }
    }

    /// Runs one job and tears the buffer registry down afterwards.
    pub(crate) fn execute(&mut self, job: &TreeJob) -> crate::Result<()> {
        match job.action {
            Action::Copy => self.simple_copy(job)?,
            Action::Flatten => self.array_selection(job, true)?,
            Action::BpvSelection => self.array_selection(job, false)?,
        }

        self.registry.clear();

        Ok(())
    }

    /// Copies a tree, optionally restricted to selected leaves and cut
    /// events.
    fn simple_copy(&mut self, job: &TreeJob) -> crate::Result<()> {
        log::info!("copying tree {:?}", job.tree_in);

        let infile = TreeFile::open(&self.input_path)?;
        let mut input = infile.tree(&job.tree_in)?;

        if job.branch_selection.is_empty() {
            input.set_all_active(true);
        } else {
            input.set_all_active(false);

            for idx in selector::list_matching(&input, &job.branch_selection)? {
                input.set_active(idx, true);
            }
        }

        let output = if job.cut.is_empty() {
            input.clone_active()
        } else {
            let cut = Expr::parse(&job.cut)?;
            input.filter_rows(&cut)?
        };

        self.add_branches_and_cuts(job, output, true)
    }

    /// Flatten and BPV selection share everything but the inner loop:
    /// flatten emits one row per array element, BPV only element 0.
    fn array_selection(&mut self, job: &TreeJob, flatten: bool) -> crate::Result<()> {
        log::info!(
            "{} on tree {:?}",
            if flatten { "flattening" } else { "BPV selection" },
            job.tree_in,
        );

        let infile = TreeFile::open(&self.input_path)?;
        let mut input = infile.tree(&job.tree_in)?;

        let intermediate = format!(
            "{}{}",
            job.tree_out,
            if flatten { FLAT_SUFFIX } else { BPV_SUFFIX },
        );
        let mut output = Tree::new(&intermediate, &intermediate);

        let all_leaves = selector::list_matching(&input, &job.branch_selection)?;
        let sel_leaves = selector::list_matching(&input, &job.op_selection)?;

        let analysis = analyzer::analyze_leaves(
            &mut input,
            &mut output,
            &mut self.registry,
            &all_leaves,
            &sel_leaves,
        )?;

        // The alignment leaf's per-event value bounds the inner loop
        let alignment = match &analysis.alignment {
            Some(dim) => {
                let idx = input
                    .branch_index(dim)
                    .ok_or_else(|| Error::BranchMissing {
                        tree: input.name().into(),
                        branch: dim.clone(),
                    })?;
                input.set_active(idx, true);
                Some(idx)
            }
            None => None,
        };

        let counter = if flatten {
            let idx = self.registry.append(LeafType::U32, 1, false);
            self.registry.bind_output(idx, &mut output, ARRAY_LENGTH_BRANCH);
            Some(idx)
        } else {
            None
        };

        for event in 0..input.n_events() {
            input.read_event(event, &mut self.registry);

            if let Some(idx) = counter {
                self.registry.set_counter(idx, 0);
            }

            self.registry.fill_into(&mut output)?;

            if flatten {
                let max_len = alignment.map_or(1, |idx| input.value_as_i64(idx, event));

                for i in 1..max_len {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    self.registry.step_all(i as usize);

                    if let Some(idx) = counter {
                        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                        self.registry.set_counter(idx, i as u32);
                    }

                    self.registry.fill_into(&mut output)?;
                }
            }
        }

        // Spill the intermediate, then post-process from the spill file
        self.check_size(&output)?;

        let mut spill = TreeFile::update(&self.temp_path)?;
        spill.put(&intermediate, output)?;
        spill.commit()?;

        let produced = spill.tree(&intermediate)?;

        self.add_branches_and_cuts(job, produced, false)
    }

    /// Applies pending formulas and the cut, stamps name and title, and
    /// commits the tree to the output file.
    fn add_branches_and_cuts(
        &mut self,
        job: &TreeJob,
        mut tree: Tree,
        direct_copy: bool,
    ) -> crate::Result<()> {
        for (name, text) in &job.formulas {
            formula::add_formula_branch(&mut tree, name, text)?;
        }

        if !job.cut.is_empty() && !direct_copy {
            let cut = Expr::parse(&job.cut)?;
            tree = tree.filter_rows(&cut)?;
        }

        tree.set_name(&job.tree_out);
        tree.set_title(TREE_TITLE);

        self.check_size(&tree)?;

        let mut out = TreeFile::update(&self.output_path)?;
        out.delete_matching(|key| key.ends_with(FLAT_SUFFIX) || key.ends_with(BPV_SUFFIX))?;
        out.put(&job.tree_out, tree)?;
        out.commit()
    }

    fn check_size(&self, tree: &Tree) -> crate::Result<()> {
        let size = tree.payload_size();

        if size > self.max_tree_size {
            return Err(Error::TreeTooLarge {
                size,
                limit: self.max_tree_size,
            });
        }

        Ok(())
    }
}
