// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Job queue and sequenced execution.

use crate::{
    executor::JobExecutor,
    job::{Action, TreeJob},
    time::unix_timestamp,
    Error, TreeFile,
};
use std::path::{Path, PathBuf};

/// Default cap on a single output tree's column payload, in bytes
pub const DEFAULT_MAX_TREE_SIZE: u64 = 1_000_000_000_000;

/// Canonical tree-file suffix
pub const FILE_EXTENSION: &str = "rng";

/// The tree-transform pipeline
///
/// Jobs are queued by the builder methods and executed in FIFO order by
/// [`Ranger::run`]. Tree-producing jobs (copy, flatten, BPV) each
/// commit to the output file before the next job begins; formula
/// columns attach to the most recently queued tree job.
pub struct Ranger {
    input_filename: PathBuf,
    tree_jobs: Vec<TreeJob>,
    formula_buffer: Vec<(String, String)>,
    max_tree_size: u64,
}

impl Ranger {
    /// Creates a pipeline reading from `input`.
    #[must_use]
    pub fn new<P: AsRef<Path>>(input: P) -> Self {
        Self {
            input_filename: input.as_ref().into(),
            tree_jobs: Vec::new(),
            formula_buffer: Vec::new(),
            max_tree_size: DEFAULT_MAX_TREE_SIZE,
        }
    }

    /// Replaces the input file used by [`Ranger::run`].
    pub fn set_input_file<P: AsRef<Path>>(&mut self, input: P) {
        self.input_filename = input.as_ref().into();
    }

    /// Caps the column payload of a single output tree.
    #[must_use]
    pub fn with_max_tree_size(mut self, bytes: u64) -> Self {
        self.max_tree_size = bytes;
        self
    }

    /// Queues a tree copy.
    ///
    /// An empty `branch_selection` keeps every leaf, an empty `cut`
    /// keeps every event and an empty `tree_out` reuses `tree_in`.
    pub fn tree_copy(&mut self, tree_in: &str, branch_selection: &str, cut: &str, tree_out: &str) {
        self.queue(TreeJob {
            action: Action::Copy,
            tree_in: tree_in.into(),
            tree_out: output_name(tree_in, tree_out),
            branch_selection: branch_selection.into(),
            op_selection: String::new(),
            cut: cut.into(),
            formulas: Vec::new(),
        });
    }

    /// Queues an array flattening: every leaf matched by
    /// `flat_branch_selection` is expanded to one output row per array
    /// element (scalars repeat), renamed with a `_flat` suffix.
    pub fn flatten_tree(
        &mut self,
        tree_in: &str,
        branch_selection: &str,
        flat_branch_selection: &str,
        cut: &str,
        tree_out: &str,
    ) {
        self.queue(TreeJob {
            action: Action::Flatten,
            tree_in: tree_in.into(),
            tree_out: output_name(tree_in, tree_out),
            branch_selection: branch_selection.into(),
            op_selection: flat_branch_selection.into(),
            cut: cut.into(),
            formulas: Vec::new(),
        });
    }

    /// Queues a best-primary-vertex selection: one output row per input
    /// row, keeping element 0 of every leaf matched by
    /// `bpv_branch_selection` (renamed with a `_flat` suffix).
    pub fn bpv_selection(
        &mut self,
        tree_in: &str,
        branch_selection: &str,
        bpv_branch_selection: &str,
        cut: &str,
        tree_out: &str,
    ) {
        self.queue(TreeJob {
            action: Action::BpvSelection,
            tree_in: tree_in.into(),
            tree_out: output_name(tree_in, tree_out),
            branch_selection: branch_selection.into(),
            op_selection: bpv_branch_selection.into(),
            cut: cut.into(),
            formulas: Vec::new(),
        });
    }

    /// Registers the formula column `name` on the most recently queued
    /// tree job.
    ///
    /// The formula references leaves as `#identifier`. Without a
    /// previous tree job the formula is reported and skipped.
    pub fn add_formula(&mut self, name: &str, formula: &str) {
        if self.tree_jobs.is_empty() {
            log::error!("a formula column needs a previous tree job; skipping {name:?}");
            return;
        }

        self.formula_buffer.push((name.into(), formula.into()));
    }

    fn queue(&mut self, job: TreeJob) {
        self.attach_pending_formulas();
        self.tree_jobs.push(job);
    }

    /// Drains the formula buffer onto the most recently queued tree job.
    fn attach_pending_formulas(&mut self) {
        if let Some(last) = self.tree_jobs.last_mut() {
            last.formulas.append(&mut self.formula_buffer);
        }
    }

    /// Runs all queued jobs in order, producing `output_filename`.
    ///
    /// The canonical `.rng` suffix is appended when missing. A unique
    /// temporary spill file is created next to the output and removed
    /// on clean return; on error it may remain, and output trees
    /// committed by earlier jobs are preserved.
    ///
    /// # Errors
    ///
    /// Fails when the input is absent or corrupt, a tree path does not
    /// exist, or any job fails.
    pub fn run<P: AsRef<Path>>(&mut self, output_filename: P) -> crate::Result<()> {
        self.attach_pending_formulas();

        let output_path = ensure_extension(output_filename.as_ref());
        let temp_path = temporary_file_name(&output_path);

        log::debug!("spill file is {temp_path:?}");

        TreeFile::create(&output_path)?;
        TreeFile::create(&temp_path)?;

        let mut executor = JobExecutor::new(
            &self.input_filename,
            &output_path,
            &temp_path,
            self.max_tree_size,
        );

        for job in &self.tree_jobs {
            self.job_validity_check(job)?;
            executor.execute(job)?;
        }

        std::fs::remove_file(&temp_path)?;

        Ok(())
    }

    /// Clears all queued jobs and pending formulas.
    pub fn reset(&mut self) {
        self.tree_jobs.clear();
        self.formula_buffer.clear();
    }

    /// Verifies that the job's input tree (and its directory, for
    /// `dir/tree` paths) exist before anything is executed.
    fn job_validity_check(&self, job: &TreeJob) -> crate::Result<()> {
        let file = TreeFile::open(&self.input_filename)?;

        if let Some((dir, _)) = job.tree_in.split_once('/') {
            if !file.has_directory(dir) {
                return Err(Error::PathMissing {
                    file: self.input_filename.display().to_string(),
                    key: dir.into(),
                });
            }
        }

        if !file.contains_key(&job.tree_in) {
            return Err(Error::PathMissing {
                file: self.input_filename.display().to_string(),
                key: job.tree_in.clone(),
            });
        }

        Ok(())
    }
}

fn output_name(tree_in: &str, tree_out: &str) -> String {
    if tree_out.is_empty() {
        tree_in.into()
    } else {
        tree_out.into()
    }
}

fn ensure_extension(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == FILE_EXTENSION) {
        path.into()
    } else {
        let mut name = path.as_os_str().to_os_string();
        name.push(".");
        name.push(FILE_EXTENSION);
        name.into()
    }
}

/// `<random_u64>_<unix_epoch_seconds><output_file_name>`, next to the
/// output file.
fn temporary_file_name(output: &Path) -> PathBuf {
    let file_name = output
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let unique = format!(
        "{}_{}{}",
        rand::random::<u64>(),
        unix_timestamp().as_secs(),
        file_name,
    );

    output.parent().map_or_else(
        || PathBuf::from(&unique),
        |parent| parent.join(&unique),
    )
}
