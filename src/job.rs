// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Per-tree operation tag
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Action {
    Copy,
    Flatten,
    BpvSelection,
}

/// Everything the pipeline needs to know about one tree operation
#[derive(Debug, Clone)]
pub(crate) struct TreeJob {
    pub(crate) action: Action,

    /// Input tree key; `dir/tree` notation is accepted
    pub(crate) tree_in: String,

    /// Output tree name
    pub(crate) tree_out: String,

    /// Leaves carried into the output
    pub(crate) branch_selection: String,

    /// Flatten targets or BPV targets, depending on `action`
    pub(crate) op_selection: String,

    /// Event cut; empty means keep everything
    pub(crate) cut: String,

    /// Formula columns attached to this job, in registration order
    pub(crate) formulas: Vec<(String, String)>,
}
