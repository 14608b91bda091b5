// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Derived-column sink: populates a formula branch on an already-built
//! tree.
//!
//! A formula references leaves as `#identifier`. The identifiers are
//! indexed by sorted order, each token is substituted by its `[k]`
//! parameter reference, and the expression is evaluated once per event
//! against the bound leaf values.

use crate::{expr::ParamScope, file::tree::Tree, Error, Expr};
use regex::Regex;
use rustc_hash::FxHashMap;
use std::{collections::BTreeSet, fmt::Write, sync::OnceLock};

fn leaf_token_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();

    PATTERN.get_or_init(|| {
        // NOTE: The pattern is a constant and always compiles
        #[allow(clippy::expect_used)]
        Regex::new(r"#[A-Za-z_][A-Za-z0-9_]*").expect("pattern is valid")
    })
}

/// Extracts the `#identifier` tokens of `formula`, substituting each by
/// the `[k]` reference of its sorted-order index.
///
/// Returns the substituted text and the identifiers (without `#`) in
/// index order.
pub(crate) fn extract_parameters(formula: &str) -> (String, Vec<String>) {
    let pattern = leaf_token_regex();

    let tokens: BTreeSet<&str> = pattern.find_iter(formula).map(|m| m.as_str()).collect();
    let index: FxHashMap<&str, usize> = tokens.iter().enumerate().map(|(k, t)| (*t, k)).collect();

    // One left-to-right pass; replacing token by token would corrupt
    // identifiers that are prefixes of longer ones
    let mut text = String::with_capacity(formula.len());
    let mut tail = 0;

    for token in pattern.find_iter(formula) {
        text.push_str(&formula[tail..token.start()]);

        // NOTE: Writing into a String never fails
        #[allow(clippy::expect_used)]
        write!(text, "[{}]", index[token.as_str()]).expect("cannot fail");

        tail = token.end();
    }

    text.push_str(&formula[tail..]);

    let names = tokens
        .into_iter()
        .map(|t| t.trim_start_matches('#').to_string())
        .collect();

    (text, names)
}

/// Adds (or replaces) the `f64` column `name` holding `formula`
/// evaluated per event.
pub(crate) fn add_formula_branch(tree: &mut Tree, name: &str, formula: &str) -> crate::Result<()> {
    let (text, idents) = extract_parameters(formula);
    let expr = Expr::parse(&text)?;

    log::debug!("formula column {name:?} evaluates {text:?} over {idents:?}");

    // Bind a reader for every referenced leaf
    let mut readers = Vec::with_capacity(idents.len());

    for ident in &idents {
        let idx = tree
            .branch_index(ident)
            .ok_or_else(|| Error::BranchMissing {
                tree: tree.name().into(),
                branch: ident.clone(),
            })?;
        readers.push(idx);
    }

    let mut column = Vec::with_capacity(tree.n_events() as usize);
    let mut params = vec![0.0; readers.len()];

    for event in 0..tree.n_events() {
        for (k, &branch) in readers.iter().enumerate() {
            params[k] = tree.value_as_f64(branch, event);
        }

        column.push(expr.eval(&ParamScope(&params))?);
    }

    tree.put_f64_column(name, &column)
}
