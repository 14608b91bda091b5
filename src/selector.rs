// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Branch-name selection: literal, wildcard or regular expression.

use crate::Tree;
use regex::Regex;

/// Compiled branch-name selection
pub enum Matcher {
    /// Matches nothing (empty selection)
    Nothing,

    /// Matches one leaf name exactly
    Literal(String),

    /// Matches leaf names against an anchored pattern
    Pattern(Regex),
}

impl Matcher {
    /// Whether `name` is selected.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Nothing => false,
            Self::Literal(literal) => literal == name,
            Self::Pattern(pattern) => pattern.is_match(name),
        }
    }
}

/// Compiles a selection string into a [`Matcher`].
///
/// Rules, applied in order after stripping all whitespace:
///
/// 1. an empty selection matches nothing,
/// 2. `(…)` is a regular expression matched against the full leaf name,
/// 3. a selection containing `*` is a wildcard pattern; each `*` matches
///    one or more word characters, everything else is literal,
/// 4. anything else must equal the leaf name exactly.
///
/// A literal name that itself begins with `(` and ends with `)` is
/// indistinguishable from rule 2 and is treated as a regex.
///
/// # Errors
///
/// Fails when a rule-2 or rule-3 pattern does not compile.
pub fn compile(selection: &str) -> crate::Result<Matcher> {
    let selection: String = selection.chars().filter(|c| !c.is_whitespace()).collect();

    if selection.is_empty() {
        return Ok(Matcher::Nothing);
    }

    if selection.len() >= 2 && selection.starts_with('(') && selection.ends_with(')') {
        return Ok(Matcher::Pattern(Regex::new(&format!("^{selection}$"))?));
    }

    if selection.contains('*') {
        let mut pattern = String::from("^");

        for (i, part) in selection.split('*').enumerate() {
            if i > 0 {
                pattern.push_str(r"[\w\d_]+");
            }
            pattern.push_str(&regex::escape(part));
        }

        pattern.push('$');

        return Ok(Matcher::Pattern(Regex::new(&pattern)?));
    }

    Ok(Matcher::Literal(selection))
}

/// Returns the indices of the leaves matching `selection`, preserving
/// the tree's natural leaf order.
///
/// # Errors
///
/// Fails when the selection does not compile.
pub fn list_matching(tree: &Tree, selection: &str) -> crate::Result<Vec<usize>> {
    let matcher = compile(selection)?;

    Ok(tree
        .branch_names()
        .enumerate()
        .filter(|(_, name)| matcher.matches(name))
        .map(|(idx, _)| idx)
        .collect())
}
