// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A tree-transform engine for columnar event-data files.
//!
//! An input file contains one or more named *trees*; each tree is a
//! record-stream whose columns (*leaves*) carry scalar or
//! variable-length-array values of a fixed primitive numeric type.
//! Against such a file, a [`Ranger`] queues a batch of *tree jobs* —
//! copy, event cut, array flattening, best-primary-vertex (BPV)
//! selection and derived formula columns — and a single [`Ranger::run`]
//! emits one output file containing the transformed trees.
//!
//! Jobs execute strictly in queue order against a temporary spill file
//! and the final output file; each tree-producing job commits to the
//! output before the next one begins, so an aborted run preserves
//! whatever was already committed.
//!
//! # Example usage
//!
//! ```
//! use ranger::{LeafType, Ranger, Shape, Tree, TreeFile};
//! #
//! # let dir = tempfile::tempdir()?;
//! # let input = dir.path().join("events.rng");
//! # let output = dir.path().join("slim.rng");
//!
//! // Write a tree with a single i32 leaf
//! let mut tree = Tree::new("events", "events");
//! let x = tree.add_branch("x", LeafType::I32, Shape::Scalar);
//!
//! for value in [1_i32, 2, 3, 4, 5] {
//!     tree.push_values(x, &[value])?;
//!     tree.commit_event()?;
//! }
//!
//! let mut file = TreeFile::create(&input)?;
//! file.put("events", tree)?;
//! file.commit()?;
//!
//! // Copy it with an event cut and a derived column
//! let mut ranger = Ranger::new(&input);
//! ranger.tree_copy("events", "", "x>2", "slim");
//! ranger.add_formula("y", "#x*#x");
//! ranger.run(&output)?;
//!
//! let out = TreeFile::open(&output)?;
//! let slim = out.tree("slim")?;
//! assert_eq!(3, slim.n_events());
//! #
//! # Ok::<(), ranger::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::module_name_repetitions)]

mod analyzer;

#[doc(hidden)]
pub mod buffer;

mod checksum;
mod coding;
mod error;
mod executor;

#[doc(hidden)]
pub mod expr;

mod file;
mod formula;
mod job;
mod leaf_type;
mod pipeline;
mod primitive;

#[doc(hidden)]
pub mod registry;

#[doc(hidden)]
pub mod selector;

mod time;

#[doc(hidden)]
pub use {
    expr::{Expr, ExprError, ParamScope, Scope},
    registry::BufferRegistry,
};

pub use {
    buffer::{AnyLeafBuffer, LeafBuffer},
    checksum::Checksum,
    coding::{Decode, DecodeError, Encode, EncodeError},
    error::{Error, Result},
    file::{
        tree::{Branch, Shape, Tree},
        TreeFile, MAGIC_BYTES,
    },
    leaf_type::LeafType,
    pipeline::{Ranger, DEFAULT_MAX_TREE_SIZE, FILE_EXTENSION},
    primitive::Primitive,
};
