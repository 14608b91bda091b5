// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    expr::ExprError,
    Checksum, LeafType,
};

/// Represents errors that can occur in the tree-transform engine
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// Invalid checksum value (got, expected)
    ChecksumMismatch {
        /// Checksum of the bytes read from disk
        got: Checksum,

        /// Checksum recorded in the table of contents
        expected: Checksum,
    },

    /// A directory or tree key is not present in the file
    PathMissing {
        /// The file that was searched
        file: String,

        /// The directory or tree key that was not found
        key: String,
    },

    /// A leaf referenced by name does not exist in the tree
    BranchMissing {
        /// The tree that was searched
        tree: String,

        /// The leaf name that was not found
        branch: String,
    },

    /// A value of the wrong primitive type was pushed into a branch
    TypeMismatch {
        /// The branch that was written to
        branch: String,

        /// The branch's primitive type
        expected: LeafType,

        /// The primitive type that was pushed
        got: LeafType,
    },

    /// An event payload does not match the branch's dimensionality
    ShapeMismatch {
        /// The offending branch
        branch: String,
    },

    /// A branch selection string could not be compiled
    Selection(regex::Error),

    /// A cut or formula expression could not be parsed or evaluated
    Formula(ExprError),

    /// An output tree's column payload exceeds the configured maximum
    TreeTooLarge {
        /// Column payload of the offending tree in bytes
        size: u64,

        /// Configured maximum in bytes
        limit: u64,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RangerError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<regex::Error> for Error {
    fn from(value: regex::Error) -> Self {
        Self::Selection(value)
    }
}

impl From<ExprError> for Error {
    fn from(value: ExprError) -> Self {
        Self::Formula(value)
    }
}

/// Engine result
pub type Result<T> = std::result::Result<T, Error>;
