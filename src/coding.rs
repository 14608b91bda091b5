// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Error during serialization
#[derive(Debug)]
pub enum EncodeError {
    /// I/O error
    Io(std::io::Error),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EncodeError({})",
            match self {
                Self::Io(e) => e.to_string(),
            }
        )
    }
}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
        }
    }
}

/// Error during deserialization
#[derive(Debug)]
pub enum DecodeError {
    /// I/O error
    Io(std::io::Error),

    /// Invalid magic bytes or trailer
    InvalidHeader(&'static str),

    /// Invalid enum tag (name, value)
    InvalidTag((&'static str, u8)),

    /// A leaf's primitive type code is outside the closed set
    UnknownLeafType(u8),

    /// A column payload or offsets table has an inconsistent length
    InvalidLength(&'static str),

    /// A name is not valid UTF-8
    Utf8(std::string::FromUtf8Error),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecodeError({self:?})")
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<std::string::FromUtf8Error> for DecodeError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        Self::Utf8(value)
    }
}

impl std::error::Error for DecodeError {}

/// Trait to serialize stuff
pub trait Encode {
    /// Serializes into writer.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying writer fails.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError>;

    /// Serializes into vector.
    #[must_use]
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut v = vec![];

        // NOTE: Writing into a Vec never fails
        #[allow(clippy::expect_used)]
        self.encode_into(&mut v).expect("cannot fail");

        v
    }
}

/// Trait to deserialize stuff
pub trait Decode {
    /// Deserializes from reader.
    ///
    /// # Errors
    ///
    /// Returns an error when the data is malformed or the reader fails.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError>
    where
        Self: Sized;
}

/// Writes a length-prefixed string.
pub(crate) fn write_str<W: Write>(writer: &mut W, s: &str) -> Result<(), EncodeError> {
    // NOTE: Names are user-defined identifiers, far below 32-bit length
    #[allow(clippy::cast_possible_truncation)]
    writer.write_u32_varint(s.len() as u32)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

/// Reads a length-prefixed string.
pub(crate) fn read_str<R: Read>(reader: &mut R) -> Result<String, DecodeError> {
    let len = reader.read_u32_varint()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn string_roundtrip() -> Result<(), DecodeError> {
        let mut bytes = vec![];
        write_str(&mut bytes, "B0_PX").map_err(|_| DecodeError::InvalidHeader("test"))?;

        assert_eq!("B0_PX", read_str(&mut &bytes[..])?);

        Ok(())
    }

    #[test]
    fn string_empty() -> Result<(), DecodeError> {
        let mut bytes = vec![];
        write_str(&mut bytes, "").map_err(|_| DecodeError::InvalidHeader("test"))?;

        assert_eq!([0], *bytes);
        assert_eq!("", read_str(&mut &bytes[..])?);

        Ok(())
    }
}
