// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The tree-file container: named trees in a single random-access file.

pub mod tree;

use crate::{
    coding::{read_str, write_str, Decode, DecodeError, Encode, EncodeError},
    Checksum, Error,
};
use self::tree::Tree;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};
use varint_rs::{VarintReader, VarintWriter};

/// Magic bytes identifying a tree file (3 letters + format version)
pub const MAGIC_BYTES: [u8; 4] = [b'R', b'N', b'G', 1];

/// Fixed trailer: TOC offset + magic
const TRAILER_LEN: u64 = 12;

#[derive(Debug, Clone)]
struct TocEntry {
    path: String,
    offset: u64,
    length: u64,
    checksum: Checksum,
}

impl Encode for TocEntry {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        write_str(writer, &self.path)?;
        writer.write_u64::<BigEndian>(self.offset)?;
        writer.write_u64::<BigEndian>(self.length)?;
        writer.write_u64::<BigEndian>(*self.checksum)?;
        Ok(())
    }
}

impl Decode for TocEntry {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let path = read_str(reader)?;
        let offset = reader.read_u64::<BigEndian>()?;
        let length = reader.read_u64::<BigEndian>()?;
        let checksum = Checksum::from_raw(reader.read_u64::<BigEndian>()?);

        Ok(Self {
            path,
            offset,
            length,
            checksum,
        })
    }
}

/// A container of named trees with directory-style keys (`dir/tree`)
///
/// Mutations are staged in memory; [`TreeFile::commit`] atomically
/// rewrites the file, so an interrupted commit leaves the previous
/// revision intact and a committed file is always well-formed.
pub struct TreeFile {
    path: PathBuf,
    entries: Vec<TocEntry>,
    staged: Vec<(String, Vec<u8>)>,
    writable: bool,
}

impl TreeFile {
    /// Creates (or truncates) `path` as a valid empty container.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub fn create<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let mut file = Self {
            path: path.as_ref().into(),
            entries: Vec::new(),
            staged: Vec::new(),
            writable: true,
        };
        file.commit()?;

        Ok(file)
    }

    /// Opens `path` read-only.
    ///
    /// # Errors
    ///
    /// Fails when the file is absent, unreadable or malformed.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        Self::load(path.as_ref(), false)
    }

    /// Opens `path` for update; mutations apply on [`TreeFile::commit`].
    ///
    /// # Errors
    ///
    /// Fails when the file is absent, unreadable or malformed.
    pub fn update<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        Self::load(path.as_ref(), true)
    }

    fn load(path: &Path, writable: bool) -> crate::Result<Self> {
        let mut file = BufReader::new(File::open(path)?);

        let len = file.seek(SeekFrom::End(0))?;
        if len < MAGIC_BYTES.len() as u64 + TRAILER_LEN {
            return Err(DecodeError::InvalidHeader("TreeFile").into());
        }

        file.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; MAGIC_BYTES.len()];
        file.read_exact(&mut magic)?;

        if magic != MAGIC_BYTES {
            return Err(DecodeError::InvalidHeader("TreeFile").into());
        }

        #[allow(clippy::cast_possible_wrap)]
        file.seek(SeekFrom::End(-(TRAILER_LEN as i64)))?;
        let toc_offset = file.read_u64::<BigEndian>()?;
        file.read_exact(&mut magic)?;

        if magic != MAGIC_BYTES || toc_offset > len - TRAILER_LEN {
            return Err(DecodeError::InvalidHeader("TreeFileTrailer").into());
        }

        file.seek(SeekFrom::Start(toc_offset))?;
        let count = file.read_u32_varint()?;

        let mut entries = Vec::with_capacity(count as usize);

        for _ in 0..count {
            entries.push(TocEntry::decode_from(&mut file)?);
        }

        Ok(Self {
            path: path.into(),
            entries,
            staged: Vec::new(),
            writable,
        })
    }

    /// Returns all keys, committed then staged, in stable order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(|e| e.path.as_str())
            .chain(self.staged.iter().map(|(k, _)| k.as_str()))
    }

    /// Whether a tree is stored at `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.keys().any(|k| k == key)
    }

    /// Whether any key lives under `dir/`.
    #[must_use]
    pub fn has_directory(&self, dir: &str) -> bool {
        self.keys()
            .any(|k| k.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/')))
    }

    /// Reads, checksum-verifies and decodes the tree at `key`.
    ///
    /// # Errors
    ///
    /// Fails when the key is absent, the block checksum does not match
    /// or the block is malformed.
    pub fn tree(&self, key: &str) -> crate::Result<Tree> {
        if let Some((_, bytes)) = self.staged.iter().rev().find(|(k, _)| k == key) {
            return Ok(Tree::decode_from(&mut &bytes[..])?);
        }

        let entry = self
            .entries
            .iter()
            .find(|e| e.path == key)
            .ok_or_else(|| Error::PathMissing {
                file: self.path.display().to_string(),
                key: key.into(),
            })?;

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(entry.offset))?;

        #[allow(clippy::cast_possible_truncation)]
        let mut bytes = vec![0u8; entry.length as usize];
        file.read_exact(&mut bytes)?;

        let got = Checksum::from_bytes(&bytes);

        if got != entry.checksum {
            return Err(Error::ChecksumMismatch {
                got,
                expected: entry.checksum,
            });
        }

        Ok(Tree::decode_from(&mut &bytes[..])?)
    }

    /// Stages `tree` at `key`, replacing any existing tree there.
    ///
    /// # Errors
    ///
    /// Fails when the file was opened read-only.
    pub fn put(&mut self, key: &str, tree: Tree) -> crate::Result<()> {
        self.check_writable()?;

        let bytes = tree.encode_into_vec();
        self.remove_key(key);
        self.staged.push((key.into(), bytes));

        Ok(())
    }

    /// Removes every key matched by `predicate`.
    ///
    /// # Errors
    ///
    /// Fails when the file was opened read-only.
    pub fn delete_matching<F: Fn(&str) -> bool>(&mut self, predicate: F) -> crate::Result<()> {
        self.check_writable()?;

        self.entries.retain(|e| !predicate(&e.path));
        self.staged.retain(|(k, _)| !predicate(k));

        Ok(())
    }

    fn remove_key(&mut self, key: &str) {
        self.entries.retain(|e| e.path != key);
        self.staged.retain(|(k, _)| k != key);
    }

    fn check_writable(&self) -> crate::Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "tree file is read-only",
            )))
        }
    }

    /// Atomically rewrites the file with all staged mutations applied.
    ///
    /// # Errors
    ///
    /// Fails when the file was opened read-only or the rewrite fails;
    /// the previous revision stays intact in that case.
    pub fn commit(&mut self) -> crate::Result<()> {
        self.check_writable()?;

        let folder = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut temp = tempfile::NamedTempFile::new_in(folder)?;

        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            writer.write_all(&MAGIC_BYTES)?;

            let mut offset = MAGIC_BYTES.len() as u64;
            let mut toc = Vec::with_capacity(self.entries.len() + self.staged.len());

            // Surviving blocks are copied byte-for-byte from the previous revision
            if !self.entries.is_empty() {
                let mut old = File::open(&self.path)?;

                for entry in &self.entries {
                    old.seek(SeekFrom::Start(entry.offset))?;

                    #[allow(clippy::cast_possible_truncation)]
                    let mut bytes = vec![0u8; entry.length as usize];
                    old.read_exact(&mut bytes)?;
                    writer.write_all(&bytes)?;

                    toc.push(TocEntry {
                        path: entry.path.clone(),
                        offset,
                        length: entry.length,
                        checksum: entry.checksum,
                    });
                    offset += entry.length;
                }
            }

            for (key, bytes) in &self.staged {
                writer.write_all(bytes)?;

                toc.push(TocEntry {
                    path: key.clone(),
                    offset,
                    length: bytes.len() as u64,
                    checksum: Checksum::from_bytes(bytes),
                });
                offset += bytes.len() as u64;
            }

            #[allow(clippy::cast_possible_truncation)]
            writer.write_u32_varint(toc.len() as u32)?;

            for entry in &toc {
                entry.encode_into(&mut writer)?;
            }

            writer.write_u64::<BigEndian>(offset)?;
            writer.write_all(&MAGIC_BYTES)?;
            writer.flush()?;

            self.entries = toc;
            self.staged.clear();
        }

        temp.as_file_mut().sync_all()?;
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        fsync_directory(folder)?;

        log::trace!(
            "committed {} tree(s) to {:?}",
            self.entries.len(),
            self.path,
        );

        Ok(())
    }
}

#[cfg(not(target_os = "windows"))]
fn fsync_directory(path: &Path) -> std::io::Result<()> {
    let file = File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
fn fsync_directory(_path: &Path) -> std::io::Result<()> {
    // Cannot fsync directory on Windows
    Ok(())
}
