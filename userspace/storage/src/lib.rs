// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Block device abstractions for boot-control storage
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests below + downstream bootctl tests
//!
//! PUBLIC API:
//!   - BlockDevice: raw block read/write trait with multi-block helpers
//!   - Partition: absolute block range on a device
//!   - MemBlockDevice: in-memory device with fault injection (tests, fixtures)
//!   - FileBlockDevice (std): device backed by a raw image file

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

#[cfg(feature = "std")]
mod file;
#[cfg(feature = "std")]
pub use file::FileBlockDevice;

/// Block device error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    /// Read/write failed or was short.
    #[error("block i/o error")]
    IoError,
    /// Block index out of range.
    #[error("block index out of range")]
    OutOfRange,
}

/// Abstract block device.
pub trait BlockDevice {
    /// Block size in bytes (typically 512).
    fn block_size(&self) -> usize;

    /// Total number of blocks.
    fn block_count(&self) -> u64;

    /// Read a single block into buffer.
    fn read_block(&self, block_idx: u64, buf: &mut [u8]) -> Result<(), BlockError>;

    /// Write a single block from buffer.
    fn write_block(&mut self, block_idx: u64, buf: &[u8]) -> Result<(), BlockError>;

    /// Flush all pending writes to durable storage.
    fn sync(&mut self) -> Result<(), BlockError>;

    /// Read `buf.len() / block_size` consecutive blocks starting at `start`.
    ///
    /// `buf` must hold a whole number of blocks; anything else is reported as
    /// a short transfer.
    fn read_blocks(&self, start: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        let block_size = self.block_size();
        if block_size == 0 || buf.len() % block_size != 0 {
            return Err(BlockError::IoError);
        }
        for (i, chunk) in buf.chunks_mut(block_size).enumerate() {
            let idx = start.checked_add(i as u64).ok_or(BlockError::OutOfRange)?;
            self.read_block(idx, chunk)?;
        }
        Ok(())
    }

    /// Write `buf.len() / block_size` consecutive blocks starting at `start`.
    fn write_blocks(&mut self, start: u64, buf: &[u8]) -> Result<(), BlockError> {
        let block_size = self.block_size();
        if block_size == 0 || buf.len() % block_size != 0 {
            return Err(BlockError::IoError);
        }
        for (i, chunk) in buf.chunks(block_size).enumerate() {
            let idx = start.checked_add(i as u64).ok_or(BlockError::OutOfRange)?;
            self.write_block(idx, chunk)?;
        }
        Ok(())
    }
}

/// A contiguous block range on a device, e.g. the misc partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// First block of the partition, absolute on the device.
    pub start: u64,
    /// Partition length in blocks.
    pub block_count: u64,
}

impl Partition {
    pub const fn new(start: u64, block_count: u64) -> Self {
        Self { start, block_count }
    }

    /// Partition spanning the whole device.
    pub fn whole<B: BlockDevice + ?Sized>(device: &B) -> Self {
        Self { start: 0, block_count: device.block_count() }
    }
}

/// In-memory block device for testing.
pub struct MemBlockDevice {
    block_size: usize,
    blocks: Vec<Vec<u8>>,
    fail_reads: bool,
    fail_writes: bool,
    writes: usize,
}

impl MemBlockDevice {
    /// Create a new memory block device with given block size and count.
    pub fn new(block_size: usize, block_count: u64) -> Self {
        let blocks = (0..block_count)
            .map(|_| vec![0u8; block_size])
            .collect();
        Self { block_size, blocks, fail_reads: false, fail_writes: false, writes: 0 }
    }

    /// Get raw access to storage (for corruption tests and fixtures).
    pub fn raw_storage_mut(&mut self) -> &mut [Vec<u8>] {
        &mut self.blocks
    }

    pub fn raw_storage(&self) -> &[Vec<u8>] {
        &self.blocks
    }

    /// Copy `data` into the device starting at absolute byte offset `offset`.
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            let pos = offset + i;
            self.blocks[pos / self.block_size][pos % self.block_size] = *byte;
        }
    }

    /// Read `len` bytes starting at absolute byte offset `offset`.
    pub fn read_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        (offset..offset + len)
            .map(|pos| self.blocks[pos / self.block_size][pos % self.block_size])
            .collect()
    }

    /// Make every subsequent block read fail.
    pub fn fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Make every subsequent block write fail.
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Number of successful block writes so far.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl BlockDevice for MemBlockDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn read_block(&self, block_idx: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        if self.fail_reads {
            return Err(BlockError::IoError);
        }
        let idx = usize::try_from(block_idx).map_err(|_| BlockError::OutOfRange)?;
        if idx >= self.blocks.len() {
            return Err(BlockError::OutOfRange);
        }
        if buf.len() < self.block_size {
            return Err(BlockError::IoError);
        }
        buf[..self.block_size].copy_from_slice(&self.blocks[idx]);
        Ok(())
    }

    fn write_block(&mut self, block_idx: u64, buf: &[u8]) -> Result<(), BlockError> {
        if self.fail_writes {
            return Err(BlockError::IoError);
        }
        let idx = usize::try_from(block_idx).map_err(|_| BlockError::OutOfRange)?;
        if idx >= self.blocks.len() {
            return Err(BlockError::OutOfRange);
        }
        if buf.len() < self.block_size {
            return Err(BlockError::IoError);
        }
        self.blocks[idx].copy_from_slice(&buf[..self.block_size]);
        self.writes += 1;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), BlockError> {
        // In-memory: no-op.
        Ok(())
    }
}
