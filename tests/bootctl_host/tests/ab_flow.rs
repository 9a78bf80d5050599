// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Integration tests for A/B slot selection across reboots
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 15 tests + 1 property
//!
//! TEST_SCOPE:
//!   - Ranking and retry countdown over consecutive boots
//!   - Rollback after an update never confirms
//!   - Checksum repair and schema rejection
//!   - Write failures during selection (power loss, read-only media)
//!   - Update agent flow through SlotManager
//!   - Neighbouring bytes of the misc partition
//!
//! TEST_SCENARIOS:
//!   - test_tries_break_priority_tie(): equal priority, more tries wins
//!   - test_exhausted_only_slot_fails(): tries=0 excluded despite success
//!   - test_corrupted_slot_never_selected(): verity flag overrides priority
//!   - test_rollback_after_unconfirmed_update(): countdown then fallback
//!   - test_confirmed_slot_stops_countdown(): no writes once successful
//!   - test_bad_crc_boots_from_defaults(): repaired block persisted
//!   - test_foreign_magic_left_untouched(): no write on unknown metadata
//!   - test_newer_version_rejected(): no write on newer schema
//!   - test_unreadable_partition(): read failure needs repair
//!   - test_write_failure_repeats_decision(): selection survives lost write
//!   - test_inspect_is_read_only(): dry run leaves storage alone
//!   - test_failed_update_agent_flow(): set-active, fail, roll back, retry
//!   - test_surrounding_bytes_preserved(): block neighbours survive
//!   - test_board_specific_offset(): 4 KiB blocks and offset
//!   - test_clamped_slot_count_persisted(): oversized nb_slot rewritten
//!   - prop_boot_attempts_bounded_by_tries(): countdown always terminates

use bootctl::{
    select_slot, BootControl, ControlStore, ManageError, SelectError, SelectMode, Slot,
    SlotManager, SlotMetadata, SlotSelector, StoreError, BOOT_CTRL_SIZE, MAX_PRIORITY, MAX_SLOTS,
    MAX_TRIES,
};
use bootctl_host::{
    control, control_bytes, control_offset, device_with, device_with_image, read_control, slot,
    BLOCK_SIZE, MISC,
};
use proptest::prelude::*;
use storage::{BlockError, MemBlockDevice, Partition};

#[test]
fn test_tries_break_priority_tie() {
    let mut dev = device_with(&control(&[slot(10, 3, false, false), slot(10, 5, false, false)]));

    assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::B));

    let after = read_control(&dev);
    assert!(after.is_sealed());
    assert_eq!(after.slots.get(0), Some(&slot(10, 3, false, false)));
    assert_eq!(after.slots.get(1), Some(&slot(10, 4, false, false)));
    assert_eq!(after.active_suffix(), Slot::B.control_suffix());
    assert_eq!(dev.writes(), 1);
}

#[test]
fn test_exhausted_only_slot_fails() {
    let mut dev = device_with(&control(&[slot(5, 0, true, false)]));
    let before = control_bytes(&dev);

    assert_eq!(select_slot(&mut dev, &MISC), Err(SelectError::NoBootableSlot));
    assert_eq!(control_bytes(&dev), before);
    assert_eq!(dev.writes(), 0);
}

#[test]
fn test_corrupted_slot_never_selected() {
    let mut dev = device_with(&control(&[slot(15, 7, true, true), slot(1, 1, false, false)]));
    assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::B));
    // B is out of tries now and A stays excluded.
    assert_eq!(select_slot(&mut dev, &MISC), Err(SelectError::NoBootableSlot));
}

#[test]
fn test_rollback_after_unconfirmed_update() {
    let mut dev = device_with(&control(&[
        slot(MAX_PRIORITY - 1, MAX_TRIES, true, false),
        slot(MAX_PRIORITY, MAX_TRIES, false, false),
    ]));

    for boot in 1..=MAX_TRIES {
        assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::B), "boot {boot}");
        let b = *read_control(&dev).slots.get(1).unwrap();
        assert_eq!(b.tries_remaining, MAX_TRIES - boot);
    }

    assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::A));
    let after = read_control(&dev);
    assert_eq!(after.active_suffix(), Slot::A.control_suffix());
    assert_eq!(after.slots.get(0).unwrap().tries_remaining, MAX_TRIES);
    assert!(!after.slots.get(1).unwrap().is_bootable());
}

#[test]
fn test_confirmed_slot_stops_countdown() {
    let mut dev = device_with(&control(&[slot(15, 7, false, false), slot(14, 7, false, false)]));

    assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::A));
    SlotManager::new(&mut dev, MISC).mark_successful(Slot::A).unwrap();
    let writes = dev.writes();

    for _ in 0..10 {
        assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::A));
    }
    assert_eq!(dev.writes(), writes);
    assert_eq!(read_control(&dev).slots.get(0), Some(&slot(15, 6, true, false)));
}

#[test]
fn test_bad_crc_boots_from_defaults() {
    let mut image = control(&[slot(3, 1, false, false), slot(9, 2, false, false)]).to_image();
    image[BOOT_CTRL_SIZE - 1] ^= 0x5A;
    let mut dev = device_with_image(&image);

    assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::A));

    let after = read_control(&dev);
    assert!(after.is_sealed());
    assert_eq!(after.slots.len(), MAX_SLOTS);
    assert_eq!(after.slots.get(0), Some(&slot(MAX_PRIORITY, MAX_TRIES - 1, false, false)));
    for idx in 1..MAX_SLOTS {
        assert_eq!(after.slots.get(idx), Some(&SlotMetadata::DEFAULT));
    }
    assert_eq!(after.reserved0, [0; 4]);
    assert_eq!(after.reserved1, [0; 8]);
}

#[test]
fn test_foreign_magic_left_untouched() {
    let mut foreign = control(&[slot(15, 7, false, false), slot(15, 7, false, false)]);
    foreign.magic = 0x4D49_5343;
    foreign.seal();
    let mut dev = device_with(&foreign);
    let before = control_bytes(&dev);

    assert_eq!(
        select_slot(&mut dev, &MISC),
        Err(SelectError::UnknownMetadata { magic: 0x4D49_5343 })
    );
    assert_eq!(control_bytes(&dev), before);
    assert_eq!(dev.writes(), 0);
}

#[test]
fn test_newer_version_rejected() {
    let mut newer = control(&[slot(15, 7, false, false)]);
    newer.version = 2;
    newer.seal();
    let mut dev = device_with(&newer);

    assert_eq!(
        select_slot(&mut dev, &MISC),
        Err(SelectError::UnsupportedVersion { version: 2 })
    );
    assert_eq!(dev.writes(), 0);
}

#[test]
fn test_unreadable_partition() {
    let mut dev = device_with(&BootControl::default());
    dev.fail_reads(true);
    assert_eq!(
        select_slot(&mut dev, &MISC),
        Err(SelectError::RepairNeeded(StoreError::Io(BlockError::IoError)))
    );

    let mut small = MemBlockDevice::new(BLOCK_SIZE, 4);
    let part = Partition::whole(&small);
    assert!(matches!(
        select_slot(&mut small, &part),
        Err(SelectError::RepairNeeded(StoreError::PartitionTooSmall { .. }))
    ));
}

#[test]
fn test_write_failure_repeats_decision() {
    let mut dev = device_with(&control(&[slot(10, 3, false, false), slot(10, 5, false, false)]));
    let before = control_bytes(&dev);

    dev.fail_writes(true);
    assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::B));
    assert_eq!(control_bytes(&dev), before);

    // Next boot sees the same metadata and charges the try again.
    dev.fail_writes(false);
    assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::B));
    assert_eq!(read_control(&dev).slots.get(1).unwrap().tries_remaining, 4);
}

#[test]
fn test_inspect_is_read_only() {
    let mut image = BootControl::default().to_image();
    image[0] ^= 0xFF;
    let mut dev = device_with_image(&image);
    let inspect = SlotSelector::default().with_mode(SelectMode::Inspect);

    assert_eq!(inspect.select(&mut dev, &MISC), Ok(Slot::A));
    assert_eq!(inspect.select(&mut dev, &MISC), Ok(Slot::A));
    assert_eq!(control_bytes(&dev), image.to_vec());
    assert_eq!(dev.writes(), 0);
}

#[test]
fn test_failed_update_agent_flow() {
    let mut dev = device_with_image(&[0u8; BOOT_CTRL_SIZE]);

    let mut manager = SlotManager::new(&mut dev, MISC);
    assert_eq!(manager.read(), Err(ManageError::Corrupt));
    manager.reset().unwrap();
    manager.mark_successful(Slot::A).unwrap();
    manager.set_active(Slot::B).unwrap();
    drop(manager);

    // The new slot never confirms; the bootloader falls back to A.
    for _ in 0..MAX_TRIES {
        assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::B));
    }
    assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::A));

    let mut manager = SlotManager::new(&mut dev, MISC);
    assert_eq!(manager.read().unwrap().is_bootable(Slot::B), Ok(false));
    assert_eq!(manager.mark_successful(Slot::B), Err(ManageError::SlotNotBootable(Slot::B)));

    // A second attempt starts from a full budget.
    manager.set_active(Slot::B).unwrap();
    drop(manager);
    assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::B));
    SlotManager::new(&mut dev, MISC).mark_successful(Slot::B).unwrap();

    let after = read_control(&dev);
    assert_eq!(after.slots.get(1), Some(&slot(MAX_PRIORITY, MAX_TRIES - 1, true, false)));
    assert_eq!(after.slots.get(0).unwrap().priority, MAX_PRIORITY - 1);
}

#[test]
fn test_surrounding_bytes_preserved() {
    let mut dev = device_with(&control(&[slot(15, 2, false, false), slot(0, 0, false, false)]));
    let offset = control_offset();
    let block_start = offset - offset % BLOCK_SIZE;
    dev.write_bytes(0, &[0xEE; BLOCK_SIZE]);
    dev.write_bytes(block_start - 16, &[0x11; 16]);
    dev.write_bytes(offset + BOOT_CTRL_SIZE, &[0x22; 64]);

    assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::A));

    assert_eq!(dev.read_bytes(0, BLOCK_SIZE), vec![0xEE; BLOCK_SIZE]);
    assert_eq!(dev.read_bytes(block_start - 16, 16), vec![0x11; 16]);
    assert_eq!(dev.read_bytes(offset + BOOT_CTRL_SIZE, 64), vec![0x22; 64]);
    assert_eq!(read_control(&dev).slots.get(0).unwrap().tries_remaining, 1);
}

#[test]
fn test_board_specific_offset() {
    let mut dev = MemBlockDevice::new(4096, 8);
    let part = Partition::new(2, 4);
    let image = control(&[slot(4, 1, false, false), slot(8, 1, false, false)]).to_image();
    dev.write_bytes(3 * 4096, &image);

    let selector = SlotSelector::new(ControlStore::at(4096));
    assert_eq!(selector.select(&mut dev, &part), Ok(Slot::B));
    assert_eq!(
        select_slot(&mut dev, &part),
        Err(SelectError::RepairNeeded(StoreError::Misaligned { offset: 2048, block_size: 4096 }))
    );

    let after = BootControl::decode(&dev.read_bytes(3 * 4096, BOOT_CTRL_SIZE)).unwrap().control;
    assert_eq!(after.slots.get(1).unwrap().tries_remaining, 0);
}

#[test]
fn test_clamped_slot_count_persisted() {
    let mut image = control(&[slot(15, 7, true, false), slot(14, 7, true, false)]).to_image();
    image[8..12].copy_from_slice(&9u32.to_le_bytes());
    let crc = crc32fast::hash(&image[..BOOT_CTRL_SIZE - 4]);
    image[BOOT_CTRL_SIZE - 4..].copy_from_slice(&crc.to_le_bytes());
    let mut dev = device_with_image(&image);

    assert_eq!(select_slot(&mut dev, &MISC), Ok(Slot::A));
    assert_eq!(dev.writes(), 1);
    let after = read_control(&dev);
    assert!(after.is_sealed());
    assert_eq!(after.slots.len(), MAX_SLOTS);
}

fn unconfirmed_slot() -> impl Strategy<Value = SlotMetadata> {
    (0..=MAX_PRIORITY, 0..=MAX_TRIES, any::<bool>())
        .prop_map(|(priority, tries, corrupted)| slot(priority, tries, false, corrupted))
}

proptest! {
    #[test]
    fn prop_boot_attempts_bounded_by_tries(
        slots in prop::collection::vec(unconfirmed_slot(), 1..=MAX_SLOTS)
    ) {
        let budget: usize = slots
            .iter()
            .filter(|meta| meta.is_bootable())
            .map(|meta| meta.tries_remaining as usize)
            .sum();
        let mut dev = device_with(&control(&slots));

        let mut boots = 0;
        while let Ok(chosen) = select_slot(&mut dev, &MISC) {
            prop_assert!(chosen.index() < slots.len());
            boots += 1;
            prop_assert!(boots <= budget);
        }
        prop_assert_eq!(boots, budget);
        prop_assert_eq!(select_slot(&mut dev, &MISC), Err(SelectError::NoBootableSlot));
    }
}
