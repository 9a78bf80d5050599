// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: A/B boot control (slot selection, retry countdown, rollback)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests per module + integration tests (tests/bootctl_host)
//!   - control block layout, CRC and default initialization
//!   - block-aligned load/store on the misc partition
//!   - slot ranking, retry decrement, suffix update, best-effort store
//!   - update-agent slot management
//!
//! PUBLIC API:
//!   - select_slot / SlotSelector: boot-time slot choice
//!   - SlotManager: set-active / mark-successful / set-unbootable / reset
//!   - ControlStore: control block placement and raw load/store
//!   - BootControl, SlotMetadata, SlotTable: on-disk model
//!
//! DEPENDENCIES:
//!   - storage: block device abstraction
//!   - crc32fast: CRC-32 over the control block
//!   - log: boot diagnostics
//!   - thiserror: error types

#![forbid(unsafe_code)]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[cfg(all(not(feature = "std"), not(feature = "os-lite")))]
compile_error!("Either 'std' or 'os-lite' feature must be enabled");

pub mod bootctrl;
pub mod control;
pub mod manage;
pub mod store;

pub use bootctrl::{best_slot, select_slot, SelectError, SelectMode, Slot, SlotSelector};
pub use control::{
    BootControl, ControlError, SlotMetadata, SlotSuffix, SlotTable, BOOT_CTRL_MAGIC,
    BOOT_CTRL_SIZE, BOOT_CTRL_VERSION, MAX_PRIORITY, MAX_SLOTS, MAX_TRIES,
};
pub use manage::{ManageError, SlotManager};
pub use store::{ControlBuffer, ControlStore, StoreError, MISC_CONTROL_OFFSET};
