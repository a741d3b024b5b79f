use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// CLI для FlashKVS поверх образа flash-раздела в файле
#[derive(Parser, Debug)]
#[command(name = "flashkvs", version, about = "FlashKVS partition image CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

/// Геометрия образа и параметры store (общие для всех команд).
#[derive(Args, Debug, Clone)]
pub struct ImageArgs {
    /// Partition image file
    #[arg(long)]
    pub path: PathBuf,
    /// Sector (erase unit) size in bytes
    #[arg(long, default_value_t = 4096)]
    pub sector_size: usize,
    /// Copies kept of every entry (1..=3)
    #[arg(long, default_value_t = 1)]
    pub redundancy: usize,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Create an erased partition image
    Init {
        #[command(flatten)]
        image: ImageArgs,
        /// Number of sectors
        #[arg(long, default_value_t = 16)]
        sectors: usize,
        /// Overwrite an existing image
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Put key/value (value as string, hex:.., @file, - for stdin, or --value-file)
    Put {
        #[command(flatten)]
        image: ImageArgs,
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: Option<String>,
        /// Read value bytes from a file
        #[arg(long)]
        value_file: Option<PathBuf>,
    },
    /// Get key
    Get {
        #[command(flatten)]
        image: ImageArgs,
        #[arg(long)]
        key: String,
        /// Optional file to write raw value into
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete key (tombstone write)
    Del {
        #[command(flatten)]
        image: ImageArgs,
        #[arg(long)]
        key: String,
    },
    /// Print storage/sector/metrics summary
    ///
    /// Пример:
    ///   flashkvs stats --path ./flash.img
    ///   flashkvs stats --path ./flash.img --json
    Stats {
        #[command(flatten)]
        image: ImageArgs,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Maintenance: repair + garbage-collect everything reclaimable
    ///
    /// --heavy дополнительно удаляет tombstones, --partial собирает один сектор.
    Maint {
        #[command(flatten)]
        image: ImageArgs,
        #[arg(long, default_value_t = false, conflicts_with = "partial")]
        heavy: bool,
        #[arg(long, default_value_t = false)]
        partial: bool,
    },
    /// Dump all live keys/values
    Dump {
        #[command(flatten)]
        image: ImageArgs,
        /// JSON array output
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
