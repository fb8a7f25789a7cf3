// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Metadata generation for the bare-metal installer.
//!
//! Partition addresses come from the board devicetree, image geometry from
//! the Kconfig and CMake files of a sysbuild build directory. From those the
//! crate encodes the install entry used when flashing directly, and the
//! update metadata the installer reads when it is handed a combined image of
//! signed SoftDevice and firmware loader updates.

use std::path::PathBuf;

pub mod combined;
pub mod config;
pub mod devicetree;
pub mod flash;
pub mod image;
pub mod partition;
pub mod update;


/// The zlib CRC32 used by every checksum in the metadata formats.
pub const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[derive(Debug)]
pub enum Error {
    ConfigFileMissing(PathBuf),
    ConfigParse {
        path: PathBuf,
        error: config::ParseError,
    },
    MissingConfigKey {
        key: String,
        path: Option<PathBuf>,
    },
    InvalidConfigValue {
        key: String,
        value: String,
    },
    InconsistentConfig(String),
    MissingPartition(String),
    MissingArtifact(PathBuf),
    Devicetree {
        path: Option<PathBuf>,
        message: String,
    },
    IntelHex {
        path: Option<PathBuf>,
        message: String,
    },
    Overlap {
        address: u32,
    },
    AddressOverflow {
        address: u32,
        len: usize,
    },
    PayloadMismatch(String),
    InvalidMetadata(update::MetadataError),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigFileMissing(path) => {
                write!(f, "config file does not exist: {}", path.display())
            }
            Self::ConfigParse { path, error } => {
                write!(f, "unable to parse {}: {error}", path.display())
            }
            Self::MissingConfigKey { key, path: Some(path) } => {
                write!(f, "{key} is not set in {}", path.display())
            }
            Self::MissingConfigKey { key, path: None } => write!(f, "{key} is not set"),
            Self::InvalidConfigValue { key, value } => {
                write!(f, "invalid value for {key}: \"{value}\"")
            }
            Self::InconsistentConfig(message) => write!(f, "inconsistent configuration: {message}"),
            Self::MissingPartition(name) => write!(f, "partition {name} not found in devicetree"),
            Self::MissingArtifact(path) => {
                write!(f, "build artifact does not exist: {}", path.display())
            }
            Self::Devicetree {
                path: Some(path),
                message,
            } => write!(f, "devicetree {}: {message}", path.display()),
            Self::Devicetree {
                path: None,
                message,
            } => write!(f, "devicetree: {message}"),
            Self::IntelHex {
                path: Some(path),
                message,
            } => write!(f, "Intel HEX file {}: {message}", path.display()),
            Self::IntelHex {
                path: None,
                message,
            } => write!(f, "Intel HEX: {message}"),
            Self::Overlap { address } => {
                write!(f, "image data overlaps at address {address:#010x}")
            }
            Self::AddressOverflow { address, len } => write!(
                f,
                "{len} bytes at {address:#010x} exceed the 32-bit address space"
            ),
            Self::PayloadMismatch(message) => write!(f, "payload mismatch: {message}"),
            Self::InvalidMetadata(e) => write!(f, "invalid update metadata: {e}"),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigParse { error, .. } => Some(error),
            Self::InvalidMetadata(e) => Some(e),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
