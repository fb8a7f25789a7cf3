// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Install metadata for devices that are flashed directly, without going
//! through the installer.
//!
//! The record is one fixed-size install entry: an address/size pair per image
//! slot, zero padding up to the entry size and a CRC32 of everything before
//! it.

use crate::{
    config::ConfigMap,
    crc32,
    image::SparseImage,
    partition::{Partition, PartitionTable, SLOT1, SOFTDEVICE},
    Error,
};

pub const ENTRY_SIZE_KEY: &str = "CONFIG_BM_INSTALL_ENTRY_SIZE";
pub const IMAGE_COUNT_KEY: &str = "CONFIG_BM_INSTALL_IMAGES";

/// Bytes per address/size pair.
const PAIR_LEN: u32 = 8;
const CRC_LEN: u32 = 4;

/// Install entry geometry configured in the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallConfig {
    pub entry_size: u32,
    pub image_count: u32,
}

impl InstallConfig {
    pub fn from_kconfig(kconfig: &ConfigMap) -> Result<Self, Error> {
        Ok(Self {
            entry_size: kconfig.require_u32(ENTRY_SIZE_KEY)?,
            image_count: kconfig.require_u32(IMAGE_COUNT_KEY)?,
        })
    }
}

/// Address and size of one image slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Region {
    pub address: u32,
    pub size: u32,
}

impl From<&Partition> for Region {
    fn from(partition: &Partition) -> Self {
        Self {
            address: partition.start_address,
            size: partition.size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashMetadata {
    regions: Vec<Region>,
    padding: usize,
}

impl FlashMetadata {
    /// Collect the SoftDevice slot and, with two images configured, the
    /// firmware loader slot. A disabled firmware loader occupies its slot
    /// with a zero address and size.
    pub fn new(
        partitions: &PartitionTable,
        firmware_loader: bool,
        install: InstallConfig,
    ) -> Result<Self, Error> {
        let softdevice = Region::from(partitions.require(SOFTDEVICE)?);
        let loader = if firmware_loader {
            Region::from(partitions.require(SLOT1)?)
        } else {
            Region::default()
        };

        let regions = match install.image_count {
            1 if firmware_loader => {
                return Err(Error::InconsistentConfig(format!(
                    "{IMAGE_COUNT_KEY} is 1 but the firmware loader is enabled"
                )))
            }
            1 => vec![softdevice],
            2 => vec![softdevice, loader],
            n => {
                return Err(Error::InconsistentConfig(format!(
                    "{IMAGE_COUNT_KEY} is {n}, only 1 or 2 images are supported"
                )))
            }
        };

        let used = PAIR_LEN * install.image_count + CRC_LEN;
        let padding = install.entry_size.checked_sub(used).ok_or_else(|| {
            Error::InconsistentConfig(format!(
                "{ENTRY_SIZE_KEY} is {}, but {} images need at least {used} bytes",
                install.entry_size, install.image_count
            ))
        })?;

        Ok(Self {
            regions,
            padding: padding as usize,
        })
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Length of the encoded record, equal to the configured entry size.
    pub fn encoded_len(&self) -> usize {
        self.regions.len() * PAIR_LEN as usize + self.padding + CRC_LEN as usize
    }

    /// Little-endian record followed by its checksum.
    ///
    /// The checksum is taken over the fields in host byte order, which is
    /// what the deployed bootloaders compare against. On little-endian hosts
    /// the two orders coincide.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.pack(u32::to_le_bytes);
        let crc = crc32(&self.pack(u32::to_ne_bytes));
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// The encoded record placed at `address`, normally the start of the
    /// metadata partition.
    pub fn to_image(&self, address: u32) -> Result<SparseImage, Error> {
        SparseImage::from_bytes(address, &self.encode())
    }

    fn pack(&self, to_bytes: fn(u32) -> [u8; 4]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        for region in &self.regions {
            out.extend_from_slice(&to_bytes(region.address));
            out.extend_from_slice(&to_bytes(region.size));
        }
        out.resize(out.len() + self.padding, 0);
        out
    }
}
