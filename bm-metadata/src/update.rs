// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Metadata describing the signed update images bundled behind the installer.
//!
//! Layout, all integers little-endian:
//!
//! | Offset      | Size | Field                                    |
//! |-------------|------|------------------------------------------|
//! | 0           | 4    | magic `92 11 F2 E9`                      |
//! | 4 + 24 * i  | 24   | image block `i`                          |
//! | 4 + 24 * n  | 4    | CRC32 of everything before it            |
//!
//! An image block holds the target partition address and size, the payload
//! offset and size within the payload blob, the payload CRC32, the image id
//! and three `0xFF` filler bytes.

use {
    crate::{
        crc32,
        image::SparseImage,
        partition::{PartitionTable, SLOT1, SOFTDEVICE},
        Error,
    },
    std::path::{Path, PathBuf},
};

pub const MAGIC: [u8; 4] = [0x92, 0x11, 0xF2, 0xE9];

/// Size of one image block in bytes.
pub const BLOCK_LEN: usize = 24;

const FILLER: [u8; 3] = [0xFF; 3];
const MAX_IMAGES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ImageId {
    SoftDevice = 0x01,
    FirmwareLoader = 0x02,
}

impl ImageId {
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(Self::SoftDevice),
            0x02 => Some(Self::FirmwareLoader),
            _ => None,
        }
    }

    /// Partition the image is installed into.
    pub fn partition(&self) -> &'static str {
        match self {
            Self::SoftDevice => SOFTDEVICE,
            Self::FirmwareLoader => SLOT1,
        }
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SoftDevice => write!(f, "SoftDevice"),
            Self::FirmwareLoader => write!(f, "firmware loader"),
        }
    }
}

/// Signed image bytes, flattened from the file they were read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub image_id: ImageId,
    pub source: PathBuf,
    pub data: Vec<u8>,
}

impl Payload {
    pub fn new(image_id: ImageId, source: impl Into<PathBuf>, data: Vec<u8>) -> Self {
        Self {
            image_id,
            source: source.into(),
            data,
        }
    }

    /// Read a payload. Intel HEX files are flattened from their lowest to
    /// their highest address with gaps filled with `0xFF`; any other file is
    /// taken as raw bytes.
    pub fn load(image_id: ImageId, path: &Path) -> Result<Self, Error> {
        if !path.is_file() {
            return Err(Error::MissingArtifact(path.to_owned()));
        }
        let is_hex = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("hex"));
        let data = if is_hex {
            SparseImage::load(path)?.to_contiguous()
        } else {
            std::fs::read(path).map_err(|source| Error::Io {
                path: path.to_owned(),
                source,
            })?
        };
        if data.is_empty() {
            return Err(Error::MissingArtifact(path.to_owned()));
        }
        tracing::debug!(
            "{image_id} payload {}: {} bytes, crc {:#010x}",
            path.display(),
            data.len(),
            crc32(&data)
        );
        Ok(Self::new(image_id, path, data))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBlock {
    pub partition_address: u32,
    pub partition_size: u32,
    /// Offset of the payload from the start of the payload blob.
    pub blob_offset: u32,
    pub blob_size: u32,
    pub crc: u32,
    pub image_id: ImageId,
}

impl ImageBlock {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.partition_address.to_le_bytes());
        buf.extend_from_slice(&self.partition_size.to_le_bytes());
        buf.extend_from_slice(&self.blob_offset.to_le_bytes());
        buf.extend_from_slice(&self.blob_size.to_le_bytes());
        buf.extend_from_slice(&self.crc.to_le_bytes());
        buf.push(self.image_id as u8);
        buf.extend_from_slice(&FILLER);
    }

    fn deserialize(data: &[u8; BLOCK_LEN]) -> Result<Self, MetadataError> {
        let word = |i: usize| u32::from_le_bytes(data[i..i + 4].try_into().unwrap());
        if data[21..] != FILLER {
            return Err(MetadataError::InvalidFiller);
        }
        let image_id = ImageId::from_u8(data[20]).ok_or(MetadataError::UnknownImageId(data[20]))?;
        Ok(Self {
            partition_address: word(0),
            partition_size: word(4),
            blob_offset: word(8),
            blob_size: word(12),
            crc: word(16),
            image_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMetadata {
    blocks: Vec<ImageBlock>,
}

impl UpdateMetadata {
    /// Describe the SoftDevice and, if present, the firmware loader payload.
    ///
    /// Payloads are laid out back to back in the payload blob in that order.
    pub fn new(
        partitions: &PartitionTable,
        softdevice: &Payload,
        firmware_loader: Option<&Payload>,
    ) -> Result<Self, Error> {
        let mut blocks = Vec::with_capacity(MAX_IMAGES);
        let mut blob_offset = 0u32;
        for payload in std::iter::once(softdevice).chain(firmware_loader) {
            let partition = partitions.require(payload.image_id.partition())?;
            if payload.data.is_empty() {
                return Err(Error::MissingArtifact(payload.source.clone()));
            }
            let blob_size = u32::try_from(payload.data.len()).map_err(|_| Error::AddressOverflow {
                address: blob_offset,
                len: payload.data.len(),
            })?;
            blocks.push(ImageBlock {
                partition_address: partition.start_address,
                partition_size: partition.size,
                blob_offset,
                blob_size,
                crc: crc32(&payload.data),
                image_id: payload.image_id,
            });
            blob_offset = blob_offset
                .checked_add(blob_size)
                .ok_or(Error::AddressOverflow {
                    address: blob_offset,
                    len: payload.data.len(),
                })?;
        }
        Ok(Self { blocks })
    }

    pub fn blocks(&self) -> &[ImageBlock] {
        &self.blocks
    }

    /// Total size of all described payloads.
    pub fn blob_len(&self) -> usize {
        self.blocks.iter().map(|b| b.blob_size as usize).sum()
    }

    pub fn encoded_len(&self) -> usize {
        MAGIC.len() + self.blocks.len() * BLOCK_LEN + 4
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&MAGIC);
        for block in &self.blocks {
            block.serialize(&mut buf);
        }
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parse a record from the start of `data`. Anything after the record,
    /// such as payload data, is ignored.
    ///
    /// The record carries no block count, so the trailer is found by
    /// checking the CRC after each block.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        Self::parse_blocks(data).map_err(Error::InvalidMetadata)
    }

    fn parse_blocks(data: &[u8]) -> Result<Self, MetadataError> {
        if data.len() < MAGIC.len() {
            return Err(MetadataError::TooShort);
        }
        if data[..MAGIC.len()] != MAGIC {
            return Err(MetadataError::InvalidMagic(
                data[..MAGIC.len()].try_into().unwrap(),
            ));
        }

        let mut blocks = Vec::new();
        let mut pos = MAGIC.len();
        loop {
            let trailer = data.get(pos..pos + 4).ok_or(MetadataError::TooShort)?;
            let recorded = u32::from_le_bytes(trailer.try_into().unwrap());
            let computed = crc32(&data[..pos]);
            if !blocks.is_empty() && recorded == computed {
                return Ok(Self { blocks });
            }

            let block = data
                .get(pos..pos + BLOCK_LEN)
                .ok_or(MetadataError::TooShort)
                .and_then(|bytes| ImageBlock::deserialize(bytes.try_into().unwrap()));
            match block {
                Ok(block) if blocks.len() < MAX_IMAGES => blocks.push(block),
                Err(e) if blocks.is_empty() => return Err(e),
                // After at least one block, bytes that do not form another
                // block mean the trailer did not match.
                _ => return Err(MetadataError::ChecksumMismatch { recorded, computed }),
            }
            pos += BLOCK_LEN;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    TooShort,
    InvalidMagic([u8; 4]),
    InvalidFiller,
    UnknownImageId(u8),
    ChecksumMismatch { recorded: u32, computed: u32 },
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort => write!(f, "record too short"),
            Self::InvalidMagic(magic) => write!(f, "invalid magic {magic:02x?}"),
            Self::InvalidFiller => write!(f, "invalid filler bytes in image block"),
            Self::UnknownImageId(id) => write!(f, "unknown image id {id:#04x}"),
            Self::ChecksumMismatch { recorded, computed } => write!(
                f,
                "checksum mismatch: recorded {recorded:#010x}, computed {computed:#010x}"
            ),
        }
    }
}

impl std::error::Error for MetadataError {}
