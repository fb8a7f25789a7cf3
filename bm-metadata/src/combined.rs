// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Placement of the update metadata and payloads behind the installer.

use crate::{
    crc32,
    image::SparseImage,
    update::{Payload, UpdateMetadata},
    Error,
};

/// Output of [`assemble`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    /// First address after the installer, where the metadata record starts.
    pub metadata_address: u32,
    /// First address after the metadata record, where the payloads start.
    pub blob_address: u32,
    /// The metadata record alone.
    pub metadata: SparseImage,
    /// The metadata record followed by every payload.
    pub combined: SparseImage,
}

/// Lay out `metadata` directly behind `installer` and the payloads directly
/// behind the metadata.
///
/// `payloads` must be the ones `metadata` was built from, in block order.
pub fn assemble(
    installer: &SparseImage,
    metadata: &UpdateMetadata,
    payloads: &[&Payload],
) -> Result<Assembly, Error> {
    check_payloads(metadata, payloads)?;

    let installer_end = installer
        .max_address()
        .ok_or_else(|| Error::InconsistentConfig("installer image is empty".to_owned()))?;
    let record = metadata.encode();
    let metadata_address = installer_end.checked_add(1).ok_or(Error::AddressOverflow {
        address: installer_end,
        len: record.len(),
    })?;
    let blob_address = offset(metadata_address, record.len())?;

    let metadata_image = SparseImage::from_bytes(metadata_address, &record)?;
    let mut combined = metadata_image.clone();
    for (block, payload) in metadata.blocks().iter().zip(payloads) {
        let address = offset(blob_address, block.blob_offset as usize)?;
        combined.write(address, &payload.data)?;
    }

    tracing::debug!(
        "metadata at {metadata_address:#010x} ({} bytes), payloads at {blob_address:#010x} ({} bytes)",
        record.len(),
        metadata.blob_len()
    );
    Ok(Assembly {
        metadata_address,
        blob_address,
        metadata: metadata_image,
        combined,
    })
}

/// Re-read the record at `metadata_address` of a combined image and check
/// every payload against the CRC recorded for it.
pub fn verify_combined(image: &SparseImage, metadata_address: u32) -> Result<UpdateMetadata, Error> {
    let data = image.read_from(metadata_address).ok_or_else(|| {
        Error::PayloadMismatch(format!("no data at {metadata_address:#010x}"))
    })?;
    let metadata = UpdateMetadata::parse(data)?;
    let blob_address = offset(metadata_address, metadata.encoded_len())?;
    for block in metadata.blocks() {
        let address = offset(blob_address, block.blob_offset as usize)?;
        let payload = image.read(address, block.blob_size as usize).ok_or_else(|| {
            Error::PayloadMismatch(format!(
                "{} payload at {address:#010x} is incomplete",
                block.image_id
            ))
        })?;
        let crc = crc32(payload);
        if crc != block.crc {
            return Err(Error::PayloadMismatch(format!(
                "{} payload at {address:#010x} has crc {crc:#010x}, recorded {:#010x}",
                block.image_id, block.crc
            )));
        }
    }
    Ok(metadata)
}

fn check_payloads(metadata: &UpdateMetadata, payloads: &[&Payload]) -> Result<(), Error> {
    if metadata.blocks().len() != payloads.len() {
        return Err(Error::PayloadMismatch(format!(
            "{} image blocks but {} payloads",
            metadata.blocks().len(),
            payloads.len()
        )));
    }
    for (block, payload) in metadata.blocks().iter().zip(payloads) {
        if block.image_id != payload.image_id
            || block.blob_size as usize != payload.data.len()
            || block.crc != crc32(&payload.data)
        {
            return Err(Error::PayloadMismatch(format!(
                "{} block does not describe {}",
                block.image_id,
                payload.source.display()
            )));
        }
    }
    Ok(())
}

fn offset(base: u32, len: usize) -> Result<u32, Error> {
    u32::try_from(len)
        .ok()
        .and_then(|len| base.checked_add(len))
        .ok_or(Error::AddressOverflow { address: base, len })
}
