// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Address-keyed sparse byte images and their Intel HEX representation.

use {
    crate::Error,
    std::{collections::BTreeMap, path::Path},
};

/// Number of data bytes per Intel HEX data record when writing.
const RECORD_LEN: usize = 16;

/// Value of unprogrammed flash, used to fill gaps when flattening.
pub const ERASED: u8 = 0xFF;

/// A set of non-overlapping byte runs at absolute addresses.
///
/// Adjacent runs are coalesced, so every contiguous range of written bytes is
/// stored as exactly one segment. Gaps are never materialized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseImage {
    segments: BTreeMap<u32, Vec<u8>>,
}

impl SparseImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(address: u32, data: &[u8]) -> Result<Self, Error> {
        let mut image = Self::new();
        image.write(address, data)?;
        Ok(image)
    }

    /// Write `data` starting at `address`. Overwriting already written bytes
    /// is an error.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        let end = u64::from(address) + data.len() as u64;
        if end > u64::from(u32::MAX) + 1 {
            return Err(Error::AddressOverflow {
                address,
                len: data.len(),
            });
        }

        let prev = self
            .segments
            .range(..=address)
            .next_back()
            .map(|(&start, bytes)| (start, segment_end(start, bytes)));
        if let Some((_, prev_end)) = prev {
            if prev_end > u64::from(address) {
                return Err(Error::Overlap { address });
            }
        }
        let next = self
            .segments
            .range(address..)
            .next()
            .map(|(&start, _)| start);
        if let Some(next_start) = next {
            if u64::from(next_start) < end {
                return Err(Error::Overlap {
                    address: next_start,
                });
            }
        }

        let (start, mut bytes) = match prev {
            Some((prev_start, prev_end)) if prev_end == u64::from(address) => {
                let head = self.segments.remove(&prev_start).unwrap_or_default();
                (prev_start, head)
            }
            _ => (address, Vec::with_capacity(data.len())),
        };
        bytes.extend_from_slice(data);
        if let Some(next_start) = next.filter(|&n| u64::from(n) == end) {
            if let Some(tail) = self.segments.remove(&next_start) {
                bytes.extend_from_slice(&tail);
            }
        }
        self.segments.insert(start, bytes);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.segments.iter().map(|(&a, d)| (a, d.as_slice()))
    }

    pub fn min_address(&self) -> Option<u32> {
        self.segments.keys().next().copied()
    }

    /// Address of the last written byte.
    pub fn max_address(&self) -> Option<u32> {
        self.segments
            .iter()
            .next_back()
            .map(|(&start, bytes)| (segment_end(start, bytes) - 1) as u32)
    }

    /// Number of bytes between the lowest and highest written address,
    /// both inclusive.
    pub fn span_len(&self) -> usize {
        match (self.min_address(), self.max_address()) {
            (Some(min), Some(max)) => (max - min) as usize + 1,
            _ => 0,
        }
    }

    /// Number of bytes actually written.
    pub fn written_len(&self) -> usize {
        self.segments.values().map(Vec::len).sum()
    }

    /// Bytes at `address..address + len`, if all of them are written.
    pub fn read(&self, address: u32, len: usize) -> Option<&[u8]> {
        let (&start, bytes) = self.segments.range(..=address).next_back()?;
        let offset = (address - start) as usize;
        bytes.get(offset..offset.checked_add(len)?)
    }

    /// Written bytes from `address` up to the next gap.
    pub fn read_from(&self, address: u32) -> Option<&[u8]> {
        let (&start, bytes) = self.segments.range(..=address).next_back()?;
        bytes
            .get((address - start) as usize..)
            .filter(|rest| !rest.is_empty())
    }

    /// The image flattened from its lowest to its highest address, with gaps
    /// filled with [`ERASED`].
    pub fn to_contiguous(&self) -> Vec<u8> {
        let Some(min) = self.min_address() else {
            return Vec::new();
        };
        let mut out = vec![ERASED; self.span_len()];
        for (address, data) in self.segments() {
            let offset = (address - min) as usize;
            out[offset..offset + data.len()].copy_from_slice(data);
        }
        out
    }

    pub fn parse_ihex(text: &str) -> Result<Self, Error> {
        let mut image = Self::new();
        let mut upper_address = 0u32;
        for record in ihex::Reader::new(text) {
            let record = record.map_err(|e| Error::IntelHex {
                path: None,
                message: e.to_string(),
            })?;
            match record {
                ihex::Record::ExtendedSegmentAddress(addr) => {
                    upper_address = (addr as u32) << 4;
                }
                ihex::Record::ExtendedLinearAddress(addr) => {
                    upper_address = (addr as u32) << 16;
                }
                ihex::Record::Data { offset, value } => {
                    let address = upper_address.checked_add(offset as u32).ok_or(
                        Error::AddressOverflow {
                            address: upper_address,
                            len: value.len(),
                        },
                    )?;
                    image.write(address, &value)?;
                }
                // Entry points carry no data.
                ihex::Record::StartSegmentAddress { .. } | ihex::Record::StartLinearAddress(_) => {}
                ihex::Record::EndOfFile => break,
            }
        }
        Ok(image)
    }

    pub fn to_ihex(&self) -> Result<String, Error> {
        let mut records = Vec::new();
        let mut segment_upper_address = 0u16;
        for (start, data) in self.segments() {
            let mut address = start;
            let mut rest = data;
            while !rest.is_empty() {
                let upper = (address >> 16) as u16;
                if upper != segment_upper_address {
                    records.push(ihex::Record::ExtendedLinearAddress(upper));
                    segment_upper_address = upper;
                }
                // Data records must not cross a 64 KiB boundary.
                let room = 0x1_0000 - (address & 0xffff) as usize;
                let len = rest.len().min(RECORD_LEN).min(room);
                records.push(ihex::Record::Data {
                    offset: (address & 0xffff) as u16,
                    value: rest[..len].to_vec(),
                });
                address = address.wrapping_add(len as u32);
                rest = &rest[len..];
            }
        }
        records.push(ihex::Record::EndOfFile);

        let mut text =
            ihex::create_object_file_representation(&records).map_err(|e| Error::IntelHex {
                path: None,
                message: e.to_string(),
            })?;
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Ok(text)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::parse_ihex(&text).map_err(|e| match e {
            Error::IntelHex { path: None, message } => Error::IntelHex {
                path: Some(path.to_owned()),
                message,
            },
            e => e,
        })
    }
}

fn segment_end(start: u32, bytes: &[u8]) -> u64 {
    u64::from(start) + bytes.len() as u64
}
