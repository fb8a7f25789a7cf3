// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Flash partition lookup by devicetree label.

use {
    crate::{devicetree::Devicetree, Error},
    indexmap::IndexMap,
    serde::{Deserialize, Serialize},
    std::path::Path,
};

pub const BOOT: &str = "boot_partition";
pub const SLOT0: &str = "slot0_partition";
/// The firmware loader is placed in the second slot.
pub const SLOT1: &str = "slot1_partition";
pub const SOFTDEVICE: &str = "softdevice_partition";
pub const METADATA: &str = "metadata_partition";

/// Partitions every pipeline resolves.
pub const DEFAULT_PARTITIONS: [&str; 5] = [BOOT, SLOT0, SLOT1, SOFTDEVICE, METADATA];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub start_address: u32,
    pub size: u32,
    pub found: bool,
}

impl Partition {
    fn absent(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            start_address: 0,
            size: 0,
            found: false,
        }
    }
}

/// One devicetree node, reduced to what partition resolution looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Numeric `reg` cells, `None` if the node has no numeric `reg`.
    #[serde(default)]
    pub reg: Option<Vec<u64>>,
}

/// Node list of a board's hardware description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareDescription {
    pub nodes: Vec<NodeInfo>,
}

impl HardwareDescription {
    pub fn from_devicetree(dt: &Devicetree) -> Self {
        let nodes = dt
            .nodes()
            .into_iter()
            .map(|node| NodeInfo {
                path: node.path.clone(),
                labels: node.labels.clone(),
                reg: node.reg(),
            })
            .collect();
        Self { nodes }
    }

    /// Load a `.json` node list or a devicetree source file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.is_file() {
            return Err(Error::MissingArtifact(path.to_owned()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;
        let devicetree_error = |message: String| Error::Devicetree {
            path: Some(path.to_owned()),
            message,
        };
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let description = if is_json {
            serde_json::from_str(&text).map_err(|e| devicetree_error(e.to_string()))?
        } else {
            let dt = Devicetree::parse(&text).map_err(|e| devicetree_error(e.to_string()))?;
            Self::from_devicetree(&dt)
        };
        tracing::debug!(
            "loaded {} devicetree nodes from {}",
            description.nodes.len(),
            path.display()
        );
        Ok(description)
    }
}

/// Result of one resolution pass, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    partitions: IndexMap<String, Partition>,
}

impl PartitionTable {
    /// Resolve the requested partition names against a node list.
    ///
    /// Only nodes with exactly one label take part. When several nodes carry
    /// the same requested label, the last one wins.
    pub fn resolve(nodes: &[NodeInfo], names: &[&str]) -> Result<Self, Error> {
        let mut partitions: IndexMap<String, Partition> = names
            .iter()
            .map(|&name| (name.to_owned(), Partition::absent(name)))
            .collect();

        for node in nodes {
            let [label] = node.labels.as_slice() else {
                continue;
            };
            let Some(partition) = partitions.get_mut(label) else {
                continue;
            };
            let (start_address, size) = address_and_size(node)?;
            partition.start_address = start_address;
            partition.size = size;
            partition.found = true;
        }

        for partition in partitions.values() {
            if partition.found {
                tracing::debug!(
                    "{}: {:#010x} ({:#x} bytes)",
                    partition.name,
                    partition.start_address,
                    partition.size
                );
            } else {
                tracing::debug!("{}: not present", partition.name);
            }
        }
        Ok(Self { partitions })
    }

    /// A partition that was found. Absent partitions and names that were
    /// never requested are both `None`.
    pub fn lookup(&self, name: &str) -> Option<&Partition> {
        self.partitions.get(name).filter(|p| p.found)
    }

    pub fn require(&self, name: &str) -> Result<&Partition, Error> {
        self.lookup(name)
            .ok_or_else(|| Error::MissingPartition(name.to_owned()))
    }

    /// Every requested partition, found or not.
    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }
}

fn address_and_size(node: &NodeInfo) -> Result<(u32, u32), Error> {
    let invalid = |message: String| Error::Devicetree {
        path: None,
        message: format!("{}: {message}", node.path),
    };
    let reg = node
        .reg
        .as_deref()
        .ok_or_else(|| invalid("partition has no numeric reg".to_owned()))?;
    let [address, size, ..] = reg else {
        return Err(invalid(format!(
            "reg has {} cells, expected address and size",
            reg.len()
        )));
    };
    let cell = |value: u64| {
        u32::try_from(value).map_err(|_| invalid(format!("reg cell {value:#x} exceeds 32 bits")))
    };
    Ok((cell(*address)?, cell(*size)?))
}
