// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};

/// Layout overrides. Relative paths are relative to the build directory.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub hardware_description: Option<PathBuf>,
    pub softdevice_image: Option<PathBuf>,
    pub installer_dir: Option<PathBuf>,
    pub flash_metadata_output: Option<PathBuf>,
    pub metadata_output: Option<PathBuf>,
    pub combined_output: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| Error::Layout {
            path: path.to_owned(),
            source,
        })
    }
}

#[derive(Debug)]
pub enum Error {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Layout {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Read { path, source } => {
                write!(f, "failed to read layout file {}: {source}", path.display())
            }
            Error::Layout { path, source } => {
                write!(f, "invalid layout file {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for Error {}
