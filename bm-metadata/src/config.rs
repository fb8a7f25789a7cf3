// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Readers for the flat `key=value` files a sysbuild build directory leaves
//! behind: `CMakeCache.txt` and Kconfig `.config` files.

use {
    crate::Error,
    indexmap::IndexMap,
    std::{
        borrow::Cow,
        path::{Path, PathBuf},
    },
};

/// Line grammar of a config file.
///
/// Both dialects share the same parser; they only differ in which lines are
/// considered and how a considered line is split into key and value.
#[derive(Debug, Clone, Copy)]
pub struct Dialect {
    name: &'static str,
    accept: fn(&str) -> bool,
    split: fn(&str) -> Option<(&str, &str)>,
}

impl Dialect {
    /// `NAME:TYPE=VALUE` lines of a CMake cache.
    pub const CMAKE_CACHE: Dialect = Dialect {
        name: "CMake cache",
        accept: cache_accept,
        split: cache_split,
    };

    /// `CONFIG_NAME=VALUE` lines of a Kconfig `.config`, including the
    /// `SB_CONFIG_` options of a sysbuild configuration.
    pub const KCONFIG: Dialect = Dialect {
        name: "Kconfig",
        accept: kconfig_accept,
        split: kconfig_split,
    };

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Insertion-ordered option map. A key assigned twice keeps the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMap {
    source: Option<PathBuf>,
    entries: IndexMap<String, String>,
}

impl ConfigMap {
    /// Load a config file. A missing file is reported as such rather than as
    /// a generic I/O error, since it usually means a sysbuild image was not
    /// built.
    pub fn load(path: &Path, dialect: Dialect) -> Result<Self, Error> {
        if !path.exists() {
            return Err(Error::ConfigFileMissing(path.to_owned()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;
        let mut map = Self::parse(&text, dialect).map_err(|e| Error::ConfigParse {
            path: path.to_owned(),
            error: e,
        })?;
        map.source = Some(path.to_owned());
        tracing::debug!(
            "loaded {} options from {} file {}",
            map.len(),
            dialect.name(),
            path.display()
        );
        Ok(map)
    }

    pub fn parse(text: &str, dialect: Dialect) -> Result<Self, ParseError> {
        let mut entries = IndexMap::new();
        // Line length checks include the terminator, so keep it until the
        // line has been accepted. A CRLF terminator counts as one character.
        for (i, raw) in text.split_inclusive('\n').enumerate() {
            let raw = match raw.strip_suffix("\r\n") {
                Some(line) => Cow::Owned(format!("{line}\n")),
                None => Cow::Borrowed(raw),
            };
            if !(dialect.accept)(&raw) {
                continue;
            }
            let line = raw.trim_end_matches(&['\n', '\r'][..]);
            let (key, value) = (dialect.split)(line).ok_or_else(|| ParseError {
                line_number: i + 1,
                line: line.to_owned(),
            })?;
            entries.insert(key.to_owned(), value.trim().to_owned());
        }
        Ok(Self {
            source: None,
            entries,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Whether an option is set at all. Kconfig only writes `=y` options, so
    /// presence doubles as a boolean flag.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// String value with one pair of surrounding double quotes removed.
    pub fn get_unquoted(&self, key: &str) -> Option<&str> {
        self.get(key).map(|v| {
            v.strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(v)
        })
    }

    pub fn require(&self, key: &str) -> Result<&str, Error> {
        self.get(key).ok_or_else(|| self.missing(key))
    }

    pub fn require_unquoted(&self, key: &str) -> Result<&str, Error> {
        self.get_unquoted(key).ok_or_else(|| self.missing(key))
    }

    /// Integer value in decimal or `0x` hex notation. An unset option is
    /// `Ok(None)`, an unparsable one an error.
    pub fn get_u32(&self, key: &str) -> Result<Option<u32>, Error> {
        self.get(key)
            .map(|value| {
                parse_u32(value).ok_or_else(|| Error::InvalidConfigValue {
                    key: key.to_owned(),
                    value: value.to_owned(),
                })
            })
            .transpose()
    }

    pub fn require_u32(&self, key: &str) -> Result<u32, Error> {
        self.get_u32(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn missing(&self, key: &str) -> Error {
        Error::MissingConfigKey {
            key: key.to_owned(),
            path: self.source.clone(),
        }
    }
}

fn cache_accept(line: &str) -> bool {
    !(line.starts_with('#') || line.starts_with("//") || line.len() < 4)
}

fn cache_split(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let (key, _ty) = key.split_once(':')?;
    Some((key, value))
}

fn kconfig_accept(line: &str) -> bool {
    line.starts_with("CONFIG_") || line.starts_with("SB_CONFIG_")
}

fn kconfig_split(line: &str) -> Option<(&str, &str)> {
    line.split_once('=')
}

fn parse_u32(value: &str) -> Option<u32> {
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// A considered line that does not have the `key=value` shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line_number: usize,
    pub line: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: malformed entry \"{}\"", self.line_number, self.line)
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    const CACHE: &str = "\
# This is the CMakeCache file.
// Marks a cache entry
APP_DIR:PATH=/work/bm/samples/bluetooth/peripheral_uart

ZEPHYR_BASE:PATH=/work/zephyr
CMAKE_BUILD_TYPE:STRING= Release
//No help, variable specified on the command line.
BOARD:STRING=bm_nrf54l15dk/nrf54l15/cpuapp/s115_softdevice
";

    #[test]
    fn cache_dialect_skips_comments_and_short_lines() {
        let cache = ConfigMap::parse(CACHE, Dialect::CMAKE_CACHE).unwrap();
        assert_eq!(cache.len(), 4);
        assert_eq!(
            cache.get("APP_DIR"),
            Some("/work/bm/samples/bluetooth/peripheral_uart")
        );
        assert_eq!(cache.get("CMAKE_BUILD_TYPE"), Some("Release"));
        assert_eq!(
            cache.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            ["APP_DIR", "ZEPHYR_BASE", "CMAKE_BUILD_TYPE", "BOARD"]
        );
    }

    #[test]
    fn cache_dialect_requires_type() {
        let err = ConfigMap::parse("A:BOOL=ON\nNOTYPE=1\n", Dialect::CMAKE_CACHE).unwrap_err();
        assert_eq!(err.line_number, 2);
        assert_eq!(err.line, "NOTYPE=1");
    }

    #[test]
    fn cache_dialect_requires_assignment() {
        let err = ConfigMap::parse("JUST:TEXT\n", Dialect::CMAKE_CACHE).unwrap_err();
        assert_eq!(err.line_number, 1);
    }

    #[test]
    fn cache_dialect_short_line_threshold_counts_newline() {
        // "A=1\n" is four characters long and therefore considered, but it
        // lacks a type.
        assert!(ConfigMap::parse("A=1\n", Dialect::CMAKE_CACHE).is_err());
        // Without the newline it is too short to be considered.
        let map = ConfigMap::parse("A=1", Dialect::CMAKE_CACHE).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn cache_dialect_crlf_counts_as_one_terminator() {
        let map = ConfigMap::parse("AB\r\nA:STRING=x\r\n", Dialect::CMAKE_CACHE).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("A"), Some("x"));
    }

    #[test]
    fn kconfig_dialect_filters_prefixes() {
        let text = "\
#
# Sysbuild configuration
#
SB_CONFIG_SOFTDEVICE=y
# SB_CONFIG_SOFTDEVICE_NONE is not set
SB_CONFIG_BM_FIRMWARE_LOADER_IMAGE_NAME=\"firmware_loader\"
CONFIG_BM_INSTALL_ENTRY_SIZE=0x20
OTHER_OPTION=3
";
        let map = ConfigMap::parse(text, Dialect::KCONFIG).unwrap();
        assert_eq!(map.len(), 3);
        assert!(map.contains("SB_CONFIG_SOFTDEVICE"));
        assert!(!map.contains("SB_CONFIG_SOFTDEVICE_NONE"));
        assert!(!map.contains("OTHER_OPTION"));
        assert_eq!(
            map.get("SB_CONFIG_BM_FIRMWARE_LOADER_IMAGE_NAME"),
            Some("\"firmware_loader\"")
        );
        assert_eq!(
            map.get_unquoted("SB_CONFIG_BM_FIRMWARE_LOADER_IMAGE_NAME"),
            Some("firmware_loader")
        );
        assert_eq!(map.require_u32("CONFIG_BM_INSTALL_ENTRY_SIZE").unwrap(), 32);
    }

    #[test]
    fn kconfig_dialect_rejects_line_without_assignment() {
        let err = ConfigMap::parse("CONFIG_A=y\nCONFIG_BROKEN\n", Dialect::KCONFIG).unwrap_err();
        assert_eq!(err.line_number, 2);
        assert_eq!(err.line, "CONFIG_BROKEN");
    }

    #[test]
    fn last_assignment_wins() {
        let map = ConfigMap::parse("CONFIG_A=1\nCONFIG_B=2\nCONFIG_A=3\n", Dialect::KCONFIG).unwrap();
        assert_eq!(map.get("CONFIG_A"), Some("3"));
        assert_eq!(map.iter().next(), Some(("CONFIG_A", "3")));
    }

    #[test]
    fn typed_accessors_report_key() {
        let map = ConfigMap::parse("CONFIG_A=abc\n", Dialect::KCONFIG).unwrap();
        assert!(matches!(
            map.require_u32("CONFIG_A"),
            Err(Error::InvalidConfigValue { key, value }) if key == "CONFIG_A" && value == "abc"
        ));
        assert!(matches!(
            map.require("CONFIG_B"),
            Err(Error::MissingConfigKey { key, path: None }) if key == "CONFIG_B"
        ));
        assert!(matches!(map.get_u32("CONFIG_B"), Ok(None)));
        assert!(map.get_u32("CONFIG_A").is_err());
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".config");
        assert!(matches!(
            ConfigMap::load(&path, Dialect::KCONFIG),
            Err(Error::ConfigFileMissing(p)) if p == path
        ));
    }

    #[test]
    fn load_reports_file_of_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CMakeCache.txt");
        std::fs::write(&path, "BROKEN LINE\n").unwrap();
        let err = ConfigMap::load(&path, Dialect::CMAKE_CACHE).unwrap_err();
        assert!(matches!(&err, Error::ConfigParse { path: p, .. } if *p == path));
        assert!(err.to_string().contains("CMakeCache.txt"));
    }
}
