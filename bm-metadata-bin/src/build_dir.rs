// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Where a sysbuild build directory keeps the inputs, and the generation steps
//! that read them.

use {
    bm_metadata::{
        combined,
        config::{ConfigMap, Dialect},
        flash::{FlashMetadata, InstallConfig},
        image::SparseImage,
        partition::{HardwareDescription, PartitionTable, DEFAULT_PARTITIONS, METADATA},
        update::{ImageId, Payload, UpdateMetadata},
        Error,
    },
    std::path::{Path, PathBuf},
};

/// Name of the layout override file looked up in the build directory.
pub const CONFIG_FILE: &str = "bm-metadata.toml";

const SOFTDEVICE_NONE: &str = "SB_CONFIG_SOFTDEVICE_NONE";
const FIRMWARE_LOADER_NONE: &str = "SB_CONFIG_BM_FIRMWARE_LOADER_NONE";
const FIRMWARE_LOADER_IMAGE_NAME: &str = "SB_CONFIG_BM_FIRMWARE_LOADER_IMAGE_NAME";
const KERNEL_BIN_NAME: &str = "CONFIG_KERNEL_BIN_NAME";

/// Paths of every input and output, derived from the build directory unless
/// overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub build_dir: PathBuf,
    /// Devicetree source or JSON node list. Defaults to the application's
    /// `zephyr.dts`, which is only known once the CMake cache is read.
    pub hardware_description: Option<PathBuf>,
    pub softdevice_image: PathBuf,
    pub installer_dir: PathBuf,
    pub flash_metadata_output: PathBuf,
    pub metadata_output: PathBuf,
    pub combined_output: PathBuf,
}

impl Layout {
    pub fn new(build_dir: &Path) -> Self {
        Self {
            build_dir: build_dir.to_owned(),
            hardware_description: None,
            softdevice_image: build_dir.join("softdevice.signed.hex"),
            installer_dir: build_dir.join("installer"),
            flash_metadata_output: build_dir.join("flash_metadata.hex"),
            metadata_output: build_dir.join("metadata.hex"),
            combined_output: build_dir.join("combined_signed_update_images.hex"),
        }
    }
}

/// A separately built sysbuild image: its `zephyr` output directory and
/// Kconfig.
#[derive(Debug, Clone)]
struct ImageBuild {
    dir: PathBuf,
    kconfig: ConfigMap,
}

impl ImageBuild {
    fn load(image_dir: &Path) -> Result<Self, Error> {
        let dir = image_dir.join("zephyr");
        if !dir.is_dir() {
            return Err(Error::MissingArtifact(dir));
        }
        let kconfig = ConfigMap::load(&dir.join(".config"), Dialect::KCONFIG)?;
        Ok(Self { dir, kconfig })
    }

    /// Output file of the image, named after `CONFIG_KERNEL_BIN_NAME`.
    fn artifact(&self, suffix: &str) -> Result<PathBuf, Error> {
        let name = self.kconfig.require_unquoted(KERNEL_BIN_NAME)?;
        Ok(self.dir.join(format!("{name}{suffix}")))
    }
}

/// Everything read from the build directory that both generators share.
#[derive(Debug, Clone)]
pub struct BuildContext {
    layout: Layout,
    application: ImageBuild,
    firmware_loader: Option<ImageBuild>,
    partitions: PartitionTable,
}

impl BuildContext {
    /// Read the build directory. Returns `None` if the build has no SoftDevice,
    /// in which case there is nothing to generate.
    pub fn load(layout: &Layout) -> Result<Option<Self>, Error> {
        let dir = &layout.build_dir;
        let cache = ConfigMap::load(&dir.join("CMakeCache.txt"), Dialect::CMAKE_CACHE)?;
        let sysbuild = ConfigMap::load(&dir.join("zephyr").join(".config"), Dialect::KCONFIG)?;

        if sysbuild.contains(SOFTDEVICE_NONE) {
            tracing::info!("SoftDevice disabled, no metadata to generate");
            return Ok(None);
        }

        let app_dir = cache.require("APP_DIR")?;
        let app_name = Path::new(app_dir)
            .file_name()
            .ok_or_else(|| Error::InvalidConfigValue {
                key: "APP_DIR".to_owned(),
                value: app_dir.to_owned(),
            })?;
        let application = ImageBuild::load(&dir.join(app_name))?;

        let description_path = layout
            .hardware_description
            .clone()
            .unwrap_or_else(|| application.dir.join("zephyr.dts"));
        let description = HardwareDescription::load(&description_path)?;
        let partitions = PartitionTable::resolve(&description.nodes, &DEFAULT_PARTITIONS)?;

        let firmware_loader = if sysbuild.contains(FIRMWARE_LOADER_NONE) {
            tracing::warn!("firmware loader disabled, describing the SoftDevice only");
            None
        } else {
            let name = sysbuild.require_unquoted(FIRMWARE_LOADER_IMAGE_NAME)?;
            Some(ImageBuild::load(&dir.join(name))?)
        };

        Ok(Some(Self {
            layout: layout.clone(),
            application,
            firmware_loader,
            partitions,
        }))
    }

    /// The install entry for direct flashing, placed in the metadata
    /// partition.
    pub fn flash_metadata(&self) -> Result<Artifact, Error> {
        let install = InstallConfig::from_kconfig(&self.application.kconfig)?;
        let record = FlashMetadata::new(&self.partitions, self.firmware_loader.is_some(), install)?;
        let address = self.partitions.require(METADATA)?.start_address;
        tracing::debug!(
            "install entry: {} bytes for {} images at {address:#010x}",
            install.entry_size,
            install.image_count
        );
        Ok(Artifact {
            path: self.layout.flash_metadata_output.clone(),
            image: record.to_image(address)?,
        })
    }

    /// The update metadata placed behind the installer, and the same metadata
    /// followed by the signed update payloads.
    pub fn update_images(&self) -> Result<[Artifact; 2], Error> {
        let softdevice = Payload::load(ImageId::SoftDevice, &self.layout.softdevice_image)?;
        let firmware_loader = self
            .firmware_loader
            .as_ref()
            .map(|build| Payload::load(ImageId::FirmwareLoader, &build.artifact(".signed.hex")?))
            .transpose()?;
        let metadata = UpdateMetadata::new(&self.partitions, &softdevice, firmware_loader.as_ref())?;

        let installer_build = ImageBuild::load(&self.layout.installer_dir)?;
        let installer_path = installer_build.artifact(".hex")?;
        if !installer_path.is_file() {
            return Err(Error::MissingArtifact(installer_path));
        }
        let installer = SparseImage::load(&installer_path)?;
        if installer.is_empty() {
            return Err(Error::MissingArtifact(installer_path));
        }

        let payloads: Vec<&Payload> = std::iter::once(&softdevice)
            .chain(firmware_loader.as_ref())
            .collect();
        let assembly = combined::assemble(&installer, &metadata, &payloads)?;
        Ok([
            Artifact {
                path: self.layout.metadata_output.clone(),
                image: assembly.metadata,
            },
            Artifact {
                path: self.layout.combined_output.clone(),
                image: assembly.combined,
            },
        ])
    }
}

/// An output image and where it goes.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub image: SparseImage,
}
