// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command line arguments.

use std::path::PathBuf;

#[derive(clap::Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
    /// Log debug output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
    /// Path to config file. Defaults to bm-metadata.toml in the build
    /// directory, if present.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Generate the install entry for direct flashing.
    Flash(Build),
    /// Generate the update metadata and the combined signed update images.
    Update(Build),
    /// Generate both the install entry and the update images.
    All(Build),
    /// Print and verify the update metadata in an Intel HEX file.
    Dump {
        /// The Intel HEX file.
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(clap::Args)]
pub struct Build {
    /// Sysbuild build directory.
    #[arg(long)]
    pub build_dir: PathBuf,
    /// Devicetree source (.dts) or JSON node list describing the partitions.
    #[arg(long)]
    pub hardware_description: Option<PathBuf>,
    /// Signed SoftDevice update image.
    #[arg(long)]
    pub softdevice_image: Option<PathBuf>,
    /// Build directory of the installer image.
    #[arg(long)]
    pub installer_dir: Option<PathBuf>,
}
