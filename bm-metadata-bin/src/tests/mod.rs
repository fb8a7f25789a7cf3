// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    self::input::{read_hex, Params},
    crate::ExitCode,
    bm_metadata::{combined::verify_combined, crc32, update::UpdateMetadata},
    std::{io::Write, path::Path},
};


/// Generate the install entry for a build with a firmware loader.
#[test]
fn flash_with_firmware_loader() {
    let dir = Params::default().build_dir();
    let output = test(["flash", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.is_empty());
    assert!(output.stderr.is_empty());

    let image = read_hex(dir.path().join("flash_metadata.hex"));
    assert_eq!(image.min_address(), Some(input::METADATA_ADDRESS));
    let record = image.to_contiguous();
    assert_eq!(record.len(), 32);
    assert_eq!(&record[0..4], &input::SOFTDEVICE_ADDRESS.to_le_bytes());
    assert_eq!(&record[4..8], &input::SOFTDEVICE_SIZE.to_le_bytes());
    assert_eq!(&record[8..12], &input::LOADER_ADDRESS.to_le_bytes());
    assert_eq!(&record[12..16], &input::LOADER_SIZE.to_le_bytes());
    assert_eq!(&record[28..], &crc32(&record[..28]).to_le_bytes());

    // Only the requested output is written.
    assert!(!dir.path().join("metadata.hex").exists());
}

/// Read partitions from a devicetree carrying Zephyr's node comments.
#[test]
fn flash_from_commented_devicetree() {
    let dir = Params::default().build_dir();
    let dts = std::fs::read_to_string(dir.path().join(input::APP).join("zephyr/zephyr.dts"))
        .unwrap();
    assert!(dts.contains("/* node '/soc/rram@0/partitions/partition@27000'"));

    let output = test(["flash", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(0));
    let record = read_hex(dir.path().join("flash_metadata.hex")).to_contiguous();
    assert_eq!(&record[0..4], &input::SOFTDEVICE_ADDRESS.to_le_bytes());
}

/// An output that cannot be moved into place takes the outputs already
/// written by the same run with it.
#[test]
fn failed_output_removes_earlier_outputs() {
    let dir = Params::default().build_dir();
    // A directory in place of the last output makes the final rename fail.
    std::fs::create_dir(dir.path().join("combined_signed_update_images.hex")).unwrap();
    std::fs::write(dir.path().join("combined_signed_update_images.hex/keep"), b"x").unwrap();

    let output = test(["all", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("failed to move output into"));
    assert!(!dir.path().join("flash_metadata.hex").exists());
    assert!(!dir.path().join("metadata.hex").exists());
}

/// The install entry always fills the configured entry size.
#[test]
fn flash_entry_size_from_kconfig() {
    let dir = Params {
        firmware_loader: false,
        entry_size: 64,
        ..Default::default()
    }
    .build_dir();
    let output = test(["flash", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(0));

    let record = read_hex(dir.path().join("flash_metadata.hex")).to_contiguous();
    assert_eq!(record.len(), 64);
    // A disabled firmware loader is described as an empty slot.
    assert!(record[8..60].iter().all(|&b| b == 0));
}

/// An entry too small for the configured images is rejected.
#[test]
fn flash_entry_too_small() {
    let dir = Params {
        entry_size: 16,
        ..Default::default()
    }
    .build_dir();
    let output = test(["flash", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("inconsistent configuration"));
    assert!(!dir.path().join("flash_metadata.hex").exists());
}

/// Generate the update metadata and combined image.
#[test]
fn update_with_firmware_loader() {
    let params = Params::default();
    let dir = params.build_dir();
    let output = test(["update", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stderr.is_empty());

    let metadata_address = input::INSTALLER_ADDRESS + input::INSTALLER_LEN as u32;
    let metadata = read_hex(dir.path().join("metadata.hex"));
    assert_eq!(metadata.min_address(), Some(metadata_address));
    let record = UpdateMetadata::parse(&metadata.to_contiguous()).unwrap();
    assert_eq!(record.blocks().len(), 2);
    assert_eq!(record.blocks()[0].blob_offset, 0);
    assert_eq!(
        record.blocks()[1].blob_offset as usize,
        params.softdevice_payload.len()
    );
    assert_eq!(record.blocks()[1].partition_address, input::LOADER_ADDRESS);

    let combined = read_hex(dir.path().join("combined_signed_update_images.hex"));
    assert_eq!(combined.min_address(), Some(metadata_address));
    assert_eq!(verify_combined(&combined, metadata_address).unwrap(), record);
    let blob_address = metadata_address + record.encoded_len() as u32;
    assert_eq!(
        combined.read(blob_address, params.softdevice_payload.len()),
        Some(params.softdevice_payload.as_slice())
    );

    assert!(!dir.path().join("flash_metadata.hex").exists());
}

/// Without a firmware loader only the SoftDevice is described.
#[test]
fn update_without_firmware_loader() {
    let params = Params {
        firmware_loader: false,
        ..Default::default()
    };
    let dir = params.build_dir();
    let output = test(["update", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(0));

    let metadata = read_hex(dir.path().join("metadata.hex")).to_contiguous();
    assert_eq!(metadata.len(), 4 + 24 + 4);
    let combined = read_hex(dir.path().join("combined_signed_update_images.hex"));
    assert_eq!(
        combined.span_len(),
        metadata.len() + params.softdevice_payload.len()
    );
}

/// Generate everything at once, twice, with identical results.
#[test]
fn all_is_reproducible() {
    let dir = Params::default().build_dir();
    let names = [
        "flash_metadata.hex",
        "metadata.hex",
        "combined_signed_update_images.hex",
    ];

    let output = test(["all", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(0));
    let first: Vec<_> = names
        .iter()
        .map(|name| std::fs::read(dir.path().join(name)).unwrap())
        .collect();

    let output = test(["all", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(0));
    let second: Vec<_> = names
        .iter()
        .map(|name| std::fs::read(dir.path().join(name)).unwrap())
        .collect();
    assert_eq!(first, second);
}

/// A build without a SoftDevice has nothing to describe.
#[test]
fn softdevice_disabled_is_a_no_op() {
    let dir = Params {
        softdevice: false,
        ..Default::default()
    }
    .build_dir();
    let output = test(["all", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stderr.is_empty());
    assert!(!dir.path().join("flash_metadata.hex").exists());
    assert!(!dir.path().join("metadata.hex").exists());
}

/// Attempt to generate from a directory that does not exist.
#[test]
fn missing_build_dir() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("build");
    let output = test(["all", "--build-dir", path(&missing)]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("build directory does not exist"));
}

/// Attempt to generate without a CMake cache.
#[test]
fn missing_cmake_cache() {
    let dir = Params::default().build_dir();
    std::fs::remove_file(dir.path().join("CMakeCache.txt")).unwrap();
    let output = test(["flash", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("config file does not exist"));
    assert!(output.stderr.contains("CMakeCache.txt"));
}

/// A missing payload fails the run without leaving other outputs behind.
#[test]
fn missing_softdevice_payload_writes_nothing() {
    let dir = Params::default().build_dir();
    std::fs::remove_file(dir.path().join("softdevice.signed.hex")).unwrap();
    let output = test(["all", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("softdevice.signed.hex"));
    assert!(!dir.path().join("flash_metadata.hex").exists());
    assert!(!dir.path().join("metadata.hex").exists());
}

/// Attempt to generate without the firmware loader's build.
#[test]
fn missing_firmware_loader_build() {
    let dir = Params::default().build_dir();
    std::fs::remove_dir_all(dir.path().join(input::LOADER)).unwrap();
    let output = test(["update", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains(input::LOADER));
}

/// Attempt to generate with a devicetree lacking the SoftDevice partition.
#[test]
fn missing_partition() {
    let dir = Params::default().build_dir();
    input::write(
        &dir.path().join(input::APP).join("zephyr/zephyr.dts"),
        "/dts-v1/;\n/ { };\n",
    );
    let output = test(["flash", "--build-dir", path(dir.path())]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("softdevice_partition"));
}

/// Override inputs and outputs from a config file found in the build
/// directory.
#[test]
fn config_file_in_build_dir() {
    let params = Params::default();
    let dir = params.build_dir();
    let root = dir.path();
    std::fs::rename(
        root.join("softdevice.signed.hex"),
        root.join("s115.signed.hex"),
    )
    .unwrap();
    input::write(
        &root.join("bm-metadata.toml"),
        "softdevice_image = \"s115.signed.hex\"\nmetadata_output = \"out/metadata.hex\"\n",
    );
    std::fs::create_dir(root.join("out")).unwrap();

    let output = test(["update", "--build-dir", path(root)]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(root.join("out/metadata.hex").exists());
    assert!(!root.join("metadata.hex").exists());
    assert!(root.join("combined_signed_update_images.hex").exists());
}

/// Read the partitions from a JSON node list given on the command line.
#[test]
fn hardware_description_from_cli() {
    let dir = Params::default().build_dir();
    let json = dir.path().join("edt.json");
    input::write(
        &json,
        &format!(
            r#"{{"nodes": [
                {{"path": "/a", "labels": ["softdevice_partition"], "reg": [{}, {}]}},
                {{"path": "/b", "labels": ["metadata_partition"], "reg": [{}, 4096]}}
            ]}}"#,
            0x30000, 0x1000, 0x70000
        ),
    );
    let output = test([
        "flash",
        "--build-dir",
        path(dir.path()),
        "--hardware-description",
        path(&json),
    ]);
    // The firmware loader is enabled, but slot1 is missing from the node list.
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("slot1_partition"));
}

/// Attempt to specify the SoftDevice image both in the config file and on the
/// CLI.
#[test]
fn softdevice_image_in_config_and_cli() {
    let dir = Params::default().build_dir();
    let config = create_file(b"softdevice_image = \"softdevice.signed.hex\"\n");
    let output = test([
        "update",
        "--build-dir",
        path(dir.path()),
        "--config",
        path(config.path()),
        "--softdevice-image",
        path(&dir.path().join("softdevice.signed.hex")),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output
        .stderr
        .contains("SoftDevice image specified in both config and cli"));
}

/// Attempt to use a config file with an unknown key.
#[test]
fn config_unknown_key() {
    let dir = Params::default().build_dir();
    let config = create_file(b"softdevice = \"sd.hex\"\n");
    let output = test([
        "update",
        "-c",
        path(config.path()),
        "--build-dir",
        path(dir.path()),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("config error: invalid layout file"));
    assert!(output.stderr.contains(path(config.path())));
}

/// Attempt to use a config file that does not exist.
#[test]
fn config_file_missing() {
    let dir = Params::default().build_dir();
    let missing = dir.path().join("layout.toml");
    let output = test([
        "flash",
        "--config",
        path(&missing),
        "--build-dir",
        path(dir.path()),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("failed to read layout file"));
    assert!(output.stderr.contains("layout.toml"));
}

/// Attempt to write two outputs to the same file.
#[test]
fn duplicate_outputs() {
    let dir = Params::default().build_dir();
    let config = create_file(b"metadata_output = \"flash_metadata.hex\"\n");
    let output = test([
        "all",
        "--build-dir",
        path(dir.path()),
        "--config",
        path(config.path()),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("output file used more than once"));
}

/// Dump the metadata written by the update command.
#[test]
fn dump_metadata_only() {
    let dir = Params::default().build_dir();
    assert_eq!(
        test(["update", "--build-dir", path(dir.path())]).exit_code,
        ExitCode(0)
    );
    let output = test(["dump", "-i", path(&dir.path().join("metadata.hex"))]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stderr.is_empty());
    // Prints the address right after the installer.
    assert!(output.stdout.contains("0x0007c180"));
    // Prints both images and their partitions.
    assert!(output.stdout.contains("SoftDevice (1)"));
    assert!(output.stdout.contains("firmware loader (2)"));
    assert!(output.stdout.contains("0x00027000 184 KiB (188416)"));
    // Payload sizes in human-readable form.
    assert!(output.stdout.contains("1 KiB (1024)"));
    assert!(output.stdout.contains("payload not included"));
}

/// Dump and verify the combined image.
#[test]
fn dump_combined() {
    let dir = Params::default().build_dir();
    assert_eq!(
        test(["update", "--build-dir", path(dir.path())]).exit_code,
        ExitCode(0)
    );
    let output = test([
        "dump",
        "-i",
        path(&dir.path().join("combined_signed_update_images.hex")),
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("verified"));
    assert!(!output.stdout.contains("payload not included"));
}

/// Attempt to dump a file that holds no update metadata.
#[test]
fn dump_not_metadata() {
    let file = create_file(b":0400000001020304F2\n:00000001FF\n");
    let output = test(["dump", "-i", path(file.path())]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stdout.is_empty());
    assert!(output.stderr.contains("invalid update metadata"));
}

/// Attempt to dump a file that is not Intel HEX.
#[test]
fn dump_not_hex() {
    let file = create_file(b"Hello, world!");
    let output = test(["dump", "-i", path(file.path())]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("Intel HEX"));
}

/// Attempt to run without a subcommand.
#[test]
fn no_subcommand() {
    let output = test([]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("Usage"));
}

fn test<const N: usize>(args: [&str; N]) -> Output {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = crate::main_args(
        std::iter::once("bm-metadata").chain(args),
        &mut stdout,
        &mut stderr,
    );
    println!("* args: {:?}", args);
    println!("* exit_code: {:?}", exit_code);
    println!("* stdout:\n{}", String::from_utf8_lossy(&stdout));
    println!("* stderr:\n{}", String::from_utf8_lossy(&stderr));
    Output {
        exit_code,
        stdout: String::from_utf8(stdout).unwrap(),
        stderr: String::from_utf8(stderr).unwrap(),
    }
}

#[derive(Debug)]
struct Output {
    exit_code: ExitCode,
    stdout: String,
    stderr: String,
}

fn path(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn create_file(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file
}
