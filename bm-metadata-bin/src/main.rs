// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    bm_metadata::{combined, crc32, image::SparseImage, update::UpdateMetadata},
    colored::Colorize,
    std::{
        ffi::OsString,
        io::Write,
        path::{Path, PathBuf},
    },
    tracing_subscriber::{fmt, prelude::*, EnvFilter},
};

mod args;
mod build_dir;

#[cfg(test)]
mod tests;

fn main() -> std::process::ExitCode {
    let args: Vec<OsString> = std::env::args_os().collect();

    // Tracing using RUST_LOG, info by default and debug with --verbose.
    let default_level = if args::verbose(&args) { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    main_args(args, &mut std::io::stdout(), &mut std::io::stderr()).into()
}

fn main_args<I, T>(args: I, stdout: impl Write, mut stderr: impl Write) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match run(args, stdout) {
        Ok(()) => ExitCode(0),
        Err(Error::Args(e @ args::Error::Cli(_))) => {
            // Clap already does the "error: {}" formatting.
            writeln!(stderr, "{e}").expect("write error to stderr");
            ExitCode(1)
        }
        Err(e) => {
            writeln!(stderr, "{} {e}", "error:".bold().red()).expect("write error to stderr");
            ExitCode(1)
        }
    }
}

fn run<I, T>(args: I, mut stdout: impl Write) -> Result<(), Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match args::args(args)? {
        args::Args::Generate { outputs, layout } => {
            let Some(context) = build_dir::BuildContext::load(&layout)? else {
                return Ok(());
            };

            // Compute everything before touching the build directory, so a
            // failure leaves no partial output behind.
            let mut artifacts = Vec::new();
            if outputs.flash() {
                artifacts.push(context.flash_metadata()?);
            }
            if outputs.update() {
                artifacts.extend(context.update_images()?);
            }
            let mut rendered = Vec::with_capacity(artifacts.len());
            for artifact in &artifacts {
                rendered.push((&artifact.path, artifact.image.to_ihex()?));
            }

            let mut staged = Vec::with_capacity(rendered.len());
            for (path, text) in rendered {
                staged.push((path, stage(path, &text)?));
            }
            let mut persisted = Vec::with_capacity(staged.len());
            for (path, file) in staged {
                if let Err(e) = file.persist(path) {
                    // Outputs already moved into place by this run go too.
                    remove_outputs(&persisted);
                    return Err(Error::PersistOutputFile {
                        path: path.clone(),
                        source: e.error,
                    });
                }
                tracing::info!("wrote {}", path.display());
                persisted.push(path);
            }
        }
        args::Args::Dump { input } => {
            let image = SparseImage::load(&input)?;
            let address = image.min_address().unwrap_or_default();
            let data = image.read_from(address).unwrap_or_default();
            let metadata = UpdateMetadata::parse(data)?;
            // Payloads are only checked if the file carries them.
            let payloads = &data[metadata.encoded_len()..];
            if !payloads.is_empty() {
                combined::verify_combined(&image, address)?;
            }
            print_metadata(&mut stdout, address, &metadata, data).map_err(Error::Stdout)?;
        }
    }
    Ok(())
}

/// Write `text` to a temporary file next to `path`.
fn stage(path: &Path, text: &str) -> Result<tempfile::NamedTempFile, Error> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|source| Error::CreateTempFile {
        path: path.to_owned(),
        source,
    })?;
    file.write_all(text.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|source| Error::WriteOutputFile {
            path: path.to_owned(),
            source,
        })?;
    Ok(file)
}

fn remove_outputs(paths: &[&PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("failed to remove {}: {e}", path.display());
        }
    }
}

/// Print a verified metadata record. `data` is the record followed by any
/// payload bytes.
fn print_metadata(
    mut stdout: impl Write,
    address: u32,
    metadata: &UpdateMetadata,
    data: &[u8],
) -> std::io::Result<()> {
    let record_len = metadata.encoded_len();
    let (record, payloads) = data.split_at(record_len);
    let trailer = u32::from_le_bytes(record[record_len - 4..].try_into().expect("4 bytes"));

    writeln!(stdout, "{:10} {address:#010x}", "address".bold())?;
    writeln!(stdout, "{:10} {record_len} B", "length".bold())?;
    writeln!(stdout, "{:10} {trailer:#010x} (valid)", "checksum".bold())?;
    for block in metadata.blocks() {
        writeln!(stdout)?;
        writeln!(
            stdout,
            "{:10} {} ({})",
            "image".bold(),
            block.image_id,
            block.image_id as u8
        )?;
        writeln!(
            stdout,
            "{:10} {:#010x} {} ({})",
            "partition".bold(),
            block.partition_address,
            humansize::format_size(block.partition_size, humansize::BINARY),
            block.partition_size
        )?;
        writeln!(
            stdout,
            "{:10} {:#x} {} ({})",
            "blob".bold(),
            block.blob_offset,
            humansize::format_size(block.blob_size, humansize::BINARY),
            block.blob_size
        )?;
        let status = if payloads.is_empty() {
            "payload not included"
        } else {
            "verified"
        };
        writeln!(stdout, "{:10} {:#010x} {status}", "crc".bold(), block.crc)?;
    }
    if !payloads.is_empty() {
        writeln!(stdout)?;
        writeln!(
            stdout,
            "{:10} {} ({:#010x})",
            "payloads".bold(),
            humansize::format_size(payloads.len(), humansize::BINARY),
            crc32(payloads)
        )?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitCode(u8);

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        code.0.into()
    }
}

#[derive(Debug)]
enum Error {
    Args(args::Error),
    Metadata(bm_metadata::Error),
    CreateTempFile {
        path: PathBuf,
        source: std::io::Error,
    },
    PersistOutputFile {
        path: PathBuf,
        source: std::io::Error,
    },
    Stdout(std::io::Error),
    WriteOutputFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<args::Error> for Error {
    fn from(e: args::Error) -> Self {
        Error::Args(e)
    }
}

impl From<bm_metadata::Error> for Error {
    fn from(e: bm_metadata::Error) -> Self {
        Error::Metadata(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Args(e) => write!(f, "{e}"),
            Error::Metadata(e) => write!(f, "{e}"),
            Error::CreateTempFile { path, source } => write!(
                f,
                "failed to create temporary file for {}: {source}",
                path.display()
            ),
            Error::PersistOutputFile { path, source } => {
                write!(f, "failed to move output into {}: {source}", path.display())
            }
            Error::Stdout(e) => write!(f, "failed to write to stdout: {e}"),
            Error::WriteOutputFile { path, source } => {
                write!(f, "failed to write output file {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for Error {}
