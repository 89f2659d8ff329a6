//! Zip encoding of a sandbox directory for download.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::{AppError, Result};

/// Encode the full contents of `dir` as an in-memory zip archive.
///
/// Entry names are relative to `dir`, with `/` separators.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory cannot be read or the
/// archive cannot be written.
pub fn zip_dir(dir: &Path) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_dir(&mut writer, dir, Path::new(""), options)?;

    let cursor = writer
        .finish()
        .map_err(|err| AppError::Io(format!("failed to finish archive: {err}")))?;
    Ok(cursor.into_inner())
}

fn add_dir(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    root: &Path,
    relative: &Path,
    options: SimpleFileOptions,
) -> Result<()> {
    let absolute = root.join(relative);
    for entry in std::fs::read_dir(&absolute)? {
        let entry = entry?;
        let rel = relative.join(entry.file_name());
        let name = rel.to_string_lossy().replace('\\', "/");
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(|err| AppError::Io(format!("failed to add directory {name}: {err}")))?;
            add_dir(writer, root, &rel, options)?;
        } else if file_type.is_file() {
            writer
                .start_file(name.clone(), options)
                .map_err(|err| AppError::Io(format!("failed to add file {name}: {err}")))?;
            let mut file = std::fs::File::open(entry.path())?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            writer
                .write_all(&buf)
                .map_err(|err| AppError::Io(format!("failed to write file {name}: {err}")))?;
        }
        // Symlinks and other special files are skipped; a sandbox
        // export is a content snapshot, not a filesystem image.
    }
    Ok(())
}
