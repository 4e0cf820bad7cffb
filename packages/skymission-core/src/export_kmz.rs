use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{MissionError, Result};
use crate::template_injector::{MissionDocuments, TEMPLATE_KML_NAME, WAYLINES_WPML_NAME};

/// Entry names the ground-control app looks for inside a mission archive.
pub const KMZ_TEMPLATE_ENTRY: &str = TEMPLATE_KML_NAME;
pub const KMZ_WAYLINES_ENTRY: &str = WAYLINES_WPML_NAME;
pub const KMZ_EXTENSION: &str = "kmz";

/// Write a deflated archive at `destination` holding exactly two entries.
/// The archive is built beside `destination` and renamed into place, so a
/// failure never leaves a truncated file; an existing file is replaced.
pub fn pack(bytes_a: &[u8], bytes_b: &[u8], destination: &Path, name_a: &str, name_b: &str) -> Result<()> {
    let partial = partial_path(destination);
    let written = write_archive(&partial, [(name_a, bytes_a), (name_b, bytes_b)]).and_then(|()| {
        fs::rename(&partial, destination)
            .map_err(|e| MissionError::io(format!("moving archive into {}", destination.display()), e))
    });
    if written.is_err() {
        let _ = fs::remove_file(&partial);
    }
    written?;
    debug!("packed {} ({} + {} bytes)", destination.display(), bytes_a.len(), bytes_b.len());
    Ok(())
}

fn write_archive(path: &Path, entries: [(&str, &[u8]); 2]) -> Result<()> {
    let file = File::create(path).map_err(|e| MissionError::io(format!("creating {}", path.display()), e))?;
    let mut archive = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in entries {
        archive.start_file(name, options)?;
        archive
            .write_all(bytes)
            .map_err(|e| MissionError::io(format!("writing {} into {}", name, path.display()), e))?;
    }
    archive.finish()?;
    Ok(())
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Pack a document pair under the conventional entry names.
pub fn pack_mission(documents: &MissionDocuments, destination: &Path) -> Result<()> {
    pack(&documents.kml, &documents.wpml, destination, KMZ_TEMPLATE_ENTRY, KMZ_WAYLINES_ENTRY)
}
