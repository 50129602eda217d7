use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{ClaimError, Result};

/// Extract the full text of a PDF, concatenated across pages.
///
/// Yields an empty string (not an error) when the document parses but has no
/// extractable text on any page.
pub fn extract_pdf_text(path: &Path) -> Result<String> {
    let text = pdf_extract::extract_text(path).map_err(|err| ClaimError::PdfExtraction {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    Ok(text.trim().to_string())
}

/// Expand a zip of invoices into `dest_dir`, keeping only top-level `.pdf`
/// entries. Nested directories and non-PDF payloads are skipped. Returns the
/// extracted paths sorted by file name, which fixes batch discovery order.
pub fn expand_invoice_archive(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|err| ClaimError::InvalidArchive(err.to_string()))?;
    std::fs::create_dir_all(dest_dir)?;
    let mut extracted = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| ClaimError::InvalidArchive(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "skipping archive entry with unsafe path");
            continue;
        };
        // Top-level entries only.
        if name.components().count() != 1 {
            continue;
        }
        if !is_pdf(&name) {
            continue;
        }
        let Some(file_name) = name.file_name() else {
            continue;
        };
        let dest = dest_dir.join(file_name);
        let mut out = File::create(&dest)?;
        io::copy(&mut entry, &mut out)?;
        extracted.push(dest);
    }
    extracted.sort();
    Ok(extracted)
}

/// List the `.pdf` files directly under `dir`, sorted by name.
pub fn discover_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| ClaimError::Other(err.to_string()))?;
        if entry.file_type().is_file() && is_pdf(entry.path()) {
            found.push(entry.path().to_path_buf());
        }
    }
    found.sort();
    Ok(found)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn build_archive(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, data) in entries {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn archive_expansion_keeps_top_level_pdfs_only() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("invoices.zip");
        build_archive(
            &archive_path,
            &[
                ("b_invoice.pdf", b"fake pdf".as_slice()),
                ("a_invoice.pdf", b"fake pdf".as_slice()),
                ("nested/deep.pdf", b"skip".as_slice()),
                ("notes.txt", b"skip".as_slice()),
            ],
        );
        let dest = dir.path().join("out");
        let extracted = expand_invoice_archive(&archive_path, &dest).unwrap();
        let names: Vec<_> = extracted
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a_invoice.pdf", "b_invoice.pdf"]);
    }

    #[test]
    fn discover_pdfs_is_sorted_and_shallow() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("z.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("a.PDF"), b"x").unwrap();
        std::fs::write(dir.path().join("readme.md"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/inner.pdf"), b"x").unwrap();
        let found = discover_pdfs(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.PDF", "z.pdf"]);
    }

    #[test]
    fn invalid_archive_is_reported() {
        let dir = tempdir().unwrap();
        let bogus = dir.path().join("broken.zip");
        std::fs::write(&bogus, b"not a zip").unwrap();
        let err = expand_invoice_archive(&bogus, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, ClaimError::InvalidArchive(_)));
    }
}
