//! Metadata probing behind a capability-set interface.
//!
//! The pipeline only depends on [`MetadataProbe`]; the stock [`FsProbe`]
//! wraps `mime_guess` and EXIF reading plus a bounded text-head read.
//! Probe failures are never fatal: a file that cannot be probed simply gets
//! the octet-stream MIME and an empty metadata map. The probe runs at most
//! once per file; results are cached on the FileRecord.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

pub const FALLBACK_MIME: &str = "application/octet-stream";

/// Bytes of document head kept as metadata for text-like files.
pub const DOC_HEAD_LIMIT: usize = 256;

pub trait MetadataProbe: Send + Sync {
    /// Best-effort MIME type; never fails, falls back to octet-stream.
    fn probe_mime(&self, path: &Path) -> String;

    /// EXIF-derived metadata for image files; empty on any failure.
    fn probe_exif(&self, path: &Path) -> BTreeMap<String, String>;

    /// Leading text of a document, whitespace-collapsed; empty on failure.
    fn probe_doc_head(&self, path: &Path, limit: usize) -> String;
}

/// Run the full probe once for a file and return its metadata map.
pub fn probe_file(probe: &dyn MetadataProbe, path: &Path, mime: &str) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();

    if mime.starts_with("image/") {
        metadata.extend(probe.probe_exif(path));
    }

    if mime.starts_with("text/") {
        let head = probe.probe_doc_head(path, DOC_HEAD_LIMIT);
        if !head.is_empty() {
            metadata.insert("doc_head".to_string(), head);
        }
    }

    metadata
}

/// Filesystem-backed probe used outside of tests.
#[derive(Debug, Default, Clone)]
pub struct FsProbe;

impl MetadataProbe for FsProbe {
    fn probe_mime(&self, path: &Path) -> String {
        mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(FALLBACK_MIME)
            .to_string()
    }

    fn probe_exif(&self, path: &Path) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        let is_image = matches!(
            extension.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "heic" | "heif" | "tiff" | "tif"
        );
        if !is_image {
            return data;
        }

        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(_) => return data,
        };

        let mut bufreader = std::io::BufReader::new(file);
        let reader = match exif::Reader::new().read_from_container(&mut bufreader) {
            Ok(reader) => reader,
            Err(_) => return data,
        };

        let datetime = reader
            .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
            .or_else(|| reader.get_field(exif::Tag::DateTime, exif::In::PRIMARY));
        if let Some(field) = datetime {
            let display = field.display_value().to_string();
            let mut parts = display.split_whitespace();
            if let Some(date) = parts.next() {
                let pieces: Vec<&str> = date.split([':', '-']).collect();
                if pieces.len() >= 3 {
                    data.insert("backup_year".to_string(), pieces[0].to_string());
                    data.insert("backup_month".to_string(), pieces[1].to_string());
                }
            }
            if let Some(time) = parts.next() {
                data.insert("backup_time".to_string(), time.to_string());
            }
        }

        if let Some(field) = reader.get_field(exif::Tag::Make, exif::In::PRIMARY) {
            data.insert("exif_make".to_string(), field.display_value().to_string());
        }
        if let Some(field) = reader.get_field(exif::Tag::Model, exif::In::PRIMARY) {
            data.insert("exif_model".to_string(), field.display_value().to_string());
        }

        data
    }

    fn probe_doc_head(&self, path: &Path, limit: usize) -> String {
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(_) => return String::new(),
        };

        let mut buffer = Vec::with_capacity(limit);
        if file.take(limit as u64).read_to_end(&mut buffer).is_err() {
            return String::new();
        }

        String::from_utf8_lossy(&buffer)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_mime_fallback() {
        let probe = FsProbe;
        assert_eq!(probe.probe_mime(Path::new("/x/blob")), FALLBACK_MIME);
        assert_eq!(probe.probe_mime(Path::new("/x/a.jpg")), "image/jpeg");
        assert_eq!(probe.probe_mime(Path::new("/x/a.pdf")), "application/pdf");
        assert_eq!(probe.probe_mime(Path::new("/x/a.mp3")), "audio/mpeg");
    }

    #[test]
    fn test_exif_on_non_image_is_empty() {
        let probe = FsProbe;
        assert!(probe.probe_exif(Path::new("/x/notes.txt")).is_empty());
    }

    #[test]
    fn test_exif_on_unreadable_image_is_empty() {
        let probe = FsProbe;
        assert!(probe.probe_exif(Path::new("/no/such/photo.jpg")).is_empty());
    }

    #[test]
    fn test_doc_head_collapses_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "Invoice   2024\n\n  total:   42").unwrap();

        let probe = FsProbe;
        let head = probe.probe_doc_head(&path, DOC_HEAD_LIMIT);
        assert_eq!(head, "Invoice 2024 total: 42");
    }

    #[test]
    fn test_probe_file_text_gets_doc_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "hello world").unwrap();

        let probe = FsProbe;
        let metadata = probe_file(&probe, &path, "text/plain");
        assert_eq!(metadata.get("doc_head").map(String::as_str), Some("hello world"));
    }
}
