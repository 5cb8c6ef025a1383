//! Content-type detection from leading bytes and file names.
//!
//! Magic numbers win over file extensions, except for container formats
//! (ZIP, OLE2) where the extension tells the specific document type apart.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::warn;

/// Fallback when nothing better is known.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Number of leading bytes inspected by [`detect_path`].
pub const HEADER_LEN: usize = 1024;

const EXTENSIONS: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("text", "text/plain"),
    ("log", "text/plain"),
    ("md", "text/markdown"),
    ("csv", "text/csv"),
    ("css", "text/css"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("xhtml", "application/xhtml+xml"),
    ("xml", "text/xml"),
    ("rdf", "application/rdf+xml"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("rtf", "application/rtf"),
    ("pdf", "application/pdf"),
    ("ps", "application/postscript"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("bmp", "image/bmp"),
    ("svg", "image/svg+xml"),
    ("odt", "application/vnd.oasis.opendocument.text"),
    ("ods", "application/vnd.oasis.opendocument.spreadsheet"),
    ("odp", "application/vnd.oasis.opendocument.presentation"),
    ("doc", "application/msword"),
    ("xls", "application/vnd.ms-excel"),
    ("ppt", "application/vnd.ms-powerpoint"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
    ("epub", "application/epub+zip"),
    ("jar", "application/java-archive"),
    ("zip", "application/zip"),
    ("gz", "application/x-gzip"),
    ("tgz", "application/x-gzip"),
    ("tar", "application/x-tar"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/x-wav"),
    ("ogg", "application/ogg"),
    ("mp4", "video/mp4"),
    ("m4v", "video/mp4"),
    ("mov", "video/quicktime"),
    ("avi", "video/x-msvideo"),
    ("flv", "video/x-flv"),
];

/// MIME type registered for the extension of `name`, if any.
pub fn from_name(name: &str) -> Option<&'static str> {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// Detect the MIME type of `bytes`, optionally helped by a file name.
pub fn detect(bytes: &[u8], name: Option<&str>) -> String {
    let by_name = name.and_then(from_name);
    if let Some(mime) = sniff(bytes, by_name) {
        return mime;
    }
    if let Some(mime) = by_name {
        return mime.to_string();
    }
    if looks_like_text(bytes) {
        return "text/plain".to_string();
    }
    DEFAULT_MIME_TYPE.to_string()
}

/// Detect the MIME type of the file at `path` from its header and name.
///
/// Unreadable files fall back to the name alone, then to
/// [`DEFAULT_MIME_TYPE`].
pub fn detect_path(path: &Path) -> String {
    let name = path.file_name().and_then(|n| n.to_str());
    let mut header = Vec::with_capacity(HEADER_LEN);
    let read = File::open(path).and_then(|f| f.take(HEADER_LEN as u64).read_to_end(&mut header));
    match read {
        Ok(_) => detect(&header, name),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read header for MIME detection");
            name.and_then(from_name)
                .unwrap_or(DEFAULT_MIME_TYPE)
                .to_string()
        }
    }
}

fn sniff(bytes: &[u8], by_name: Option<&'static str>) -> Option<String> {
    let fixed = |m: &str| Some(m.to_string());

    if bytes.starts_with(b"%PDF") {
        return fixed("application/pdf");
    }
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return fixed("image/png");
    }
    if bytes.starts_with(b"\xff\xd8\xff") {
        return fixed("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return fixed("image/gif");
    }
    if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        return fixed("image/tiff");
    }
    if bytes.starts_with(b"%!PS") {
        return fixed("application/postscript");
    }
    if bytes.starts_with(b"{\\rtf") {
        return fixed("application/rtf");
    }
    if bytes.starts_with(b"\x1f\x8b") {
        return fixed("application/x-gzip");
    }
    if bytes.starts_with(b"OggS") {
        return fixed("application/ogg");
    }
    if bytes.starts_with(b"ID3") || bytes.starts_with(b"\xff\xfb") {
        return fixed("audio/mpeg");
    }
    if bytes.starts_with(b"FLV\x01") {
        return fixed("video/x-flv");
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") {
        match &bytes[8..12] {
            b"WAVE" => return fixed("audio/x-wav"),
            b"AVI " => return fixed("video/x-msvideo"),
            b"WEBP" => return fixed("image/webp"),
            _ => {}
        }
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        if &bytes[8..10] == b"qt" {
            return fixed("video/quicktime");
        }
        return fixed("video/mp4");
    }
    if bytes.starts_with(b"PK\x03\x04") {
        if let Some(mime) = opendocument_mimetype(bytes) {
            return Some(mime);
        }
        return fixed(by_name.filter(|m| is_zip_based(m)).unwrap_or("application/zip"));
    }
    if bytes.starts_with(b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1") {
        let ole = ["application/msword", "application/vnd.ms-excel", "application/vnd.ms-powerpoint"];
        return fixed(by_name.filter(|m| ole.contains(m)).unwrap_or("application/msword"));
    }
    sniff_markup(bytes)
}

/// ODF packages store their MIME type uncompressed as the first ZIP entry.
fn opendocument_mimetype(bytes: &[u8]) -> Option<String> {
    if bytes.get(30..38)? != b"mimetype" {
        return None;
    }
    let rest = bytes.get(38..)?;
    let end = rest
        .iter()
        .position(|b| !(b.is_ascii_graphic()) || *b == b'P')
        .unwrap_or(rest.len());
    let mime = std::str::from_utf8(&rest[..end]).ok()?;
    mime.contains('/').then(|| mime.to_string())
}

fn is_zip_based(mime: &str) -> bool {
    mime.starts_with("application/vnd.")
        || mime == "application/epub+zip"
        || mime == "application/java-archive"
        || mime == "application/zip"
}

fn sniff_markup(bytes: &[u8]) -> Option<String> {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace())?;
    let head: Vec<u8> = bytes[start..]
        .iter()
        .take(64)
        .map(|b| b.to_ascii_lowercase())
        .collect();
    if head.starts_with(b"<!doctype html") || head.starts_with(b"<html") {
        return Some("text/html".to_string());
    }
    if head.starts_with(b"<svg") {
        return Some("image/svg+xml".to_string());
    }
    if head.starts_with(b"<?xml") {
        let lower = String::from_utf8_lossy(&bytes[start..bytes.len().min(start + 512)]).to_ascii_lowercase();
        if lower.contains("<svg") {
            return Some("image/svg+xml".to_string());
        }
        if lower.contains("<html") {
            return Some("application/xhtml+xml".to_string());
        }
        return Some("text/xml".to_string());
    }
    None
}

fn looks_like_text(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    // A truncated header may cut a multi-byte sequence at the end.
    let valid = match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    };
    valid
        && !bytes
            .iter()
            .any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c))
}
