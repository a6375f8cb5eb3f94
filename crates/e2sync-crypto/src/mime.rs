//! Content type detection for new manifest records

use std::path::Path;

const OCTET_STREAM: &str = "application/octet-stream";

/// Detect the MIME type of a local file.
///
/// The file extension wins; files without a known extension are sniffed
/// by their leading bytes.
pub fn detect_mimetype(path: &Path) -> String {
    if let Some(guess) = mime_guess::from_path(path).first_raw() {
        return guess.to_owned();
    }

    match infer::get_from_path(path) {
        Ok(Some(kind)) => kind.mime_type().to_owned(),
        _ => OCTET_STREAM.to_owned(),
    }
}
