use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use realid_contracts::{EncodedImage, StudioError};
use thiserror::Error;

use crate::{extension_for_mime, mime_for_path};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Failed to read file {name}. The file may be corrupt or unsupported.")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("File {name} is empty.")]
    Empty { name: String },
    #[error("File {name} is not a supported image.")]
    Unsupported { name: String },
}

impl From<EncodeError> for StudioError {
    fn from(err: EncodeError) -> Self {
        StudioError::Input(err.to_string())
    }
}

/// Reads an image file into the encoded form the backends consume.
///
/// The MIME type comes from the extension, falling back to sniffing the
/// bytes when the extension is missing or unknown.
pub fn encode_file(path: &Path) -> Result<EncodedImage, EncodeError> {
    let name = path
        .file_name()
        .map(|value| value.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let bytes = fs::read(path).map_err(|source| EncodeError::Read {
        name: name.clone(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(EncodeError::Empty { name });
    }
    let mime = mime_for_path(path)
        .or_else(|| {
            image::guess_format(&bytes)
                .ok()
                .map(|format| format.to_mime_type())
        })
        .ok_or(EncodeError::Unsupported { name })?;
    Ok(EncodedImage::new(mime, BASE64.encode(bytes)))
}

/// Decodes `image` and writes it to `dir/{file_stem}.{ext}`.
pub fn export_image(dir: &Path, image: &EncodedImage, file_stem: &str) -> Result<PathBuf> {
    let bytes = BASE64
        .decode(image.data())
        .context("image base64 decode failed")?;
    let ext = extension_for_mime(image.mime_type())
        .or_else(|| {
            image::guess_format(&bytes)
                .ok()
                .and_then(|format| format.extensions_str().first().copied())
        })
        .unwrap_or("png");
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!("{file_stem}.{ext}"));
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub fn generation_file_stem(index: usize) -> String {
    format!("realid-gen-{}-{index}", timestamp_millis())
}

pub fn edit_file_stem(index: usize) -> String {
    format!("realid-edit-{}-{index}", timestamp_millis())
}

fn timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
