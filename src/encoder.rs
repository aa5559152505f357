use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::path::{Path, PathBuf};

use crate::errors::EncodeError;

/// Media types the estimation service is known to handle well.
pub const PREFERRED_MEDIA_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/heic",
    "image/heif",
];

/// Image bytes as base64 text plus their media type.
///
/// Immutable once built; a new selection or capture replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    payload: String,
    media_type: String,
}

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8], media_type: impl Into<String>) -> Self {
        Self {
            payload: STANDARD.encode(bytes),
            media_type: media_type.into(),
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Decode the payload back to the original bytes.
    pub fn decode_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        STANDARD
            .decode(&self.payload)
            .map_err(|e| EncodeError::MalformedEncoding(e.to_string()))
    }

    /// Decode into pixels for on-screen preview. Formats the `image` crate
    /// cannot decode (HEIC, for instance) simply have no preview.
    pub fn decode_preview(&self) -> Option<image::RgbImage> {
        let bytes = self.decode_bytes().ok()?;
        match image::load_from_memory(&bytes) {
            Ok(img) => Some(img.to_rgb8()),
            Err(e) => {
                log::debug!("No preview for {}: {}", self.media_type, e);
                None
            }
        }
    }
}

/// A user-supplied image: a declared content type and readable bytes.
#[async_trait]
pub trait ImageSource: std::fmt::Debug + Send + Sync {
    fn declared_type(&self) -> &str;

    fn name(&self) -> String;

    async fn read(&self) -> std::io::Result<Vec<u8>>;
}

/// An image file on disk, typed by its extension.
#[derive(Debug, Clone)]
pub struct FileResource {
    path: PathBuf,
    declared_type: String,
}

impl FileResource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let declared_type = media_type_for_path(&path).to_string();
        Self { path, declared_type }
    }
}

#[async_trait]
impl ImageSource for FileResource {
    fn declared_type(&self) -> &str {
        &self.declared_type
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }

    async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

/// Bytes already in memory, e.g. pasted or produced by another component.
#[derive(Debug, Clone)]
pub struct MemoryResource {
    name: String,
    declared_type: String,
    bytes: Vec<u8>,
}

impl MemoryResource {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            bytes,
        }
    }
}

#[async_trait]
impl ImageSource for MemoryResource {
    fn declared_type(&self) -> &str {
        &self.declared_type
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    async fn read(&self) -> std::io::Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

pub fn media_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Read `source` fully and produce its transport encoding.
pub async fn encode(source: &dyn ImageSource) -> Result<EncodedImage, EncodeError> {
    let declared = source.declared_type();
    if !declared.starts_with("image/") {
        return Err(EncodeError::UnsupportedType(declared.to_string()));
    }

    let bytes = source
        .read()
        .await
        .map_err(|e| EncodeError::ReadError(e.to_string()))?;

    let data_url = format!("data:{};base64,{}", declared, STANDARD.encode(&bytes));
    let (media_type, payload) = split_data_url(&data_url)?;

    if !PREFERRED_MEDIA_TYPES.contains(&media_type.to_lowercase().as_str()) {
        log::warn!(
            "MIME type {} might not be optimally supported by the estimator. PNG, JPEG and WEBP are preferred.",
            media_type
        );
    }

    log::debug!("Encoded {} ({} bytes, {})", source.name(), bytes.len(), media_type);
    Ok(EncodedImage {
        payload: payload.to_string(),
        media_type: media_type.to_string(),
    })
}

/// Split `data:<type>;base64,<body>` into its media type and body.
pub fn split_data_url(data_url: &str) -> Result<(&str, &str), EncodeError> {
    let parts: Vec<&str> = data_url.split(',').collect();
    if parts.len() != 2 {
        return Err(EncodeError::MalformedEncoding(
            "invalid data URL layout".to_string(),
        ));
    }

    let media_type = parts[0]
        .split_once(':')
        .and_then(|(_, rest)| rest.split_once(';'))
        .map(|(media_type, _)| media_type)
        .filter(|media_type| !media_type.is_empty())
        .ok_or_else(|| {
            EncodeError::MalformedEncoding("could not determine media type".to_string())
        })?;

    Ok((media_type, parts[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_fn(4, 3, |x, y| image::Rgb([x as u8 * 60, y as u8 * 80, 10]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_encode_round_trip() {
        let bytes = png_bytes();
        let source = MemoryResource::new("plate.png", "image/png", bytes.clone());

        let encoded = encode(&source).await.unwrap();
        assert_eq!(encoded.media_type(), "image/png");
        assert_eq!(encoded.decode_bytes().unwrap(), bytes);
        assert_eq!(encoded.decode_preview().unwrap().dimensions(), (4, 3));
    }

    #[tokio::test]
    async fn test_rejects_non_image_type() {
        let source = MemoryResource::new("notes.txt", "text/plain", b"hello".to_vec());
        let err = encode(&source).await.unwrap_err();
        assert_eq!(err, EncodeError::UnsupportedType("text/plain".into()));
    }

    #[tokio::test]
    async fn test_unlisted_image_type_still_encodes() {
        let source = MemoryResource::new("scan.bmp", "image/bmp", vec![1, 2, 3]);
        let encoded = encode(&source).await.unwrap();
        assert_eq!(encoded.media_type(), "image/bmp");
        assert_eq!(encoded.decode_bytes().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_file_resource_read_error() {
        let temp_dir = TempDir::new().unwrap();
        let source = FileResource::new(temp_dir.path().join("missing.jpg"));
        assert_eq!(source.declared_type(), "image/jpeg");

        let err = encode(&source).await.unwrap_err();
        assert!(matches!(err, EncodeError::ReadError(_)));
    }

    #[tokio::test]
    async fn test_file_resource_encodes_file_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lunch.PNG");
        let bytes = png_bytes();
        std::fs::write(&path, &bytes).unwrap();

        let encoded = encode(&FileResource::new(&path)).await.unwrap();
        assert_eq!(encoded.media_type(), "image/png");
        assert_eq!(encoded.decode_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_media_type_for_path() {
        assert_eq!(media_type_for_path(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(media_type_for_path(Path::new("a.HEIC")), "image/heic");
        assert_eq!(media_type_for_path(Path::new("a.pdf")), "application/octet-stream");
        assert_eq!(media_type_for_path(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_split_data_url() {
        assert_eq!(
            split_data_url("data:image/webp;base64,AAAA").unwrap(),
            ("image/webp", "AAAA")
        );
        assert!(matches!(
            split_data_url("data:image/png;base64,AA,BB"),
            Err(EncodeError::MalformedEncoding(_))
        ));
        assert!(matches!(
            split_data_url("image/png,AAAA"),
            Err(EncodeError::MalformedEncoding(_))
        ));
    }
}
