use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::ClassifyError;

/// An image encoded as `data:<mimetype>;base64,<data>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRequest {
    image_uri: String,
    mime_len: usize,
}

impl ClassificationRequest {
    /// Validates an uploaded file and encodes it as a data URI.
    ///
    /// The declared MIME type is used when it names an image; otherwise the
    /// type is sniffed from the bytes.
    pub fn from_upload(
        bytes: &[u8],
        declared_mime: Option<&str>,
        max_bytes: usize,
    ) -> Result<Self, ClassifyError> {
        if bytes.is_empty() {
            return Err(ClassifyError::InvalidInput("Image file cannot be empty.".into()));
        }
        if bytes.len() > max_bytes {
            return Err(ClassifyError::InvalidInput(format!(
                "Image file is too large ({} bytes, limit {} bytes).",
                bytes.len(),
                max_bytes
            )));
        }

        let mime = resolve_mime(bytes, declared_mime).ok_or_else(|| {
            ClassifyError::InvalidInput("Unsupported or missing image type.".into())
        })?;

        let image_uri = format!("data:{};base64,{}", mime, STANDARD.encode(bytes));
        Ok(Self {
            image_uri,
            mime_len: mime.len(),
        })
    }

    /// Parses an existing data URI.
    #[cfg(test)]
    pub(crate) fn parse(image_uri: &str) -> Result<Self, ClassifyError> {
        let rest = image_uri
            .strip_prefix("data:")
            .ok_or_else(|| ClassifyError::InvalidInput("Image URI must start with 'data:'.".into()))?;
        let (mime, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| ClassifyError::InvalidInput("Image URI must be base64 encoded.".into()))?;

        if mime.is_empty() || !mime.contains('/') {
            return Err(ClassifyError::InvalidInput("Image URI has no MIME type.".into()));
        }
        if payload.is_empty() {
            return Err(ClassifyError::InvalidInput("Image file cannot be empty.".into()));
        }

        Ok(Self {
            image_uri: image_uri.to_string(),
            mime_len: mime.len(),
        })
    }

    pub fn image_uri(&self) -> &str {
        &self.image_uri
    }

    pub fn mime_type(&self) -> &str {
        &self.image_uri["data:".len().."data:".len() + self.mime_len]
    }

    /// The base64 payload without the prefix.
    pub fn payload(&self) -> &str {
        &self.image_uri["data:".len() + self.mime_len + ";base64,".len()..]
    }
}

fn resolve_mime(bytes: &[u8], declared: Option<&str>) -> Option<String> {
    let declared = declared
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| m.starts_with("image/") && m.len() > "image/".len());

    declared.or_else(|| {
        image::guess_format(bytes)
            .ok()
            .map(|format| format.to_mime_type().to_string())
    })
}
