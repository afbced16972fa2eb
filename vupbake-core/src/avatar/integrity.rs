//! Structural validation of downloaded image bytes.
//!
//! An HTTP 200 is not proof of a usable image: the image host answers blocked
//! requests with tiny error bodies, and dropped connections leave truncated
//! files that still start with a valid header. The check here looks at size,
//! the container signature, and for JPEG/PNG the end-of-image marker.

use super::transport::FetchedImage;
use super::AvatarError;
use serde::Serialize;
use thiserror::Error;

const JPEG_SOI: &[u8] = &[0xFF, 0xD8, 0xFF];
const JPEG_EOI: &[u8] = &[0xFF, 0xD9];
const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
/// Zero-length IEND chunk: type + CRC.
const PNG_IEND: &[u8] = &[b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82];

/// Recognized image containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl ImageKind {
    /// Identify a buffer by its leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(JPEG_SOI) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(PNG_SIGNATURE) {
            Some(Self::Png)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else {
            None
        }
    }

    fn has_trailer(self, bytes: &[u8]) -> bool {
        match self {
            // Some encoders pad after EOI
            Self::Jpeg => {
                let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                bytes[..end].ends_with(JPEG_EOI)
            }
            Self::Png => bytes.ends_with(PNG_IEND),
            Self::Webp | Self::Gif => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("buffer too small: {len} bytes (minimum {min})")]
    TooSmall { len: usize, min: usize },

    #[error("unrecognized image signature")]
    UnknownSignature,

    #[error("{kind:?} is missing its end-of-image marker (truncated download)")]
    MissingTrailer { kind: ImageKind },
}

/// Validate an image buffer.
pub fn check_integrity(bytes: &[u8], min_bytes: usize) -> Result<ImageKind, IntegrityError> {
    if bytes.len() < min_bytes {
        return Err(IntegrityError::TooSmall {
            len: bytes.len(),
            min: min_bytes,
        });
    }
    let kind = ImageKind::sniff(bytes).ok_or(IntegrityError::UnknownSignature)?;
    if !kind.has_trailer(bytes) {
        return Err(IntegrityError::MissingTrailer { kind });
    }
    Ok(kind)
}

/// Accept a fetched buffer only if its declared length (when sent) matches
/// what arrived and the bytes pass [`check_integrity`].
pub fn verify_download(fetched: &FetchedImage, min_bytes: usize) -> Result<ImageKind, AvatarError> {
    if let Some(declared) = fetched.declared_len {
        if declared != fetched.bytes.len() as u64 {
            return Err(AvatarError::LengthMismatch {
                declared,
                received: fetched.bytes.len(),
            });
        }
    }
    Ok(check_integrity(&fetched.bytes, min_bytes)?)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn accepts_each_container() {
        assert_eq!(check_integrity(&jpeg(300), 200), Ok(ImageKind::Jpeg));
        assert_eq!(check_integrity(&png(300), 200), Ok(ImageKind::Png));
        assert_eq!(check_integrity(&webp(300), 200), Ok(ImageKind::Webp));
        assert_eq!(check_integrity(&gif(300), 200), Ok(ImageKind::Gif));
    }

    #[test]
    fn rejects_short_buffer_even_with_valid_signature() {
        let err = check_integrity(&jpeg(150), 200).unwrap_err();
        assert_eq!(err, IntegrityError::TooSmall { len: 150, min: 200 });
    }

    #[test]
    fn rejects_html_error_page() {
        let mut body = b"<html><body>403 Forbidden</body></html>".to_vec();
        body.resize(400, b' ');
        assert_eq!(check_integrity(&body, 200), Err(IntegrityError::UnknownSignature));
    }

    #[test]
    fn rejects_truncated_jpeg() {
        let mut bytes = jpeg(400);
        bytes.truncate(300);
        assert_eq!(
            check_integrity(&bytes, 200),
            Err(IntegrityError::MissingTrailer {
                kind: ImageKind::Jpeg
            })
        );
    }

    #[test]
    fn rejects_truncated_png() {
        let mut bytes = png(400);
        bytes.pop();
        assert!(matches!(
            check_integrity(&bytes, 200),
            Err(IntegrityError::MissingTrailer { .. })
        ));
    }

    #[test]
    fn tolerates_zero_padding_after_jpeg_eoi() {
        let mut bytes = jpeg(300);
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(check_integrity(&bytes, 200), Ok(ImageKind::Jpeg));
    }

    #[test]
    fn placeholder_fails_default_threshold() {
        assert!(matches!(
            check_integrity(crate::avatar::PLACEHOLDER_PNG, 200),
            Err(IntegrityError::TooSmall { len: 70, .. })
        ));
        // Structurally it is a complete PNG
        assert_eq!(check_integrity(crate::avatar::PLACEHOLDER_PNG, 0), Ok(ImageKind::Png));
    }

    #[test]
    fn declared_length_must_match() {
        let fetched = FetchedImage {
            bytes: jpeg(300),
            declared_len: Some(512),
        };
        assert!(matches!(
            verify_download(&fetched, 200),
            Err(AvatarError::LengthMismatch {
                declared: 512,
                received: 300
            })
        ));

        let fetched = FetchedImage {
            bytes: jpeg(300),
            declared_len: None,
        };
        assert_eq!(verify_download(&fetched, 200).unwrap(), ImageKind::Jpeg);
    }
}
