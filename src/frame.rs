use crate::{classifier::ClassifierError, emotion::EmotionScores};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inbound frame: `{"data":{"image":"<prefix>,<base64>"}}`. Both levels are
/// optional at parse time so a present-but-incomplete message is reported as
/// missing image data rather than as unparseable JSON.
#[derive(Debug, Deserialize)]
pub struct FrameMessage {
    data: Option<FrameData>,
}

#[derive(Debug, Deserialize)]
pub struct FrameData {
    image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PredictionMessage {
    pub predictions: EmotionScores,
    pub emotion: &'static str,
    pub percentages: EmotionScores,
}

#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: &FrameError) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

/// Everything that can go wrong with one frame. All variants are
/// frame-scoped: they become an error reply, never a process failure.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Missing image data in the payload")]
    MissingImageData,
    #[error("Failed to decode the image: {0}")]
    ImageDecodeFailure(String),
    #[error("No face detected in the frame")]
    NoFaceDetected,
    #[error("Emotion scores sum to zero, percentages are undefined")]
    DegenerateScores,
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Steps 1-4 of the per-frame pipeline: parse the message, strip the
/// data-URI prefix, base64-decode and decode the image container.
pub fn decode_frame(text: &str) -> Result<DynamicImage, FrameError> {
    let message: FrameMessage = serde_json::from_str(text)
        .map_err(|e| FrameError::MalformedPayload(format!("invalid JSON: {}", e)))?;

    let image = message
        .data
        .and_then(|data| data.image)
        .ok_or(FrameError::MissingImageData)?;

    // A data URI without a comma carries no payload at all.
    let payload = image
        .split_once(',')
        .map(|(_, payload)| payload)
        .ok_or_else(|| {
            FrameError::MalformedPayload("image field has no data-URI payload".to_string())
        })?;

    let bytes = BASE64
        .decode(payload)
        .map_err(|e| FrameError::MalformedPayload(format!("invalid base64 payload: {}", e)))?;

    let image = image::load_from_memory(&bytes)
        .map_err(|e| FrameError::ImageDecodeFailure(e.to_string()))?;

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageBuffer, Rgb};
    use std::io::Cursor;

    fn png_data_uri(width: u32, height: u32) -> String {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([255, 0, 0]));
        let mut image_data: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&mut image_data);
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();

        format!("data:image/png;base64,{}", BASE64.encode(&image_data))
    }

    #[test]
    fn test_decode_frame_accepts_valid_data_uri() {
        let text = serde_json::json!({"data": {"image": png_data_uri(32, 24)}}).to_string();

        let image = decode_frame(&text).unwrap();

        assert_eq!(image.dimensions(), (32, 24));
    }

    #[test]
    fn test_decode_frame_rejects_unparseable_message() {
        let err = decode_frame("not json at all").unwrap_err();

        assert!(matches!(err, FrameError::MalformedPayload(_)));
        assert!(err.to_string().starts_with("Malformed payload: invalid JSON"));
        assert!(!err.to_string().contains("Missing image data"));
    }

    #[test]
    fn test_decode_frame_rejects_missing_data_field() {
        let err = decode_frame(r#"{"foo": "bar"}"#).unwrap_err();

        assert!(matches!(err, FrameError::MissingImageData));
        assert_eq!(err.to_string(), "Missing image data in the payload");
    }

    #[test]
    fn test_decode_frame_rejects_missing_image_field() {
        let err = decode_frame(r#"{"data": {}}"#).unwrap_err();
        assert!(matches!(err, FrameError::MissingImageData));
    }

    #[test]
    fn test_decode_frame_rejects_missing_comma() {
        let text = r#"{"data": {"image": "AAAA"}}"#;
        let err = decode_frame(text).unwrap_err();
        assert!(matches!(err, FrameError::MalformedPayload(_)));
    }

    #[test]
    fn test_decode_frame_rejects_invalid_base64() {
        let text = r#"{"data": {"image": "data:image/jpeg;base64,@@@@"}}"#;
        let err = decode_frame(text).unwrap_err();
        assert!(matches!(err, FrameError::MalformedPayload(_)));
    }

    #[test]
    fn test_decode_frame_rejects_non_image_bytes() {
        // "AAAA" is valid base64 but no image container starts this way.
        let text = r#"{"data": {"image": "data:image/jpeg;base64,AAAA"}}"#;
        let err = decode_frame(text).unwrap_err();
        assert!(matches!(err, FrameError::ImageDecodeFailure(_)));
    }
}
