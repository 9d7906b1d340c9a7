use crate::emotion::EmotionScores;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("session pool unavailable: {0}")]
    SessionPool(String),
}

/// Axis-aligned face box in original image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub face_box: FaceBox,
    pub emotions: EmotionScores,
}

/// The pretrained facial-emotion model, treated as a black box. Invocations
/// are blocking and CPU-bound; callers on the async runtime must dispatch
/// them through `tokio::task::spawn_blocking`.
///
/// Implementations are shared process-wide across all connections, so they
/// must be safe for concurrent invocation.
pub trait EmotionClassifier: Send + Sync + 'static {
    /// Returns the emotion score map for every detected face, in detection
    /// order. An empty vector means no face was found.
    fn detect_emotions(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>, ClassifierError>;
}
