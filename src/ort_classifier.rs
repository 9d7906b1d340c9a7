use crate::{
    classifier::{ClassifierError, DetectedFace, EmotionClassifier, FaceBox},
    config::ModelConfig,
    emotion::{EmotionScores, EMOTION_COUNT},
};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{s, Array, Axis, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

const DETECTOR_INPUT_SIZE: u32 = 640;
const EMOTION_INPUT_SIZE: u32 = 64;
const NMS_IOU_THRESHOLD: f32 = 0.7;

fn intersection(box1: &FaceBox, box2: &FaceBox) -> f32 {
    let width = box1.x2.min(box2.x2) - box1.x1.max(box2.x1);
    let height = box1.y2.min(box2.y2) - box1.y1.max(box2.y1);
    if width <= 0.0 || height <= 0.0 {
        return 0.0;
    }
    width * height
}

fn union(box1: &FaceBox, box2: &FaceBox) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

/// Greedy IoU suppression, highest confidence first.
fn suppress_overlapping(mut boxes: Vec<FaceBox>) -> Vec<FaceBox> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while !boxes.is_empty() {
        result.push(boxes[0]);
        boxes = boxes
            .iter()
            .filter(|box1| intersection(&boxes[0], box1) / union(&boxes[0], box1) < NMS_IOU_THRESHOLD)
            .cloned()
            .collect();
    }

    result
}

fn preprocess_detector_input(image: &DynamicImage) -> (Array<f32, Ix4>, u32, u32) {
    let (img_width, img_height) = image.dimensions();
    let img = image.resize_exact(DETECTOR_INPUT_SIZE, DETECTOR_INPUT_SIZE, FilterType::CatmullRom);

    let size = DETECTOR_INPUT_SIZE as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for pixel in img.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    (input, img_width, img_height)
}

/// Clamps the face box to the image, crops it and converts the crop to the
/// grayscale tensor the emotion net expects. `None` when the clamped box is
/// empty.
fn preprocess_face_crop(image: &DynamicImage, face_box: &FaceBox) -> Option<Array<f32, Ix4>> {
    let (img_width, img_height) = image.dimensions();
    let x1 = face_box.x1.max(0.0) as u32;
    let y1 = face_box.y1.max(0.0) as u32;
    let x2 = (face_box.x2.min(img_width as f32) as u32).min(img_width);
    let y2 = (face_box.y2.min(img_height as f32) as u32).min(img_height);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    let crop = image
        .crop_imm(x1, y1, x2 - x1, y2 - y1)
        .resize_exact(EMOTION_INPUT_SIZE, EMOTION_INPUT_SIZE, FilterType::CatmullRom)
        .into_luma8();

    let size = EMOTION_INPUT_SIZE as usize;
    let mut input = Array::zeros((1, 1, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        input[[0, 0, y as usize, x as usize]] = (pixel.0[0] as f32) / 255.;
    }

    Some(input)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.iter().map(|v| v / total).collect()
}

/// Two-stage ONNX Runtime classifier: a single-class face detector followed
/// by a seven-class emotion net run on each face crop. Sessions are pooled
/// and mutex-guarded so the classifier can be shared across connections.
#[derive(Clone)]
pub struct OrtClassifier {
    detector_sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    emotion_sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    min_face_confidence: f32,
}

impl OrtClassifier {
    pub fn new(model_config: &ModelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        ort::init().commit();

        let num_instances = model_config.num_instances;
        let detector_sessions = build_session_pool(num_instances, model_config.get_detector_path())?;
        let emotion_sessions = build_session_pool(num_instances, model_config.get_emotion_path())?;

        tracing::info!("Created {} ONNX session pairs", num_instances);

        Ok(Self {
            detector_sessions: Arc::new(detector_sessions),
            emotion_sessions: Arc::new(emotion_sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            min_face_confidence: model_config.min_face_confidence,
        })
    }

    fn run_session(
        &self,
        sessions: &[Arc<Mutex<Session>>],
        index: usize,
        input: &Array<f32, Ix4>,
    ) -> Result<ndarray::ArrayD<f32>, ClassifierError> {
        let session_arc = &sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| ClassifierError::SessionPool(format!("session mutex poisoned: {}", e)))?;

        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ClassifierError::Inference(format!("failed to build tensor: {}", e)))?;

        let input_tensor = ort::inputs![tensor_ref];

        let outputs = session
            .run(input_tensor)
            .map_err(|e| ClassifierError::Inference(format!("inference failed: {}", e)))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("failed to extract tensor: {}", e)))?;

        let ix = shape.to_ixdyn();
        let array = ndarray::ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| ClassifierError::Inference(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }

    fn detect_faces(
        &self,
        image: &DynamicImage,
        session_index: usize,
    ) -> Result<Vec<FaceBox>, ClassifierError> {
        let (input, img_width, img_height) = preprocess_detector_input(image);
        let outputs = self.run_session(&self.detector_sessions, session_index, &input)?;

        let mut boxes = Vec::new();
        let output = outputs.slice(s![.., .., 0]);
        let scale = DETECTOR_INPUT_SIZE as f32;

        for row in output.axis_iter(Axis(0)) {
            let row: Vec<_> = row.iter().copied().collect();
            if row.len() < 5 {
                return Err(ClassifierError::Inference(format!(
                    "unexpected detector output row of length {}",
                    row.len()
                )));
            }

            let confidence = row[4];
            if confidence < self.min_face_confidence {
                continue;
            }

            let xc = row[0] / scale * (img_width as f32);
            let yc = row[1] / scale * (img_height as f32);
            let w = row[2] / scale * (img_width as f32);
            let h = row[3] / scale * (img_height as f32);

            boxes.push(FaceBox {
                x1: xc - w / 2.,
                y1: yc - h / 2.,
                x2: xc + w / 2.,
                y2: yc + h / 2.,
                confidence,
            });
        }

        Ok(suppress_overlapping(boxes))
    }

    fn score_face(
        &self,
        image: &DynamicImage,
        face_box: &FaceBox,
        session_index: usize,
    ) -> Result<Option<EmotionScores>, ClassifierError> {
        let input = match preprocess_face_crop(image, face_box) {
            Some(input) => input,
            None => return Ok(None),
        };

        let outputs = self.run_session(&self.emotion_sessions, session_index, &input)?;
        let logits: Vec<f32> = outputs.iter().copied().collect();
        if logits.len() != EMOTION_COUNT {
            return Err(ClassifierError::Inference(format!(
                "emotion net returned {} scores, expected {}",
                logits.len(),
                EMOTION_COUNT
            )));
        }

        let probabilities = softmax(&logits);
        let mut values = [0.0; EMOTION_COUNT];
        values.copy_from_slice(&probabilities);

        Ok(Some(EmotionScores::new(values)))
    }
}

fn build_session_pool(
    num_instances: usize,
    model_path: std::path::PathBuf,
) -> Result<Vec<Arc<Mutex<Session>>>, ort::Error> {
    (0..num_instances)
        .map(|_| {
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .commit_from_file(&model_path)?;
            Ok(Arc::new(Mutex::new(session)))
        })
        .collect()
}

impl EmotionClassifier for OrtClassifier {
    fn detect_emotions(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>, ClassifierError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.detector_sessions.len();
        tracing::debug!("Handling frame with session pair {}", index);

        let boxes = self.detect_faces(image, index)?;

        let mut faces = Vec::with_capacity(boxes.len());
        for face_box in boxes {
            if let Some(emotions) = self.score_face(image, &face_box, index)? {
                faces.push(DetectedFace { face_box, emotions });
            }
        }

        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn solid_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(
            width,
            height,
            Rgb([128, 64, 32]),
        ))
    }

    #[test]
    fn test_preprocess_detector_input() {
        let image = solid_image(100, 80);

        let (input, img_width, img_height) = preprocess_detector_input(&image);

        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert_eq!(img_width, 100);
        assert_eq!(img_height, 80);
        assert!((input[[0, 0, 0, 0]] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_face_crop_shape() {
        let image = solid_image(100, 100);
        let face_box = FaceBox {
            x1: 10.0,
            y1: 10.0,
            x2: 60.0,
            y2: 70.0,
            confidence: 0.9,
        };

        let input = preprocess_face_crop(&image, &face_box).unwrap();

        assert_eq!(input.shape(), &[1, 1, 64, 64]);
    }

    #[test]
    fn test_preprocess_face_crop_clamps_to_image() {
        let image = solid_image(50, 50);
        let face_box = FaceBox {
            x1: -20.0,
            y1: -20.0,
            x2: 100.0,
            y2: 100.0,
            confidence: 0.9,
        };

        assert!(preprocess_face_crop(&image, &face_box).is_some());
    }

    #[test]
    fn test_preprocess_face_crop_rejects_empty_box() {
        let image = solid_image(50, 50);
        let face_box = FaceBox {
            x1: 60.0,
            y1: 60.0,
            x2: 80.0,
            y2: 80.0,
            confidence: 0.9,
        };

        assert!(preprocess_face_crop(&image, &face_box).is_none());
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probabilities = softmax(&[1.0, 2.0, 3.0]);

        let sum: f32 = probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probabilities[2] > probabilities[1]);
        assert!(probabilities[1] > probabilities[0]);
    }

    #[test]
    fn test_suppress_overlapping_keeps_highest_confidence() {
        let boxes = vec![
            FaceBox {
                x1: 0.0,
                y1: 0.0,
                x2: 100.0,
                y2: 100.0,
                confidence: 0.8,
            },
            FaceBox {
                x1: 5.0,
                y1: 5.0,
                x2: 105.0,
                y2: 105.0,
                confidence: 0.95,
            },
            FaceBox {
                x1: 300.0,
                y1: 300.0,
                x2: 400.0,
                y2: 400.0,
                confidence: 0.6,
            },
        ];

        let kept = suppress_overlapping(boxes);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.95);
        assert_eq!(kept[1].confidence, 0.6);
    }
}
