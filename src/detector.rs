use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{DetectedFace, Frame};

/// Which pass the analyzer is asking for. Box passes favour speed; landmark
/// passes must report eye positions when they can.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    Boxes,
    Landmarks,
}

/// External face/eye-landmark detector. Treated as a black box.
pub trait LandmarkDetector: Send {
    fn name(&self) -> String;
    fn detect(&mut self, frame: &Frame, mode: DetectionMode) -> Result<Vec<DetectedFace>>;
}

impl<D: LandmarkDetector + ?Sized> LandmarkDetector for Box<D> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame, mode: DetectionMode) -> Result<Vec<DetectedFace>> {
        (**self).detect(frame, mode)
    }
}

// =========================================================================
// Replay detector: scripted results, one entry per frame sequence number
// =========================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedFrame {
    pub faces: Vec<DetectedFace>,
    pub fail_boxes: bool,
    pub fail_landmarks: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionScript {
    pub frames: Vec<ScriptedFrame>,
}

pub struct ReplayDetector {
    script: DetectionScript,
}

impl ReplayDetector {
    pub fn new(script: DetectionScript) -> Self {
        Self { script }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let script: DetectionScript = serde_json::from_str(&content)?;
        Ok(Self::new(script))
    }

    /// Entry for `sequence`, cycling through the script.
    fn entry(&self, sequence: u64) -> Option<&ScriptedFrame> {
        if self.script.frames.is_empty() {
            return None;
        }
        let idx = (sequence % self.script.frames.len() as u64) as usize;
        self.script.frames.get(idx)
    }
}

impl LandmarkDetector for ReplayDetector {
    fn name(&self) -> String {
        format!("Replay ({} scripted frames)", self.script.frames.len())
    }

    fn detect(&mut self, frame: &Frame, mode: DetectionMode) -> Result<Vec<DetectedFace>> {
        let Some(entry) = self.entry(frame.sequence) else {
            return Ok(Vec::new());
        };
        match mode {
            DetectionMode::Boxes if entry.fail_boxes => {
                Err(Error::Detector(format!("scripted failure at frame {}", frame.sequence)))
            }
            DetectionMode::Landmarks if entry.fail_landmarks => {
                Err(Error::Landmarks(format!("scripted failure at frame {}", frame.sequence)))
            }
            DetectionMode::Boxes => Ok(entry
                .faces
                .iter()
                .map(|f| DetectedFace::new(f.bounding_box))
                .collect()),
            DetectionMode::Landmarks => {
                debug!(sequence = frame.sequence, faces = entry.faces.len(), "replaying landmarks");
                Ok(entry.faces.clone())
            }
        }
    }
}

// =========================================================================
// Single pass: one inference per frame serves both passes
// =========================================================================

/// Wraps a detector whose box and landmark passes return the same faces.
/// The landmark pass runs the inner detector; the box pass of the same frame
/// reuses that result. Failures are not cached.
pub struct SinglePass<D> {
    inner: D,
    last: Option<((u64, u64), Vec<DetectedFace>)>,
}

impl<D: LandmarkDetector> SinglePass<D> {
    pub fn new(inner: D) -> Self {
        Self { inner, last: None }
    }
}

impl<D: LandmarkDetector> LandmarkDetector for SinglePass<D> {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn detect(&mut self, frame: &Frame, mode: DetectionMode) -> Result<Vec<DetectedFace>> {
        let key = (frame.generation, frame.sequence);
        let cached = self
            .last
            .as_ref()
            .filter(|(last_key, _)| *last_key == key)
            .map(|(_, faces)| faces.clone());
        let faces = match cached {
            Some(faces) => faces,
            None => {
                let faces = self.inner.detect(frame, DetectionMode::Landmarks)?;
                self.last = Some((key, faces.clone()));
                faces
            }
        };
        Ok(match mode {
            DetectionMode::Landmarks => faces,
            DetectionMode::Boxes => faces.into_iter().map(|f| DetectedFace::new(f.bounding_box)).collect(),
        })
    }
}

// =========================================================================
// ONNX face-box detector (UltraFace RFB-320)
// =========================================================================

#[cfg(feature = "onnx")]
pub use onnx::OnnxFaceDetector;

#[cfg(feature = "onnx")]
mod onnx {
    use image::imageops::FilterType;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Tensor;

    use super::{DetectionMode, LandmarkDetector};
    use crate::error::{Error, Result};
    use crate::types::{BoundingBox, DetectedFace, Frame};

    const INPUT_W: u32 = 320;
    const INPUT_H: u32 = 240;
    const SCORE_THRESHOLD: f32 = 0.7;

    /// Best-scoring face box per frame. Reports no eye landmarks, so gaze
    /// estimation falls back to "No Eye Detected". Both passes give the same
    /// answer; wrap it in [`SinglePass`](super::SinglePass) to run it once.
    pub struct OnnxFaceDetector {
        session: Session,
        anchors: Vec<(f32, f32, f32, f32)>, // cx, cy, w, h
    }

    impl OnnxFaceDetector {
        pub fn new(model_path: &str) -> Result<Self> {
            let load_err = |e: &dyn std::fmt::Display| Error::Detector(format!("failed to load {model_path}: {e}"));
            let session = Session::builder()
                .map_err(|e| load_err(&e))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| load_err(&e))?
                .with_intra_threads(4)
                .map_err(|e| load_err(&e))?
                .commit_from_file(model_path)
                .map_err(|e| load_err(&e))?;

            let anchors = generate_anchors(INPUT_W as usize, INPUT_H as usize);
            Ok(Self { session, anchors })
        }

        fn run(&mut self, frame: &Frame) -> std::result::Result<Option<BoundingBox>, ort::Error> {
            // Boxes are reported in the upright frame, like every detector.
            let upright = frame.upright_image();
            let resized = image::imageops::resize(&upright, INPUT_W, INPUT_H, FilterType::Triangle);

            // NCHW, normalized (pixel - 127) / 128
            let mut input_data = Vec::with_capacity((3 * INPUT_W * INPUT_H) as usize);
            for c in 0..3 {
                for y in 0..INPUT_H {
                    for x in 0..INPUT_W {
                        let p = resized.get_pixel(x, y)[c];
                        input_data.push((p as f32 - 127.0) / 128.0);
                    }
                }
            }

            let input_tensor = Tensor::from_array((
                vec![1usize, 3, INPUT_H as usize, INPUT_W as usize],
                input_data,
            ))?;
            let outputs = self.session.run(ort::inputs![input_tensor])?;

            let (_, scores) = outputs["scores"].try_extract_tensor::<f32>()?;
            let (_, boxes) = outputs["boxes"].try_extract_tensor::<f32>()?;

            let Some((x, y, w, h)) = best_box(&self.anchors, scores, boxes, SCORE_THRESHOLD) else {
                return Ok(None);
            };

            // Normalized anchor space back to upright pixels.
            let fw = upright.width() as f32;
            let fh = upright.height() as f32;
            Ok(Some(BoundingBox::new(
                (x * fw).round() as i32,
                (y * fh).round() as i32,
                ((x + w) * fw).round() as i32,
                ((y + h) * fh).round() as i32,
            )))
        }
    }

    impl LandmarkDetector for OnnxFaceDetector {
        fn name(&self) -> String {
            "UltraFace (ONNX)".to_string()
        }

        fn detect(&mut self, frame: &Frame, mode: DetectionMode) -> Result<Vec<DetectedFace>> {
            let found = self.run(frame).map_err(|e| match mode {
                DetectionMode::Boxes => Error::Detector(e.to_string()),
                DetectionMode::Landmarks => Error::Landmarks(e.to_string()),
            })?;
            Ok(found.into_iter().map(DetectedFace::new).collect())
        }
    }

    fn best_box(
        anchors: &[(f32, f32, f32, f32)],
        scores: &[f32],
        boxes: &[f32],
        threshold: f32,
    ) -> Option<(f32, f32, f32, f32)> {
        let center_variance = 0.1;
        let size_variance = 0.2;

        let mut best_score = 0.0;
        let mut best = None;
        for (i, &(ax, ay, aw, ah)) in anchors.iter().enumerate() {
            let Some(&score) = scores.get(i * 2 + 1) else { break };
            if score <= threshold || score <= best_score {
                continue;
            }
            let Some(enc) = boxes.get(i * 4..i * 4 + 4) else { break };

            let cx = enc[0] * center_variance * aw + ax;
            let cy = enc[1] * center_variance * ah + ay;
            let w = (enc[2] * size_variance).exp() * aw;
            let h = (enc[3] * size_variance).exp() * ah;

            best_score = score;
            best = Some((cx - w / 2.0, cy - h / 2.0, w, h));
        }
        best
    }

    fn generate_anchors(width: usize, height: usize) -> Vec<(f32, f32, f32, f32)> {
        let shrinkage_list = [8usize, 16, 32, 64];
        let min_boxes: [&[f32]; 4] = [
            &[10.0, 16.0, 24.0],
            &[32.0, 48.0],
            &[64.0, 96.0],
            &[128.0, 192.0, 256.0],
        ];
        let w = width as f32;
        let h = height as f32;

        let mut anchors = Vec::new();
        for (shrinkage, sizes) in shrinkage_list.iter().zip(min_boxes) {
            let s = *shrinkage as f32;
            let feature_h = (h / s).ceil() as usize;
            let feature_w = (w / s).ceil() as usize;
            for v in 0..feature_h {
                for u in 0..feature_w {
                    let cx = (u as f32 * s + s / 2.0) / w;
                    let cy = (v as f32 * s + s / 2.0) / h;
                    for &size in sizes {
                        anchors.push((cx, cy, size / w, size / h));
                    }
                }
            }
        }
        anchors
    }
}
