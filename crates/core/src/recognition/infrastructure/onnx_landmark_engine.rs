//! Two-stage face landmark engine on ONNX Runtime via `ort`.
//!
//! Stage one is a BlazeFace-style detector that proposes face boxes; the
//! single best box (this engine is fixed to one subject) is cropped and
//! fed to a landmark regression model. When transform output is enabled,
//! a rigid head transform is derived from the regressed keypoints.

use std::path::Path;

use crate::provisioning::domain::asset_provisioner::AssetBundle;
use crate::recognition::domain::landmark_engine::{EngineOptions, LandmarkEngine, RunningMode};
use crate::recognition::domain::landmarks::{
    FaceLandmarks, Keypoint, LandmarkResult, TransformMatrix,
};
use crate::shared::frame::Frame;

/// Detector model input resolution.
const DETECTOR_INPUT_SIZE: u32 = 128;

/// Landmark model input resolution.
const LANDMARK_INPUT_SIZE: u32 = 192;

/// Minimum detector confidence for a box to count as a face.
const DETECTOR_CONFIDENCE: f32 = 0.5;

/// Number of detector anchors (short-range model).
const NUM_ANCHORS: usize = 896;

/// Margin added around the detected box before cropping, as a fraction of
/// the box size. The landmark model expects some forehead/chin context.
const CROP_MARGIN: f64 = 0.25;

pub struct OnnxLandmarkEngine {
    detector: ort::session::Session,
    landmarker: ort::session::Session,
    options: EngineOptions,
    anchors: Vec<[f32; 2]>,
}

impl OnnxLandmarkEngine {
    /// Build the engine from provisioned assets. Configuration is fixed
    /// for the engine's lifetime; only `RunningMode::Image` is supported.
    pub fn from_assets(
        assets: &AssetBundle,
        options: EngineOptions,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        if options.mode != RunningMode::Image {
            return Err("OnnxLandmarkEngine only supports per-call image mode".into());
        }
        let detector = load_session(&assets.detector_model)?;
        let landmarker = load_session(&assets.landmark_model)?;
        Ok(Self {
            detector,
            landmarker,
            options,
            anchors: generate_anchors(),
        })
    }

    /// Run the detector and return the best face box in frame coordinates,
    /// or `None` if nothing clears the confidence threshold.
    fn detect_face_box(&mut self, frame: &Frame) -> Result<Option<FaceBox>, Box<dyn std::error::Error>> {
        let input = preprocess_region(frame, full_frame_box(frame), DETECTOR_INPUT_SIZE);
        let input_value = ort::value::Tensor::from_array(input)?;
        let outputs = self.detector.run(ort::inputs![input_value])?;

        // Detector outputs two tensors:
        // - regressors: [1, 896, 16] (box deltas + keypoints)
        // - classificators: [1, 896, 1] (confidence logits)
        if outputs.len() < 2 {
            return Err(format!("detector expected 2 outputs, got {}", outputs.len()).into());
        }
        let regressors = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let reg_data = regressors.as_slice().ok_or("cannot get regressor slice")?;
        let score_data = scores.as_slice().ok_or("cannot get score slice")?;

        // Single-subject: keep only the top-scoring anchor, no NMS pass.
        let mut best: Option<(usize, f32)> = None;
        for (i, &logit) in score_data.iter().enumerate().take(self.anchors.len().min(NUM_ANCHORS)) {
            let score = sigmoid(logit);
            if score < DETECTOR_CONFIDENCE {
                continue;
            }
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }
        let Some((i, _)) = best else {
            return Ok(None);
        };

        let reg_offset = i * 16;
        if reg_offset + 4 > reg_data.len() {
            return Err("detector regressor tensor too short".into());
        }

        // Decode box center + size relative to the anchor, then scale to
        // frame pixels.
        let anchor = &self.anchors[i];
        let fw = frame.width() as f64;
        let fh = frame.height() as f64;
        let cx = (anchor[0] + reg_data[reg_offset] / DETECTOR_INPUT_SIZE as f32) as f64 * fw;
        let cy = (anchor[1] + reg_data[reg_offset + 1] / DETECTOR_INPUT_SIZE as f32) as f64 * fh;
        let w = (reg_data[reg_offset + 2] / DETECTOR_INPUT_SIZE as f32) as f64 * fw;
        let h = (reg_data[reg_offset + 3] / DETECTOR_INPUT_SIZE as f32) as f64 * fh;

        Ok(Some(expand_and_clamp(
            cx,
            cy,
            w,
            h,
            CROP_MARGIN,
            frame.width(),
            frame.height(),
        )))
    }

    /// Regress keypoints inside `face_box` and map them back to frame
    /// coordinates.
    fn regress_landmarks(
        &mut self,
        frame: &Frame,
        face_box: FaceBox,
    ) -> Result<FaceLandmarks, Box<dyn std::error::Error>> {
        let input = preprocess_region(frame, face_box, LANDMARK_INPUT_SIZE);
        let input_value = ort::value::Tensor::from_array(input)?;
        let outputs = self.landmarker.run(ort::inputs![input_value])?;

        let coords = outputs[0].try_extract_array::<f32>()?;
        let coord_data = coords.as_slice().ok_or("cannot get landmark slice")?;
        // Five keypoints, (x, y) each, normalized to the crop
        if coord_data.len() < 10 {
            return Err(format!(
                "landmark model produced {} values, expected 10",
                coord_data.len()
            )
            .into());
        }

        let mut points = [(0.0f64, 0.0f64); 5];
        for (k, point) in points.iter_mut().enumerate() {
            let nx = coord_data[k * 2] as f64;
            let ny = coord_data[k * 2 + 1] as f64;
            *point = (
                face_box.x + nx * face_box.size,
                face_box.y + ny * face_box.size,
            );
        }
        Ok(FaceLandmarks::new(points))
    }
}

impl LandmarkEngine for OnnxLandmarkEngine {
    fn detect(
        &mut self,
        frame: &Frame,
    ) -> Result<Option<LandmarkResult>, Box<dyn std::error::Error>> {
        debug_assert_eq!(self.options.max_faces, 1);

        let Some(face_box) = self.detect_face_box(frame)? else {
            return Ok(None);
        };
        let landmarks = self.regress_landmarks(frame, face_box)?;

        let transform = if self.options.output_transform {
            Some(derive_transform(&landmarks, face_box))
        } else {
            None
        };

        Ok(Some(LandmarkResult {
            landmarks,
            transform,
        }))
    }
}

fn load_session(path: &Path) -> Result<ort::session::Session, Box<dyn std::error::Error>> {
    Ok(ort::session::Session::builder()?
        .with_execution_providers(preferred_execution_providers())?
        .commit_from_file(path)?)
}

/// Preferred ONNX execution providers for the current platform, with CPU
/// as the implicit fallback.
fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A square crop region in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
struct FaceBox {
    x: f64,
    y: f64,
    size: f64,
}

fn full_frame_box(frame: &Frame) -> FaceBox {
    FaceBox {
        x: 0.0,
        y: 0.0,
        size: frame.width().min(frame.height()) as f64,
    }
}

/// Grow the detected box by `margin`, squarify, and clamp into the frame.
fn expand_and_clamp(cx: f64, cy: f64, w: f64, h: f64, margin: f64, fw: u32, fh: u32) -> FaceBox {
    let size = (w.max(h) * (1.0 + 2.0 * margin)).max(1.0);
    let size = size.min(fw as f64).min(fh as f64);
    let x = (cx - size / 2.0).clamp(0.0, fw as f64 - size);
    let y = (cy - size / 2.0).clamp(0.0, fh as f64 - size);
    FaceBox { x, y, size }
}

/// Nearest-neighbor resample of a square frame region into a normalized
/// `[0,1]` NCHW float tensor.
fn preprocess_region(frame: &Frame, region: FaceBox, size: u32) -> ndarray::Array4<f32> {
    let src = frame.as_ndarray();
    let src_w = frame.width() as f64;
    let src_h = frame.height() as f64;
    let s = size as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, s, s));

    for y in 0..s {
        let sy = (region.y + (y as f64 + 0.5) * region.size / s as f64)
            .min(src_h - 1.0)
            .max(0.0) as usize;
        for x in 0..s {
            let sx = (region.x + (x as f64 + 0.5) * region.size / s as f64)
                .min(src_w - 1.0)
                .max(0.0) as usize;
            for c in 0..3 {
                tensor[[0, c, y, x]] = src[[sy, sx, c]] as f32 / 255.0;
            }
        }
    }

    tensor
}

// ---------------------------------------------------------------------------
// Anchors (short-range detector)
// ---------------------------------------------------------------------------

/// Anchor centers for the short-range detector: two feature maps (16x16
/// and 8x8) with 2 and 6 anchors per cell.
fn generate_anchors() -> Vec<[f32; 2]> {
    let strides = [(8u32, 2usize), (16u32, 6usize)];
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);

    for &(stride, per_cell) in &strides {
        let grid = (DETECTOR_INPUT_SIZE / stride) as usize;
        for row in 0..grid {
            for col in 0..grid {
                let cx = (col as f32 + 0.5) / grid as f32;
                let cy = (row as f32 + 0.5) / grid as f32;
                for _ in 0..per_cell {
                    anchors.push([cx, cy]);
                }
            }
        }
    }

    anchors
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

// ---------------------------------------------------------------------------
// Transform derivation
// ---------------------------------------------------------------------------

/// Build a rigid head transform from the regressed keypoints: yaw from the
/// nose offset (signed), roll from the eye line, translation at the
/// weighted landmark centroid with the crop size as a depth proxy.
fn derive_transform(landmarks: &FaceLandmarks, face_box: FaceBox) -> TransformMatrix {
    let yaw = signed_yaw(landmarks);
    let roll = landmarks.roll();
    let (tx, ty) = landmarks.center().unwrap_or((
        face_box.x + face_box.size / 2.0,
        face_box.y + face_box.size / 2.0,
    ));
    let tz = face_box.size;

    // Rz(roll) * Ry(yaw), then translation in the last column
    let (sy, cy) = yaw.sin_cos();
    let (sr, cr) = roll.sin_cos();
    TransformMatrix::from_rows([
        [cr * cy, -sr, cr * sy, tx],
        [sr * cy, cr, sr * sy, ty],
        [-sy, 0.0, cy, tz],
        [0.0, 0.0, 0.0, 1.0],
    ])
}

/// Profile ratio mapped to a signed angle: negative when the nose points
/// left of the eye midpoint, positive to the right.
fn signed_yaw(landmarks: &FaceLandmarks) -> f64 {
    let ratio = landmarks.profile_ratio();
    let nose = landmarks.point(Keypoint::Nose);
    let left = landmarks.point(Keypoint::LeftEye);
    let right = landmarks.point(Keypoint::RightEye);
    if left.0 <= 0.0 || right.0 <= 0.0 {
        return 0.0;
    }
    let eye_mid = (left.0 + right.0) / 2.0;
    let angle = ratio * std::f64::consts::FRAC_PI_2;
    if nose.0 < eye_mid {
        -angle
    } else {
        angle
    }
}
