use crate::recognition::domain::landmarks::LandmarkResult;
use crate::shared::frame::Frame;

/// Per-call image mode vs. continuous video mode. The detection loop
/// always uses `Image`: it owns the cadence itself and wants one
/// synchronous result per call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunningMode {
    Image,
    Video,
}

/// Immutable engine configuration, fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOptions {
    pub max_faces: usize,
    pub output_transform: bool,
    pub mode: RunningMode,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_faces: 1,
            output_transform: true,
            mode: RunningMode::Image,
        }
    }
}

/// Domain interface for the model-backed landmark recognizer.
///
/// `detect` is synchronous from the caller's perspective; implementations
/// may be stateful, hence `&mut self`. `Ok(None)` means no face was found
/// in the frame.
pub trait LandmarkEngine: Send {
    fn detect(&mut self, frame: &Frame)
        -> Result<Option<LandmarkResult>, Box<dyn std::error::Error>>;
}
