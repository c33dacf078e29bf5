use std::time::Duration;

/// Interval between detection ticks.
pub const DETECTION_INTERVAL: Duration = Duration::from_millis(60);

/// Capture resolution requested from the camera. The recognition models
/// take square inputs, so the capture is square too.
pub const CAPTURE_SIZE: u32 = 480;

pub const DETECTOR_MODEL_NAME: &str = "blazeface_short_range.onnx";
pub const DETECTOR_MODEL_URL: &str =
    "https://github.com/neutrinographics/facetrack/releases/download/v0.1.0/blazeface_short_range.onnx";

pub const LANDMARK_MODEL_NAME: &str = "face_landmark_192.onnx";
pub const LANDMARK_MODEL_URL: &str =
    "https://github.com/neutrinographics/facetrack/releases/download/v0.1.0/face_landmark_192.onnx";

/// Camera reopen attempts after the active track ends before giving up.
pub const REACQUIRE_MAX_ATTEMPTS: usize = 5;

/// Base delay between reopen attempts; attempt `n` waits `n - 1` times
/// this (the first attempt is immediate).
pub const REACQUIRE_BACKOFF: Duration = Duration::from_millis(250);
