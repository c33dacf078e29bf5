use thiserror::Error;

use crate::shared::constants::CAPTURE_SIZE;
use crate::shared::frame::Frame;

/// Which camera the source should prefer when more than one is available.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
}

/// Constraints for opening a camera track.
///
/// Cloneable so that a reopen after track loss uses byte-identical
/// constraints to the original open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConstraints {
    pub width: u32,
    pub height: u32,
    pub facing: FacingMode,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            width: CAPTURE_SIZE,
            height: CAPTURE_SIZE,
            facing: FacingMode::User,
        }
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    /// The track's underlying device went away (unplugged, revoked).
    /// Not transient: the track is dead and must be replaced.
    #[error("camera track ended")]
    Ended,

    /// A single frame grab failed. Transient: the next grab may succeed.
    #[error("frame grab failed: {0}")]
    Frame(String),

    #[error("camera permission denied for {device}")]
    PermissionDenied { device: String },

    #[error("camera unavailable: {device}: {reason}")]
    DeviceUnavailable { device: String, reason: String },
}

impl CaptureError {
    /// Whether the error is a per-frame hiccup rather than track loss.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Frame(_))
    }
}

/// A live handle to one video stream from a capture device.
///
/// Exclusively owned by whoever opened it; replaced, not repaired, when
/// the device goes away.
pub trait CameraTrack: Send {
    /// Grab the next frame. `CaptureError::Ended` means the device is gone
    /// and the track must be replaced; `CaptureError::Frame` is transient.
    fn grab_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Release the underlying device. Idempotent.
    fn stop(&mut self);
}

/// Opens camera tracks against a set of constraints.
pub trait CameraSource: Send {
    fn open_track(
        &mut self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn CameraTrack>, CaptureError>;
}
