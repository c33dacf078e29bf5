//! Face landmark value types.
//!
//! Five named keypoints with a weighted centroid biased toward the nose,
//! which stays the most reliable anchor across head rotations, plus the
//! 4x4 facial transformation matrix the engine can emit alongside them.

/// Indices into [`FaceLandmarks::points`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keypoint {
    LeftEye = 0,
    RightEye = 1,
    Nose = 2,
    LeftMouth = 3,
    RightMouth = 4,
}

/// Centroid weights per keypoint: nose 3x, eyes 2x, mouth corners 1x.
const WEIGHTS: [f64; 5] = [2.0, 2.0, 3.0, 1.0, 1.0];

/// Face keypoints in frame coordinates.
///
/// Points with `x <= 0` are treated as invisible.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceLandmarks {
    points: [(f64, f64); 5],
}

impl FaceLandmarks {
    pub fn new(points: [(f64, f64); 5]) -> Self {
        Self { points }
    }

    pub fn point(&self, kp: Keypoint) -> (f64, f64) {
        self.points[kp as usize]
    }

    pub fn points(&self) -> &[(f64, f64); 5] {
        &self.points
    }

    pub fn has_visible(&self) -> bool {
        self.points.iter().any(|(x, _)| *x > 0.0)
    }

    /// Weighted centroid of visible keypoints, or `None` when every
    /// keypoint is invisible.
    pub fn center(&self) -> Option<(f64, f64)> {
        let mut wx = 0.0;
        let mut wy = 0.0;
        let mut w_total = 0.0;

        for (i, (x, y)) in self.points.iter().enumerate() {
            if *x > 0.0 {
                wx += x * WEIGHTS[i];
                wy += y * WEIGHTS[i];
                w_total += WEIGHTS[i];
            }
        }

        if w_total == 0.0 {
            return None;
        }
        Some((wx / w_total, wy / w_total))
    }

    /// How far the face is turned: 0.0 = frontal, 1.0 = full profile.
    ///
    /// Measured as nose offset from the eye midpoint relative to eye span.
    /// Returns 0.0 when the nose or either eye is not visible.
    pub fn profile_ratio(&self) -> f64 {
        let nose = self.point(Keypoint::Nose);
        let left = self.point(Keypoint::LeftEye);
        let right = self.point(Keypoint::RightEye);

        if nose.0 <= 0.0 || left.0 <= 0.0 || right.0 <= 0.0 {
            return 0.0;
        }

        let eye_mid_x = (left.0 + right.0) / 2.0;
        let eye_span = (right.0 - left.0).abs();
        if eye_span <= 0.0 {
            return 0.0;
        }

        ((nose.0 - eye_mid_x).abs() / eye_span).min(1.0)
    }

    /// Head roll in radians, from the angle of the eye line.
    /// Returns 0.0 when either eye is not visible.
    pub fn roll(&self) -> f64 {
        let left = self.point(Keypoint::LeftEye);
        let right = self.point(Keypoint::RightEye);
        if left.0 <= 0.0 || right.0 <= 0.0 {
            return 0.0;
        }
        (right.1 - left.1).atan2(right.0 - left.0)
    }
}

/// Row-major 4x4 facial transformation matrix: the rigid transform from a
/// canonical frontal face to the detected pose.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformMatrix {
    m: [[f64; 4]; 4],
}

impl TransformMatrix {
    pub fn identity() -> Self {
        let mut m = [[0.0; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { m }
    }

    pub fn from_rows(m: [[f64; 4]; 4]) -> Self {
        Self { m }
    }

    pub fn rows(&self) -> &[[f64; 4]; 4] {
        &self.m
    }

    /// Translation components `(tx, ty, tz)` from the last column.
    pub fn translation(&self) -> (f64, f64, f64) {
        (self.m[0][3], self.m[1][3], self.m[2][3])
    }

    /// Yaw (rotation about the vertical axis) in radians, assuming the
    /// rotation block is a pure rotation.
    pub fn yaw(&self) -> f64 {
        (-self.m[2][0]).asin()
    }

    /// Roll (rotation about the view axis) in radians.
    pub fn roll(&self) -> f64 {
        self.m[1][0].atan2(self.m[0][0])
    }
}

/// One recognition outcome for a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkResult {
    pub landmarks: FaceLandmarks,
    /// Present when the engine was configured to emit transforms.
    pub transform: Option<TransformMatrix>,
}
