use std::fmt;

use crate::types::{Orientation, Point2D, ScreenSize, Vector3};

// =========================================================================
// Gaze Estimate
// =========================================================================

/// A screen-space gaze point. `(0, 0)` means no valid estimate this frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GazeEstimate {
    pub x: f32,
    pub y: f32,
}

impl GazeEstimate {
    pub const SENTINEL: GazeEstimate = GazeEstimate { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_valid(&self) -> bool {
        self.x != 0.0 && self.y != 0.0
    }
}

// =========================================================================
// Display Status
// =========================================================================

/// What the gaze label shows. The variants are terminal display states, not
/// errors; the next frame simply produces a new status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GazeStatus {
    Point(GazeEstimate),
    NoEyeDetected,
    NoFaceOrMultiple,
    DetectorFailed,
}

impl GazeStatus {
    pub fn from_estimate(estimate: GazeEstimate) -> Self {
        if estimate.is_valid() {
            GazeStatus::Point(estimate)
        } else {
            GazeStatus::NoEyeDetected
        }
    }

    pub fn point(&self) -> Option<GazeEstimate> {
        match self {
            GazeStatus::Point(p) => Some(*p),
            _ => None,
        }
    }
}

impl fmt::Display for GazeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GazeStatus::Point(p) => write!(f, "Gaze Point: ({}, {})", label_float(p.x), label_float(p.y)),
            GazeStatus::NoEyeDetected => f.write_str("No Eye Detected"),
            GazeStatus::NoFaceOrMultiple => {
                f.write_str("No Face Detected or Multiple Faces Detected")
            }
            GazeStatus::DetectorFailed => f.write_str("Face Detector failed"),
        }
    }
}

/// Label text for a coordinate: plain decimal with at least one fractional
/// digit for magnitudes in `[1e-3, 1e7)`, otherwise `1.47456E7` style.
pub fn label_float(value: f32) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = value.abs();
    if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
        return format!("{value:?}");
    }
    let sci = format!("{value:e}");
    match sci.split_once('e') {
        Some((mantissa, exponent)) if mantissa.contains('.') => format!("{mantissa}E{exponent}"),
        Some((mantissa, exponent)) => format!("{mantissa}.0E{exponent}"),
        None => sci,
    }
}

// =========================================================================
// Estimation stages (pure, for regression testing)
// =========================================================================

/// Unit vector pointing from the left eye to the right eye.
/// Returns `None` when both eyes sit on the same pixel.
pub fn gaze_vector(left_eye: Point2D, right_eye: Point2D) -> Option<Vector3> {
    Vector3::new(right_eye.x - left_eye.x, right_eye.y - left_eye.y, 0.0).normalized()
}

/// Landscape displays swap the horizontal and vertical axes.
pub fn orient(vector: Vector3, orientation: Orientation) -> Vector3 {
    match orientation {
        Orientation::Portrait => vector,
        Orientation::Landscape => Vector3::new(vector.y, vector.x, -vector.z),
    }
}

/// First mapping stage: center of the screen plus the direction scaled by
/// half the screen. Halves use integer division.
pub fn map_to_screen(vector: Vector3, screen: ScreenSize) -> (f32, f32) {
    let half_w = (screen.width / 2) as f32;
    let half_h = (screen.height / 2) as f32;
    let screen_x = half_w + vector.x * half_w;
    let screen_y = half_h - vector.y * half_h;
    (screen_x, screen_y)
}

/// Second mapping stage: treats the first stage as a fraction and scales it
/// by the screen again. Only strictly positive results are accepted.
// NOTE: this compounds with map_to_screen and is kept for output
// compatibility with existing consumers of the label.
pub fn gaze_point(mapped: (f32, f32), screen: ScreenSize) -> GazeEstimate {
    let gaze_x = mapped.0 * screen.width as f32;
    let gaze_y = mapped.1 * screen.height as f32;
    if gaze_x > 0.0 && gaze_y > 0.0 {
        GazeEstimate::new(gaze_x, gaze_y)
    } else {
        GazeEstimate::SENTINEL
    }
}

/// Full estimate from two eye landmarks.
pub fn estimate_gaze(
    left_eye: Point2D,
    right_eye: Point2D,
    orientation: Orientation,
    screen: ScreenSize,
) -> GazeEstimate {
    let Some(vector) = gaze_vector(left_eye, right_eye) else {
        return GazeEstimate::SENTINEL;
    };
    let vector = orient(vector, orientation);
    gaze_point(map_to_screen(vector, screen), screen)
}
