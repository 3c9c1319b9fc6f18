use image::{imageops, ImageBuffer, Rgb};
use serde::{Deserialize, Serialize};

pub type RgbFrame = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// A single 2D landmark position in source-image pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f32,
    pub y: f32,
}

impl Point2D {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Direction vector produced by the gaze estimator
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction, or `None` for a zero-length vector.
    pub fn normalized(&self) -> Option<Self> {
        let len = self.length();
        if len > 0.0 && len.is_finite() {
            Some(Self::new(self.x / len, self.y / len, self.z / len))
        } else {
            None
        }
    }
}

/// Axis-aligned face box in source-image pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Rectangle in overlay view pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MappedRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl MappedRect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Same rectangle with `left <= right` and `top <= bottom`.
    pub fn normalized(&self) -> Self {
        Self {
            left: self.left.min(self.right),
            top: self.top.min(self.bottom),
            right: self.left.max(self.right),
            bottom: self.top.max(self.bottom),
        }
    }

    pub fn center_x(&self) -> f32 {
        (self.left + self.right) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }
}

/// One face reported by the landmark detector for a single frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub left_eye: Option<Point2D>,
    #[serde(default)]
    pub right_eye: Option<Point2D>,
}

impl DetectedFace {
    pub fn new(bounding_box: BoundingBox) -> Self {
        Self {
            bounding_box,
            left_eye: None,
            right_eye: None,
        }
    }

    pub fn with_eyes(mut self, left: Point2D, right: Point2D) -> Self {
        self.left_eye = Some(left);
        self.right_eye = Some(right);
        self
    }

    /// Both eye positions, when the detector reported both.
    pub fn eyes(&self) -> Option<(Point2D, Point2D)> {
        match (self.left_eye, self.right_eye) {
            (Some(l), Some(r)) => Some((l, r)),
            _ => None,
        }
    }
}

/// A decoded camera frame handed to the analyzer.
///
/// `image` is the raw sensor image. `rotation_degrees` is the clockwise turn
/// that makes it upright; detectors report boxes in that upright space.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbFrame,
    pub rotation_degrees: u32,
    pub sequence: u64,
    /// Session generation at capture time.
    pub generation: u64,
}

impl Frame {
    pub fn new(image: RgbFrame, rotation_degrees: u32, sequence: u64) -> Self {
        Self {
            image,
            rotation_degrees,
            sequence,
            generation: 0,
        }
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// The sensor image turned upright. Rotations other than quarter turns
    /// are ignored.
    pub fn upright_image(&self) -> RgbFrame {
        match self.rotation_degrees % 360 {
            90 => imageops::rotate90(&self.image),
            180 => imageops::rotate180(&self.image),
            270 => imageops::rotate270(&self.image),
            _ => self.image.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn is_landscape(self) -> bool {
        self == Orientation::Landscape
    }

    /// Whether a sensor frame turned by `rotation_degrees` comes out in this
    /// orientation. Sensors are landscape, so portrait needs a quarter turn.
    pub fn accepts_rotation(self, rotation_degrees: u32) -> bool {
        match rotation_degrees % 360 {
            0 | 180 => self == Orientation::Landscape,
            90 | 270 => self == Orientation::Portrait,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSelectorMode {
    #[default]
    Front,
    Back,
}

impl CameraSelectorMode {
    pub fn toggled(self) -> Self {
        match self {
            CameraSelectorMode::Front => CameraSelectorMode::Back,
            CameraSelectorMode::Back => CameraSelectorMode::Front,
        }
    }

    /// Front cameras face the user, so their output is mirrored on screen.
    pub fn is_mirrored(self) -> bool {
        self == CameraSelectorMode::Front
    }

    pub fn label(self) -> &'static str {
        match self {
            CameraSelectorMode::Front => "front",
            CameraSelectorMode::Back => "back",
        }
    }
}

/// Inputs to the coordinate mapper that describe the overlay view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewGeometry {
    pub width: f32,
    pub height: f32,
    pub orientation: Orientation,
    pub mirrored: bool,
}

impl ViewGeometry {
    pub fn new(width: f32, height: f32, orientation: Orientation, mirrored: bool) -> Self {
        Self {
            width,
            height,
            orientation,
            mirrored,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}
