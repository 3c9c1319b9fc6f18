use thiserror::Error;

use crate::types::Orientation;

#[derive(Error, Debug)]
pub enum Error {
    #[error("overlay view has no area ({width}x{height}); it has not been laid out yet")]
    EmptyView { width: f32, height: f32 },

    #[error("source image has no area ({width}x{height})")]
    EmptyImage { width: f32, height: f32 },

    #[error("a {rotation_degrees} degree sensor rotation does not produce a {orientation:?} preview")]
    RotationMismatch {
        orientation: Orientation,
        rotation_degrees: u32,
    },

    #[error("cannot draw rectangle with non-finite edges: {0}")]
    NonFiniteRect(String),

    #[error("overlay item {index} failed to draw")]
    Draw {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("face detector failed: {0}")]
    Detector(String),

    #[error("landmark detection failed: {0}")]
    Landmarks(String),

    #[error("frame source error: {0}")]
    Source(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
