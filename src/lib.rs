//! Face box overlay and eye-landmark gaze estimation for camera previews.
//!
//! Frames flow from a [`camera::FrameSource`] through a single-slot handoff
//! into a [`pipeline::FaceAnalyzer`], which asks a
//! [`detector::LandmarkDetector`] for faces. Face boxes land in the
//! [`overlay::OverlayStore`] and are mapped into view space when drawn; eye
//! landmarks become a gaze point published through [`gaze_state`].

pub mod camera;
pub mod config;
pub mod detector;
pub mod error;
pub mod frame_slot;
pub mod gaze;
pub mod gaze_state;
pub mod mapping;
pub mod output;
pub mod overlay;
pub mod pipeline;
pub mod types;


pub use error::{Error, Result};
