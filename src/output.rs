use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};

use crate::error::{Error, Result};
use crate::mapping::{check_rotation, fill_transform};
use crate::overlay::OverlayStore;
use crate::types::{Frame, RgbFrame};

/// Renders the preview for `frame` at the overlay's view size and draws the
/// overlay on top of it.
///
/// The frame is turned upright by its rotation, mirrored for a front camera,
/// then placed with the same fill transform the face boxes are mapped with.
/// A rotation that disagrees with the view orientation is an error, since
/// boxes and preview would land in different places.
pub fn render_frame(frame: Option<&Frame>, overlay: &OverlayStore) -> Result<RgbFrame> {
    let geometry = overlay.geometry();
    if !(geometry.width >= 1.0 && geometry.height >= 1.0) {
        return Err(Error::EmptyView {
            width: geometry.width,
            height: geometry.height,
        });
    }
    let mut canvas = RgbFrame::new(geometry.width as u32, geometry.height as u32);

    if let Some(frame) = frame {
        check_rotation(geometry.orientation, frame.rotation_degrees)?;
        let mut upright = frame.upright_image();
        if geometry.mirrored {
            imageops::flip_horizontal_in_place(&mut upright);
        }

        let (w, h) = upright.dimensions();
        if w > 0 && h > 0 {
            let (scale, offset_x, offset_y) = fill_transform(geometry.width, geometry.height, w as f32, h as f32);
            let scaled_w = (w as f32 * scale).ceil() as u32;
            let scaled_h = (h as f32 * scale).ceil() as u32;
            let scaled = imageops::resize(&upright, scaled_w, scaled_h, FilterType::Triangle);
            imageops::overlay(&mut canvas, &scaled, offset_x.round() as i64, offset_y.round() as i64);
        }
    }

    overlay.draw_all(&mut canvas)?;
    Ok(canvas)
}

/// Writes rendered frames as numbered PNGs.
pub struct FrameWriter {
    dir: PathBuf,
    written: u64,
}

impl FrameWriter {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, written: 0 })
    }

    pub fn write(&mut self, canvas: &RgbFrame, sequence: u64) -> Result<PathBuf> {
        let path = self.dir.join(format!("frame_{sequence:06}.png"));
        canvas.save(&path)?;
        self.written += 1;
        Ok(path)
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}
