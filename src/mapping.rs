//! Projection of detector bounding boxes into overlay view coordinates.
//!
//! The source image is scaled to fill the view (cropping rather than
//! letterboxing) and centered. In portrait the sensor image is rotated 90
//! degrees relative to the view, so its width and height swap roles.

use crate::error::{Error, Result};
use crate::types::{BoundingBox, MappedRect, Orientation, ViewGeometry};

/// A mapped box together with the transform that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappedBox {
    pub rect: MappedRect,
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

/// Maps `bbox` from source-image pixels into view pixels.
///
/// Left and right are taken from the opposite source edges before the
/// optional mirror step, so an unmirrored result has `left > right` for a
/// well-formed box. Callers that draw should use [`MappedRect::normalized`].
pub fn map_to_view(
    view_width: f32,
    view_height: f32,
    image_height: f32,
    image_width: f32,
    bbox: &BoundingBox,
    is_landscape: bool,
    is_mirrored: bool,
) -> Result<MappedBox> {
    if !(view_width > 0.0 && view_height > 0.0) {
        return Err(Error::EmptyView {
            width: view_width,
            height: view_height,
        });
    }
    if !(image_width > 0.0 && image_height > 0.0) {
        return Err(Error::EmptyImage {
            width: image_width,
            height: image_height,
        });
    }

    let (logical_width, logical_height) = if is_landscape {
        (image_width, image_height)
    } else {
        (image_height, image_width)
    };
    let (scale, offset_x, offset_y) = fill_transform(view_width, view_height, logical_width, logical_height);

    let mut rect = MappedRect {
        left: bbox.right as f32 * scale + offset_x,
        top: bbox.top as f32 * scale + offset_y,
        right: bbox.left as f32 * scale + offset_x,
        bottom: bbox.bottom as f32 * scale + offset_y,
    };

    if is_mirrored {
        let center_x = view_width / 2.0;
        rect.left = center_x + (center_x - rect.left);
        rect.right = center_x - (rect.right - center_x);
    }

    Ok(MappedBox {
        rect,
        scale,
        offset_x,
        offset_y,
    })
}

/// Scale and offsets that make a `logical_width` x `logical_height` upright
/// image fill the view, centered. The preview and the boxes both use this.
pub fn fill_transform(view_width: f32, view_height: f32, logical_width: f32, logical_height: f32) -> (f32, f32, f32) {
    let scale = (view_width / logical_width).max(view_height / logical_height);
    let offset_x = (view_width - (logical_width * scale).ceil()) / 2.0;
    let offset_y = (view_height - (logical_height * scale).ceil()) / 2.0;
    (scale, offset_x, offset_y)
}

/// Rejects a sensor rotation that would show the preview in the other
/// orientation than the one boxes are mapped for.
pub fn check_rotation(orientation: Orientation, rotation_degrees: u32) -> Result<()> {
    if orientation.accepts_rotation(rotation_degrees) {
        Ok(())
    } else {
        Err(Error::RotationMismatch {
            orientation,
            rotation_degrees,
        })
    }
}

/// [`map_to_view`] driven by a [`ViewGeometry`].
pub fn map_with_geometry(
    geometry: &ViewGeometry,
    image_width: f32,
    image_height: f32,
    bbox: &BoundingBox,
) -> Result<MappedBox> {
    map_to_view(
        geometry.width,
        geometry.height,
        image_height,
        image_width,
        bbox,
        geometry.orientation.is_landscape(),
        geometry.mirrored,
    )
}
