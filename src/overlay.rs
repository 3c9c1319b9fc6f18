//! Drawable overlay composited over the camera preview.
//!
//! [`OverlayStore`] owns the items for the current frame. All mutation and
//! drawing go through one lock, so the detector callback and the renderer
//! can run on different threads.

use std::sync::atomic::{AtomicU64, Ordering};

use image::Rgb;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::error::{Error, Result};
use crate::mapping::map_with_geometry;
use crate::types::{BoundingBox, CameraSelectorMode, MappedRect, Orientation, RgbFrame, ViewGeometry};

pub const BOX_STROKE_WIDTH: f32 = 5.0;
pub const BOX_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Something overlay items can draw on.
pub trait Surface {
    fn size(&self) -> (u32, u32);
    fn stroke_rect(&mut self, rect: MappedRect, color: Rgb<u8>, stroke_width: f32) -> Result<()>;
}

impl Surface for RgbFrame {
    fn size(&self) -> (u32, u32) {
        self.dimensions()
    }

    fn stroke_rect(&mut self, rect: MappedRect, color: Rgb<u8>, stroke_width: f32) -> Result<()> {
        let edges = [rect.left, rect.top, rect.right, rect.bottom];
        if edges.iter().any(|v| !v.is_finite()) {
            return Err(Error::NonFiniteRect(format!("{rect:?}")));
        }
        let rect = rect.normalized();
        // Stroke straddles the edge, like a canvas stroke.
        let half = (stroke_width.max(1.0) / 2.0).max(0.5);

        let (l, t, r, b) = (rect.left, rect.top, rect.right, rect.bottom);
        fill_rect(self, l - half, t - half, r + half, t + half, color);
        fill_rect(self, l - half, b - half, r + half, b + half, color);
        fill_rect(self, l - half, t - half, l + half, b + half, color);
        fill_rect(self, r - half, t - half, r + half, b + half, color);
        Ok(())
    }
}

fn fill_rect(image: &mut RgbFrame, x0: f32, y0: f32, x1: f32, y1: f32, color: Rgb<u8>) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp_x = |v: f32| v.round().clamp(0.0, w as f32) as u32;
    let clamp_y = |v: f32| v.round().clamp(0.0, h as f32) as u32;
    let (x0, x1) = (clamp_x(x0), clamp_x(x1));
    let (y0, y1) = (clamp_y(y0), clamp_y(y1));
    for y in y0..y1 {
        for x in x0..x1 {
            image.put_pixel(x, y, color);
        }
    }
}

/// A drawable owned by the [`OverlayStore`].
pub trait OverlayItem: Send {
    fn draw(&self, surface: &mut dyn Surface, geometry: &ViewGeometry) -> Result<()>;
}

/// Stroke style for face boxes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxStyle {
    pub color: Rgb<u8>,
    pub stroke_width: f32,
}

impl Default for BoxStyle {
    fn default() -> Self {
        Self {
            color: BOX_COLOR,
            stroke_width: BOX_STROKE_WIDTH,
        }
    }
}

/// Outline of one detected face, mapped into the view when drawn.
#[derive(Debug, Clone)]
pub struct FaceBoxGraphic {
    bounding_box: BoundingBox,
    image_width: u32,
    image_height: u32,
    style: BoxStyle,
}

impl FaceBoxGraphic {
    pub fn new(bounding_box: BoundingBox, image_width: u32, image_height: u32, style: BoxStyle) -> Self {
        Self {
            bounding_box,
            image_width,
            image_height,
            style,
        }
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }
}

impl OverlayItem for FaceBoxGraphic {
    fn draw(&self, surface: &mut dyn Surface, geometry: &ViewGeometry) -> Result<()> {
        let mapped = map_with_geometry(
            geometry,
            self.image_width as f32,
            self.image_height as f32,
            &self.bounding_box,
        )?;
        surface.stroke_rect(mapped.rect.normalized(), self.style.color, self.style.stroke_width)
    }
}

/// Handle returned by [`OverlayStore::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId(u64);

struct Items {
    entries: Vec<(ItemId, Box<dyn OverlayItem>)>,
    next_id: u64,
}

#[derive(Debug, Clone, Copy)]
struct ViewState {
    width: f32,
    height: f32,
    orientation: Orientation,
    selector: CameraSelectorMode,
}

type InvalidateHook = Box<dyn Fn() + Send + Sync>;

pub struct OverlayStore {
    items: Mutex<Items>,
    view: RwLock<ViewState>,
    invalidations: AtomicU64,
    on_invalidate: RwLock<Option<InvalidateHook>>,
}

impl OverlayStore {
    pub fn new(width: f32, height: f32, orientation: Orientation, selector: CameraSelectorMode) -> Self {
        Self {
            items: Mutex::new(Items {
                entries: Vec::new(),
                next_id: 0,
            }),
            view: RwLock::new(ViewState {
                width,
                height,
                orientation,
                selector,
            }),
            invalidations: AtomicU64::new(0),
            on_invalidate: RwLock::new(None),
        }
    }

    /// Appends an item. Does not request a redraw.
    pub fn add(&self, item: Box<dyn OverlayItem>) -> ItemId {
        let mut items = self.items.lock();
        let id = ItemId(items.next_id);
        items.next_id += 1;
        items.entries.push((id, item));
        id
    }

    pub fn remove(&self, id: ItemId) -> Option<Box<dyn OverlayItem>> {
        let removed = {
            let mut items = self.items.lock();
            let pos = items.entries.iter().position(|(i, _)| *i == id);
            pos.map(|p| items.entries.remove(p).1)
        };
        self.post_invalidate();
        removed
    }

    pub fn clear(&self) {
        self.items.lock().entries.clear();
        self.post_invalidate();
    }

    pub fn len(&self) -> usize {
        self.items.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Draws every item in insertion order. The first failing item aborts the
    /// pass; the error is fatal and carries the item's position.
    pub fn draw_all(&self, surface: &mut dyn Surface) -> Result<usize> {
        let geometry = self.geometry();
        let items = self.items.lock();
        for (index, (_, item)) in items.entries.iter().enumerate() {
            item.draw(surface, &geometry).map_err(|source| Error::Draw {
                index,
                source: Box::new(source),
            })?;
        }
        trace!(count = items.entries.len(), "overlay drawn");
        Ok(items.entries.len())
    }

    /// Requests a redraw from whoever renders the overlay.
    pub fn post_invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_invalidate.read().as_ref() {
            hook();
        }
    }

    /// Number of redraw requests so far; renderers poll this for changes.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }

    pub fn set_on_invalidate<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_invalidate.write() = Some(Box::new(hook));
    }

    pub fn geometry(&self) -> ViewGeometry {
        let view = self.view.read();
        ViewGeometry::new(view.width, view.height, view.orientation, view.selector.is_mirrored())
    }

    pub fn set_view_size(&self, width: f32, height: f32) {
        let mut view = self.view.write();
        view.width = width;
        view.height = height;
    }

    pub fn set_orientation(&self, orientation: Orientation) {
        self.view.write().orientation = orientation;
    }

    pub fn selector(&self) -> CameraSelectorMode {
        self.view.read().selector
    }

    pub fn toggle_selector(&self) -> CameraSelectorMode {
        let mut view = self.view.write();
        view.selector = view.selector.toggled();
        view.selector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Records draw order into a shared log.
    struct Tagged {
        tag: usize,
        log: Arc<Mutex<Vec<usize>>>,
    }

    impl OverlayItem for Tagged {
        fn draw(&self, _surface: &mut dyn Surface, _geometry: &ViewGeometry) -> Result<()> {
            self.log.lock().push(self.tag);
            Ok(())
        }
    }

    struct Failing;

    impl OverlayItem for Failing {
        fn draw(&self, _surface: &mut dyn Surface, _geometry: &ViewGeometry) -> Result<()> {
            Err(Error::NonFiniteRect("test".to_string()))
        }
    }

    fn store() -> OverlayStore {
        OverlayStore::new(100.0, 100.0, Orientation::Landscape, CameraSelectorMode::Back)
    }

    #[test]
    fn draws_each_item_once_in_insertion_order() {
        let store = store();
        let log = Arc::new(Mutex::new(Vec::new()));
        store.add(Box::new(Tagged { tag: 99, log: log.clone() }));
        store.clear();
        for tag in 0..5 {
            store.add(Box::new(Tagged { tag, log: log.clone() }));
        }

        let mut canvas = RgbFrame::new(100, 100);
        assert_eq!(store.draw_all(&mut canvas).unwrap(), 5);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn add_does_not_invalidate_but_remove_and_clear_do() {
        let store = store();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = store.add(Box::new(Tagged { tag: 0, log: log.clone() }));
        assert_eq!(store.invalidations(), 0);

        assert!(store.remove(id).is_some());
        assert_eq!(store.invalidations(), 1);
        assert!(store.remove(id).is_none());
        assert_eq!(store.invalidations(), 2);

        store.clear();
        assert_eq!(store.invalidations(), 3);
    }

    #[test]
    fn remove_keeps_other_items() {
        let store = store();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = store.add(Box::new(Tagged { tag: 1, log: log.clone() }));
        let b = store.add(Box::new(Tagged { tag: 2, log: log.clone() }));
        let _c = store.add(Box::new(Tagged { tag: 3, log: log.clone() }));
        store.remove(b);

        let mut canvas = RgbFrame::new(10, 10);
        store.draw_all(&mut canvas).unwrap();
        assert_eq!(*log.lock(), vec![1, 3]);
    }

    #[test]
    fn draw_failure_aborts_and_reports_index() {
        let store = store();
        let log = Arc::new(Mutex::new(Vec::new()));
        store.add(Box::new(Tagged { tag: 0, log: log.clone() }));
        store.add(Box::new(Failing));
        store.add(Box::new(Tagged { tag: 2, log: log.clone() }));

        let mut canvas = RgbFrame::new(10, 10);
        let err = store.draw_all(&mut canvas).unwrap_err();
        assert!(matches!(err, Error::Draw { index: 1, .. }));
        assert_eq!(*log.lock(), vec![0]);
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        let store = Arc::new(store());
        let log = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..2)
            .map(|t| {
                let store = store.clone();
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        store.add(Box::new(Tagged { tag: t * 1000 + i, log: log.clone() }));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 2000);

        let mut canvas = RgbFrame::new(1, 1);
        assert_eq!(store.draw_all(&mut canvas).unwrap(), 2000);
        let mut seen = log.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..2000).collect::<Vec<_>>());
    }

    #[test]
    fn invalidate_hook_fires() {
        let store = store();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = hits.clone();
        store.set_on_invalidate(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.clear();
        store.post_invalidate();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn face_box_strokes_mapped_outline() {
        // Back camera, landscape, 100x100 image in a 100x100 view: identity.
        let store = store();
        store.add(Box::new(FaceBoxGraphic::new(
            BoundingBox::new(20, 20, 60, 60),
            100,
            100,
            BoxStyle {
                color: Rgb([255, 0, 0]),
                stroke_width: 2.0,
            },
        )));

        let mut canvas = RgbFrame::new(100, 100);
        store.draw_all(&mut canvas).unwrap();
        assert_eq!(*canvas.get_pixel(20, 40), Rgb([255, 0, 0]));
        assert_eq!(*canvas.get_pixel(59, 40), Rgb([255, 0, 0]));
        assert_eq!(*canvas.get_pixel(40, 20), Rgb([255, 0, 0]));
        assert_eq!(*canvas.get_pixel(40, 40), Rgb([0, 0, 0]));
    }

    #[test]
    fn face_box_follows_selector_mirroring() {
        let store = store();
        store.toggle_selector();
        assert_eq!(store.selector(), CameraSelectorMode::Front);
        assert!(store.geometry().mirrored);

        store.add(Box::new(FaceBoxGraphic::new(
            BoundingBox::new(10, 20, 30, 60),
            100,
            100,
            BoxStyle::default(),
        )));
        let mut canvas = RgbFrame::new(100, 100);
        store.draw_all(&mut canvas).unwrap();
        // Mirrored about x = 50: the box now spans 70..90.
        assert_eq!(*canvas.get_pixel(70, 40), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(10, 40), Rgb([0, 0, 0]));
    }

    #[test]
    fn unlaid_view_fails_the_draw() {
        let store = OverlayStore::new(0.0, 0.0, Orientation::Portrait, CameraSelectorMode::Front);
        store.add(Box::new(FaceBoxGraphic::new(
            BoundingBox::new(0, 0, 10, 10),
            640,
            480,
            BoxStyle::default(),
        )));
        let mut canvas = RgbFrame::new(10, 10);
        let err = store.draw_all(&mut canvas).unwrap_err();
        match err {
            Error::Draw { index, source } => {
                assert_eq!(index, 0);
                assert!(matches!(*source, Error::EmptyView { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
