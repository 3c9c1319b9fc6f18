use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame_slot::LatestFrameSlot;
use crate::overlay::OverlayStore;
use crate::pipeline::{Analyzer, SessionToken};
use crate::types::{CameraSelectorMode, Frame};

/// Anything that can push decoded frames at the session.
pub trait FrameSource: Send {
    fn name(&self) -> String;
    fn start(&mut self, mode: CameraSelectorMode) -> Result<()>;
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
    fn stop(&mut self);
}

// =========================================================================
// Image sequence source
// =========================================================================

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Replays a directory of still images as a camera feed, in file name order.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    sequence: u64,
    rotation_degrees: u32,
    looping: bool,
    interval: Duration,
    mode: Option<CameraSelectorMode>,
}

impl ImageSequenceSource {
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(Error::Source(format!("no images found in {}", dir.display())));
        }
        Ok(Self::from_paths(paths))
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            cursor: 0,
            sequence: 0,
            rotation_degrees: 0,
            looping: false,
            interval: Duration::ZERO,
            mode: None,
        }
    }

    pub fn with_rotation(mut self, degrees: u32) -> Self {
        self.rotation_degrees = degrees;
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Delay between frames, to imitate a camera's frame rate.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn name(&self) -> String {
        format!("Image sequence ({} frames)", self.paths.len())
    }

    fn start(&mut self, mode: CameraSelectorMode) -> Result<()> {
        self.mode = Some(mode);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.mode.is_none() {
            return Err(Error::Source("image sequence not started".to_string()));
        }
        if self.cursor >= self.paths.len() {
            if !self.looping || self.paths.is_empty() {
                return Ok(None);
            }
            self.cursor = 0;
        }
        if !self.interval.is_zero() {
            thread::sleep(self.interval);
        }

        let path = &self.paths[self.cursor];
        let image = image::open(path)?.to_rgb8();
        self.cursor += 1;

        let frame = Frame::new(image, self.rotation_degrees, self.sequence);
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn stop(&mut self) {
        self.mode = None;
    }
}

// =========================================================================
// Live camera source
// =========================================================================

#[cfg(feature = "camera")]
pub use live::NokhwaSource;

#[cfg(feature = "camera")]
mod live {
    use nokhwa::{
        pixel_format::RgbFormat,
        utils::{CameraIndex, RequestedFormat, RequestedFormatType},
        Camera,
    };
    use tracing::info;

    use super::FrameSource;
    use crate::error::{Error, Result};
    use crate::types::{CameraSelectorMode, Frame, RgbFrame};

    pub struct NokhwaSource {
        front_index: u32,
        back_index: u32,
        rotation_degrees: u32,
        camera: Option<Camera>,
        sequence: u64,
    }

    impl NokhwaSource {
        pub fn new(front_index: u32, back_index: u32, rotation_degrees: u32) -> Self {
            Self {
                front_index,
                back_index,
                rotation_degrees,
                camera: None,
                sequence: 0,
            }
        }
    }

    fn source_err(context: &str, e: impl std::fmt::Display) -> Error {
        Error::Source(format!("{context}: {e}"))
    }

    impl FrameSource for NokhwaSource {
        fn name(&self) -> String {
            self.camera
                .as_ref()
                .map(|c| c.info().human_name())
                .unwrap_or_else(|| "camera (closed)".to_string())
        }

        fn start(&mut self, mode: CameraSelectorMode) -> Result<()> {
            let index = match mode {
                CameraSelectorMode::Front => self.front_index,
                CameraSelectorMode::Back => self.back_index,
            };
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
            let mut camera = Camera::new(CameraIndex::Index(index), requested)
                .map_err(|e| source_err("failed to create camera instance", e))?;
            camera
                .open_stream()
                .map_err(|e| source_err("failed to open camera stream", e))?;

            info!(camera = %camera.info().human_name(), format = %camera.camera_format(), "opened camera");
            self.camera = Some(camera);
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            let Some(camera) = self.camera.as_mut() else {
                return Err(Error::Source("camera not started".to_string()));
            };
            let raw = camera.frame().map_err(|e| source_err("failed to get frame", e))?;
            let decoded = raw
                .decode_image::<RgbFormat>()
                .map_err(|e| source_err("failed to decode frame", e))?;
            // nokhwa links its own `image` version; rebuild from the raw buffer.
            let (width, height) = (decoded.width(), decoded.height());
            let image = RgbFrame::from_raw(width, height, decoded.into_raw())
                .ok_or_else(|| Error::Source(format!("short frame buffer for {width}x{height}")))?;
            let frame = Frame::new(image, self.rotation_degrees, self.sequence);
            self.sequence += 1;
            Ok(Some(frame))
        }

        fn stop(&mut self) {
            if let Some(mut camera) = self.camera.take() {
                let _ = camera.stop_stream();
            }
        }
    }
}

// =========================================================================
// Camera session: producer thread -> latest frame slot -> analysis worker
// =========================================================================

#[derive(Debug, Default)]
struct Counters {
    produced: AtomicU64,
    analyzed: AtomicU64,
    discarded: AtomicU64,
    exhausted: AtomicBool,
}

pub struct CameraSession {
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    overlay: Arc<OverlayStore>,
    slot: Arc<LatestFrameSlot<Frame>>,
    preview: Arc<Mutex<Option<Frame>>>,
    token: SessionToken,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    producer: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CameraSession {
    pub fn new(source: Box<dyn FrameSource>, overlay: Arc<OverlayStore>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            overlay,
            slot: Arc::new(LatestFrameSlot::new()),
            preview: Arc::new(Mutex::new(None)),
            token: SessionToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            producer: None,
            worker: None,
        }
    }

    /// Token to hand to the analyzer so it can drop results from a previous
    /// camera binding.
    pub fn token(&self) -> SessionToken {
        self.token.clone()
    }

    pub fn mode(&self) -> CameraSelectorMode {
        self.overlay.selector()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start(&mut self, analyzer: Box<dyn Analyzer>) -> Result<()> {
        if self.is_running() {
            return Err(Error::Source("session already running".to_string()));
        }
        let mode = self.mode();
        {
            let mut source = self.source.lock();
            source.start(mode)?;
            info!(source = %source.name(), analyzer = %analyzer.name(), camera = mode.label(), "session started");
        }
        self.running.store(true, Ordering::SeqCst);
        self.producer = Some(self.spawn_producer());
        self.worker = Some(self.spawn_worker(analyzer));
        Ok(())
    }

    fn spawn_producer(&self) -> JoinHandle<()> {
        let source = self.source.clone();
        let slot = self.slot.clone();
        let preview = self.preview.clone();
        let running = self.running.clone();
        let counters = self.counters.clone();
        let token = self.token.clone();

        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                // Generation is read under the source lock, which a selector
                // switch holds while it bumps the generation.
                let (generation, next) = {
                    let mut source = source.lock();
                    (token.current(), source.next_frame())
                };
                match next {
                    Ok(Some(frame)) => {
                        counters.produced.fetch_add(1, Ordering::SeqCst);
                        let frame = frame.with_generation(generation);
                        if !token.is_current(generation) {
                            debug!(sequence = frame.sequence, "frame from previous camera discarded");
                            counters.discarded.fetch_add(1, Ordering::SeqCst);
                            continue;
                        }
                        *preview.lock() = Some(frame.clone());
                        if let Some(old) = slot.push(frame) {
                            debug!(sequence = old.sequence, "frame dropped, analyzer busy");
                        }
                    }
                    Ok(None) => {
                        debug!("frame source exhausted");
                        break;
                    }
                    Err(err) => {
                        warn!("frame source failed: {err}");
                        break;
                    }
                }
            }
            counters.exhausted.store(true, Ordering::SeqCst);
        })
    }

    fn spawn_worker(&self, mut analyzer: Box<dyn Analyzer>) -> JoinHandle<()> {
        let slot = self.slot.clone();
        let counters = self.counters.clone();

        thread::spawn(move || {
            while let Some(frame) = slot.take() {
                let report = analyzer.analyze(frame);
                debug!(sequence = report.sequence, boxes = ?report.boxes, stale = report.stale, "frame analyzed");
                counters.analyzed.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    /// Flips between front and back camera. In-flight detections from the
    /// previous binding are discarded and the overlay is emptied.
    pub fn switch_selector(&mut self) -> Result<CameraSelectorMode> {
        let mut source = self.source.lock();
        self.token.bump();
        let mode = self.overlay.toggle_selector();
        self.overlay.clear();
        // Drop a frame captured by the old camera that nobody picked up yet.
        if self.slot.try_take().is_some() {
            self.counters.discarded.fetch_add(1, Ordering::SeqCst);
        }

        source.stop();
        source.start(mode)?;
        info!(camera = mode.label(), "camera selector switched");
        Ok(mode)
    }

    /// Most recent captured frame, for drawing the preview under the overlay.
    pub fn latest_preview(&self) -> Option<Frame> {
        self.preview.lock().clone()
    }

    pub fn frames_produced(&self) -> u64 {
        self.counters.produced.load(Ordering::SeqCst)
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.counters.analyzed.load(Ordering::SeqCst)
    }

    /// Frames replaced in the slot or discarded by a selector switch.
    pub fn frames_dropped(&self) -> u64 {
        self.slot.dropped() + self.counters.discarded.load(Ordering::SeqCst)
    }

    /// True once the source ran out and every delivered frame was handled.
    pub fn is_drained(&self) -> bool {
        self.counters.exhausted.load(Ordering::SeqCst)
            && self.frames_analyzed() + self.frames_dropped() >= self.frames_produced()
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.token.bump();
        self.slot.close();
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.source.lock().stop();
        info!(
            produced = self.frames_produced(),
            analyzed = self.frames_analyzed(),
            dropped = self.frames_dropped(),
            "session stopped"
        );
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FrameReport;
    use crate::types::{Orientation, RgbFrame};
    use std::time::Instant;

    /// Emits `total` blank frames, recording the modes it was started with.
    struct Synthetic {
        total: u64,
        next: u64,
        starts: Arc<Mutex<Vec<CameraSelectorMode>>>,
    }

    impl FrameSource for Synthetic {
        fn name(&self) -> String {
            "synthetic".to_string()
        }

        fn start(&mut self, mode: CameraSelectorMode) -> Result<()> {
            self.starts.lock().push(mode);
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.next >= self.total {
                return Ok(None);
            }
            let frame = Frame::new(RgbFrame::new(8, 8), 0, self.next);
            self.next += 1;
            Ok(Some(frame))
        }

        fn stop(&mut self) {}
    }

    struct Recording {
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl Analyzer for Recording {
        fn name(&self) -> String {
            "recording".to_string()
        }

        fn analyze(&mut self, frame: Frame) -> FrameReport {
            thread::sleep(Duration::from_millis(1));
            self.seen.lock().push(frame.sequence);
            FrameReport {
                sequence: frame.sequence,
                ..Default::default()
            }
        }
    }

    /// Holds its first frame until the gate opens, like a camera read that
    /// is still in flight. Reports when that read has begun.
    struct Gated {
        entered: Option<std::sync::mpsc::Sender<()>>,
        gate: Option<std::sync::mpsc::Receiver<()>>,
        total: u64,
        next: u64,
    }

    impl FrameSource for Gated {
        fn name(&self) -> String {
            "gated".to_string()
        }

        fn start(&mut self, _mode: CameraSelectorMode) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if let Some(entered) = self.entered.take() {
                let _ = entered.send(());
            }
            if let Some(gate) = self.gate.take() {
                let _ = gate.recv();
            }
            if self.next >= self.total {
                return Ok(None);
            }
            let frame = Frame::new(RgbFrame::new(8, 8), 0, self.next);
            self.next += 1;
            Ok(Some(frame))
        }

        fn stop(&mut self) {}
    }

    /// Records `(sequence, generation)` of every analyzed frame.
    struct Generations {
        seen: Arc<Mutex<Vec<(u64, u64)>>>,
    }

    impl Analyzer for Generations {
        fn name(&self) -> String {
            "generations".to_string()
        }

        fn analyze(&mut self, frame: Frame) -> FrameReport {
            self.seen.lock().push((frame.sequence, frame.generation));
            FrameReport {
                sequence: frame.sequence,
                ..Default::default()
            }
        }
    }

    fn overlay() -> Arc<OverlayStore> {
        Arc::new(OverlayStore::new(100.0, 100.0, Orientation::Portrait, CameraSelectorMode::Front))
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn frames_are_analyzed_in_order_and_counted() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut session = CameraSession::new(
            Box::new(Synthetic { total: 200, next: 0, starts: starts.clone() }),
            overlay(),
        );
        session.start(Box::new(Recording { seen: seen.clone() })).unwrap();
        wait_until(|| session.is_drained());

        let seen = seen.lock().clone();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(session.frames_produced(), 200);
        assert_eq!(
            session.frames_analyzed() + session.frames_dropped(),
            200
        );
        assert_eq!(*starts.lock(), vec![CameraSelectorMode::Front]);
        session.stop();
        assert!(!session.is_running());
    }

    #[test]
    fn switch_selector_restarts_source_and_clears_overlay() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let overlay = overlay();
        let mut session = CameraSession::new(
            Box::new(Synthetic { total: 0, next: 0, starts: starts.clone() }),
            overlay.clone(),
        );
        let token = session.token();
        let before = token.current();
        session.start(Box::new(Recording { seen: Arc::default() })).unwrap();

        let mode = session.switch_selector().unwrap();
        assert_eq!(mode, CameraSelectorMode::Back);
        assert!(!overlay.geometry().mirrored);
        assert!(overlay.is_empty());
        assert!(token.current() > before);
        assert_eq!(
            *starts.lock(),
            vec![CameraSelectorMode::Front, CameraSelectorMode::Back]
        );
    }

    #[test]
    fn starting_twice_is_rejected() {
        let mut session = CameraSession::new(
            Box::new(Synthetic { total: 0, next: 0, starts: Arc::default() }),
            overlay(),
        );
        session.start(Box::new(Recording { seen: Arc::default() })).unwrap();
        assert!(session.start(Box::new(Recording { seen: Arc::default() })).is_err());
    }

    #[test]
    fn image_sequence_requires_start_and_finds_images() {
        let dir = std::env::temp_dir().join(format!("gaze-overlay-seq-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["b.png", "a.png"] {
            RgbFrame::new(6, 4).save(dir.join(name)).unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "skip me").unwrap();

        let mut source = ImageSequenceSource::from_dir(&dir).unwrap().with_rotation(90);
        assert_eq!(source.len(), 2);
        assert!(source.next_frame().is_err());

        source.start(CameraSelectorMode::Front).unwrap();
        let first = source.next_frame().unwrap().unwrap();
        assert_eq!((first.width(), first.height(), first.rotation_degrees, first.sequence), (6, 4, 90, 0));
        assert_eq!(source.next_frame().unwrap().unwrap().sequence, 1);
        assert!(source.next_frame().unwrap().is_none());

        let mut looping = ImageSequenceSource::from_dir(&dir).unwrap().looping(true);
        looping.start(CameraSelectorMode::Back).unwrap();
        for expected in 0..5 {
            assert_eq!(looping.next_frame().unwrap().unwrap().sequence, expected);
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = std::env::temp_dir().join(format!("gaze-overlay-empty-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        assert!(matches!(ImageSequenceSource::from_dir(&dir), Err(Error::Source(_))));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn frame_read_during_switch_keeps_old_generation() {
        let (entered_tx, entered) = std::sync::mpsc::channel();
        let (open, gate) = std::sync::mpsc::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut session = CameraSession::new(
            Box::new(Gated {
                entered: Some(entered_tx),
                gate: Some(gate),
                total: 2,
                next: 0,
            }),
            overlay(),
        );
        session.start(Box::new(Generations { seen: seen.clone() })).unwrap();

        // The producer is now inside its first read, holding the source.
        entered.recv().unwrap();
        let opener = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            open.send(()).unwrap();
        });
        session.switch_selector().unwrap();
        opener.join().unwrap();
        wait_until(|| session.is_drained());

        assert_eq!(session.token().current(), 1);
        assert_eq!(session.frames_produced(), 2);
        assert_eq!(session.frames_analyzed() + session.frames_dropped(), 2);
        // The first frame came from the old camera and says so.
        assert!(seen.lock().iter().all(|&(sequence, generation)| sequence != 0 || generation == 0));
    }
}
