//! Per-frame analysis: detector in, overlay items and gaze status out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::detector::{DetectionMode, LandmarkDetector};
use crate::error::Error;
use crate::gaze::{estimate_gaze, GazeStatus};
use crate::gaze_state::GazeWriter;
use crate::overlay::{BoxStyle, FaceBoxGraphic, OverlayStore};
use crate::types::{DetectedFace, Frame, ScreenSize};

/// Consumes frames delivered by the camera session's worker thread.
pub trait Analyzer: Send {
    fn name(&self) -> String;
    fn analyze(&mut self, frame: Frame) -> FrameReport;
}

/// Generation counter shared between a camera session and its analyzer.
/// Bumping it invalidates every detection still in flight.
#[derive(Debug, Clone, Default)]
pub struct SessionToken {
    generation: Arc<AtomicU64>,
}

impl SessionToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerState {
    Idle,
    Detecting,
}

/// What one call to [`Analyzer::analyze`] did.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameReport {
    pub sequence: u64,
    /// Boxes placed on the overlay, `None` when the box pass failed.
    pub boxes: Option<usize>,
    /// Last status published for this frame, if any.
    pub status: Option<GazeStatus>,
    /// The session changed while detecting; nothing was applied.
    pub stale: bool,
}

pub struct FaceAnalyzer<D> {
    detector: D,
    overlay: Arc<OverlayStore>,
    gaze: GazeWriter,
    screen: ScreenSize,
    style: BoxStyle,
    session: SessionToken,
    state: AnalyzerState,
}

impl<D: LandmarkDetector> FaceAnalyzer<D> {
    pub fn new(detector: D, overlay: Arc<OverlayStore>, gaze: GazeWriter, screen: ScreenSize) -> Self {
        Self {
            detector,
            overlay,
            gaze,
            screen,
            style: BoxStyle::default(),
            session: SessionToken::new(),
            state: AnalyzerState::Idle,
        }
    }

    pub fn with_style(mut self, style: BoxStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_session(mut self, session: SessionToken) -> Self {
        self.session = session;
        self
    }

    pub fn state(&self) -> AnalyzerState {
        self.state
    }

    pub fn session(&self) -> &SessionToken {
        &self.session
    }

    /// Landmark pass result. One status per face, in detector order; an
    /// empty list publishes nothing and leaves the previous label in place.
    fn on_landmarks(&self, faces: &[DetectedFace]) -> Option<GazeStatus> {
        let orientation = self.overlay.geometry().orientation;
        let mut last = None;
        for face in faces {
            let status = match face.eyes() {
                Some((left, right)) => {
                    debug!(?left, ?right, "eye landmarks");
                    GazeStatus::from_estimate(estimate_gaze(left, right, orientation, self.screen))
                }
                None => GazeStatus::NoEyeDetected,
            };
            match status {
                GazeStatus::Point(_) => debug!("{status}"),
                _ => warn!("{status}"),
            }
            self.gaze.publish(status);
            last = Some(status);
        }
        last
    }

    /// Box pass result: the overlay is rebuilt from scratch for every frame.
    fn on_boxes(&self, faces: &[DetectedFace], frame: &Frame) -> usize {
        self.overlay.clear();
        for face in faces {
            self.overlay.add(Box::new(FaceBoxGraphic::new(
                face.bounding_box,
                frame.width(),
                frame.height(),
                self.style,
            )));
        }
        self.overlay.post_invalidate();
        faces.len()
    }

    fn on_failure(&self, status: GazeStatus, err: &Error) -> GazeStatus {
        warn!("Face Detector failed: {err}");
        self.gaze.publish(status);
        status
    }

    fn run(&mut self, frame: &Frame, generation: u64) -> FrameReport {
        let mut report = FrameReport {
            sequence: frame.sequence,
            ..Default::default()
        };

        // Captured before a selector switch: never run the detector on it.
        if !self.session.is_current(generation) {
            report.stale = true;
            return report;
        }

        let landmarks = self.detector.detect(frame, DetectionMode::Landmarks);
        if !self.session.is_current(generation) {
            report.stale = true;
            return report;
        }
        report.status = match landmarks {
            Ok(faces) => self.on_landmarks(&faces),
            Err(err) => Some(self.on_failure(GazeStatus::NoFaceOrMultiple, &err)),
        };

        let boxes = self.detector.detect(frame, DetectionMode::Boxes);
        if !self.session.is_current(generation) {
            report.stale = true;
            return report;
        }
        match boxes {
            Ok(faces) => report.boxes = Some(self.on_boxes(&faces, frame)),
            Err(err) => report.status = Some(self.on_failure(GazeStatus::DetectorFailed, &err)),
        }
        report
    }
}

impl<D: LandmarkDetector> Analyzer for FaceAnalyzer<D> {
    fn name(&self) -> String {
        format!("Face boxes + eye gaze [{}]", self.detector.name())
    }

    fn analyze(&mut self, frame: Frame) -> FrameReport {
        let generation = frame.generation;
        self.state = AnalyzerState::Detecting;
        let report = self.run(&frame, generation);
        self.state = AnalyzerState::Idle;
        if report.stale {
            debug!(sequence = frame.sequence, "session changed during detection, result dropped");
        }
        report
    }
}
