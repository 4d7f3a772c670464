//! Detection passes: background detection, serialized display updates.
//!
//! A [`Coordinator`] is owned by one task, which is the only place the display
//! is written from. Each pick starts a new pass with a fresh [`PassId`];
//! detection runs on the blocking pool and its completion is posted back
//! tagged with that id. Completions for anything but the current pass are
//! dropped, so a slow detector can never paint boxes from an older picture
//! over a newer one.

use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};

use facemark_vision::{annotate, normalize, FaceDetector, NormalizedBox, VisionError};

use crate::display::DisplaySink;
use crate::picker::PickedImage;

pub type PassId = u64;

/// How a detection pass finished on the worker side.
#[derive(Debug)]
pub enum Completion {
    Detected(Vec<NormalizedBox>),
    Failed(VisionError),
    TimedOut,
}

#[derive(Debug)]
pub struct PassCompletion {
    pub pass: PassId,
    pub completion: Completion,
}

/// What applying a completion did to the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Displayed { pass: PassId, faces: usize },
    Stale { pass: PassId, current: PassId },
    DetectionFailed { pass: PassId },
    RenderingFailed { pass: PassId },
    TimedOut { pass: PassId },
}

pub struct Coordinator<S> {
    detector: Arc<dyn FaceDetector>,
    display: S,
    timeout: Duration,
    current: PassId,
    /// Upright picture of the current pass, the canvas for its overlay.
    base: Option<DynamicImage>,
    in_flight: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<PassCompletion>,
    rx: mpsc::UnboundedReceiver<PassCompletion>,
}

impl<S: DisplaySink> Coordinator<S> {
    pub fn new(detector: Arc<dyn FaceDetector>, display: S, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            detector,
            display,
            timeout,
            current: 0,
            base: None,
            in_flight: None,
            tx,
            rx,
        }
    }

    pub fn current_pass(&self) -> PassId {
        self.current
    }

    pub fn display(&self) -> &S {
        &self.display
    }

    pub fn into_display(self) -> S {
        self.display
    }

    /// Whether the current pass still awaits its detection result.
    pub fn is_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Start a pass for `picked`, superseding any pass still in flight.
    ///
    /// Must be called from within a tokio runtime. An unrecognized
    /// orientation or an empty picture aborts the submission and leaves
    /// everything, including the display, as it was.
    pub fn submit(&mut self, picked: PickedImage) -> Result<PassId, VisionError> {
        let orientation = normalize(picked.orientation_tag).map_err(|e| {
            warn!("Not submitting {:?} pick: {}", picked.source, e);
            e
        })?;

        // An empty picture can never be annotated; keep showing what we have.
        let (width, height) = (picked.image.width(), picked.image.height());
        if width == 0 || height == 0 {
            let e = VisionError::RenderingFailure(format!(
                "cannot display a {}x{} picture",
                width, height
            ));
            warn!("Not submitting {:?} pick: {}", picked.source, e);
            return Err(e);
        }

        if let Some(previous) = self.in_flight.take() {
            previous.abort();
            debug!("pass {} superseded", self.current);
        }
        self.current += 1;
        let pass = self.current;

        // New pick replaces any overlay still on screen. This is the only
        // full-size rotation; the detector rotates a model-sized copy.
        let upright = orientation.apply(picked.image.clone());
        if let Err(e) = self.display.set_displayed_image(&upright) {
            warn!("pass {}: could not display picked image: {:#}", pass, e);
        }
        self.base = Some(upright);

        let detector = Arc::clone(&self.detector);
        let tx = self.tx.clone();
        let timeout = self.timeout;
        let raw = picked.image;
        self.in_flight = Some(tokio::spawn(async move {
            let job = task::spawn_blocking(move || detector.detect_faces(&raw, orientation));
            let completion = match tokio::time::timeout(timeout, job).await {
                Ok(Ok(Ok(boxes))) => Completion::Detected(boxes),
                Ok(Ok(Err(e))) => Completion::Failed(e),
                Ok(Err(e)) => Completion::Failed(VisionError::DetectionFailure(format!(
                    "detector worker died: {}",
                    e
                ))),
                Err(_) => Completion::TimedOut,
            };
            // Receiver lives as long as the coordinator.
            let _ = tx.send(PassCompletion { pass, completion });
        }));

        info!("pass {}: detecting faces ({:?})", pass, orientation);
        Ok(pass)
    }

    /// Wait for the next completion posted by any pass.
    pub async fn next_completion(&mut self) -> Option<PassCompletion> {
        self.rx.recv().await
    }

    /// Apply a completion to the display if it belongs to the current pass.
    pub fn apply(&mut self, done: PassCompletion) -> PassOutcome {
        let pass = done.pass;
        if pass != self.current {
            debug!("dropping result of stale pass {} (current {})", pass, self.current);
            return PassOutcome::Stale {
                pass,
                current: self.current,
            };
        }
        self.in_flight = None;

        match done.completion {
            Completion::Detected(boxes) => {
                info!("Detected {} faces", boxes.len());
                self.render(pass, &boxes)
            }
            Completion::Failed(e) => {
                warn!("Failed to perform detection: {}", e);
                PassOutcome::DetectionFailed { pass }
            }
            Completion::TimedOut => {
                warn!("pass {}: detector gave no answer within {:?}", pass, self.timeout);
                PassOutcome::TimedOut { pass }
            }
        }
    }

    fn render(&mut self, pass: PassId, boxes: &[NormalizedBox]) -> PassOutcome {
        let annotated = match &self.base {
            Some(base) => annotate(base, boxes),
            None => Err(VisionError::RenderingFailure("no picture to annotate".to_string())),
        };
        let annotated = match annotated {
            Ok(img) => img,
            Err(e) => {
                warn!("pass {}: {}", pass, e);
                return PassOutcome::RenderingFailed { pass };
            }
        };
        match self.display.set_displayed_image(&annotated) {
            Ok(()) => PassOutcome::Displayed {
                pass,
                faces: boxes.len(),
            },
            Err(e) => {
                warn!("pass {}: could not display overlay: {:#}", pass, e);
                PassOutcome::RenderingFailed { pass }
            }
        }
    }

    /// Drive the current pass to its outcome. `None` if nothing is pending.
    pub async fn settle(&mut self) -> Option<PassOutcome> {
        while self.in_flight.is_some() {
            let done = self.next_completion().await?;
            match self.apply(done) {
                PassOutcome::Stale { .. } => continue,
                outcome => return Some(outcome),
            }
        }
        None
    }

    /// Serve picks until the channel closes and the last pass has settled.
    /// Returns the display sink.
    pub async fn run(mut self, mut picks: mpsc::Receiver<PickedImage>) -> S {
        let mut accepting = true;
        while accepting || self.in_flight.is_some() {
            tokio::select! {
                pick = picks.recv(), if accepting => match pick {
                    Some(picked) => {
                        // failures are logged by submit
                        let _ = self.submit(picked);
                    }
                    None => accepting = false,
                },
                done = self.rx.recv(), if self.in_flight.is_some() => {
                    if let Some(done) = done {
                        let outcome = self.apply(done);
                        debug!("{:?}", outcome);
                    }
                }
            }
        }
        self.display
    }
}
