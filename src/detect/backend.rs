use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::detect::result::{Detection, ObjectClass};
use crate::frame::Frame;

/// Backend handle shared between pipelines.
///
/// `DetectorBackend::infer` takes `&mut self`, so shared backends sit behind a
/// `Mutex`.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Wrap a backend for sharing.
pub fn share<B: DetectorBackend + 'static>(backend: B) -> SharedBackend {
    Arc::new(Mutex::new(backend))
}

/// Detector backend trait.
///
/// A backend owns its model handle for its whole lifetime: construction loads
/// the model, drop releases it. There is no process-wide model state.
///
/// Calls are synchronous and one at a time; the pipelines never pipeline
/// inference.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend can report objects of `class`.
    fn supports(&self, class: ObjectClass) -> bool;

    /// Run detection on a frame.
    ///
    /// Detections come back unordered; track ids are best-effort and may be
    /// absent or reassigned after occlusion.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn supports(&self, class: ObjectClass) -> bool {
        (**self).supports(class)
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).infer(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
