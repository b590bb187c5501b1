mod backend;
pub mod backends;
mod result;
pub mod tracker;

pub use backend::{share, DetectorBackend, SharedBackend};
pub use backends::ReplayBackend;
pub use result::{Detection, ObjectClass};
pub use tracker::IouTracker;
