//! Detection adapters.
//!
//! Every backend implements [`DetectorBackend`] and yields [`BoundingBox`]es in
//! frame pixel coordinates. The crossing tracker never looks at pixels.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{CpuBackend, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::BackendRegistry;
pub use result::{non_max_suppression, BoundingBox};
