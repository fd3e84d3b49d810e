pub mod fixed;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use fixed::{Candidate, FixedOutputRuntime};

#[cfg(feature = "backend-tract")]
pub use tract::TractRuntime;
