pub mod scheduler;
pub mod types;

pub use scheduler::{DEFAULT_IMAGE_DURATION, PlaybackScheduler};
pub use types::{ContinuousSet, PlaybackMode, PlaylistStep};
