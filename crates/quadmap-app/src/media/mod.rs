pub mod decode_thread;
pub mod decoder;
pub mod registry;
pub mod source;
#[cfg(test)]
pub mod testing;
pub mod types;
pub mod video;

pub use decode_thread::DecodeThread;
pub use decoder::{FrameDecoder, FsMediaOpener, MediaOpener};
pub use registry::{MediaId, MediaRegistry};
pub use source::VideoSource;
pub use types::{Frame, MediaKind, SharedFrame};
