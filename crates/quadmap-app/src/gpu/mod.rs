pub mod compositor;
pub mod context;
pub mod plan;
pub mod quad;

pub use compositor::QuadCompositor;
pub use context::GpuContext;
pub use plan::{DrawItem, OutputKind, OverlayFlags, plan};
pub use quad::viewport_to_canvas;
