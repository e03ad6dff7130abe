pub mod snapshot;
pub mod store;

pub use snapshot::{ProjectSnapshot, RestoreReport};
pub use store::ProjectStore;
