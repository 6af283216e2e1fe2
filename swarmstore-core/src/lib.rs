pub mod config;
pub mod diagnostics;
pub mod error;
pub mod manifest;
pub mod oracle;
pub mod pack;
pub mod path_safety;
mod posio;
pub mod slice;
pub mod store;

pub use config::{ReserveMode, StoreConfig};
pub use error::{Result, StorageError};
pub use store::{ContentStore, LayoutReport, LayoutState};
