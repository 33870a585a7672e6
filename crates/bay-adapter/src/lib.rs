pub mod browser;
pub mod error;
pub mod pool;
pub mod ship;
pub mod wire;

pub use browser::BrowserAdapter;
pub use error::AdapterError;
pub use pool::AdapterPool;
pub use ship::ShipAdapter;
pub use wire::{
    validate_meta, BrowserBatchOutcome, BrowserStep, ExecOutcome, FsEntry, RuntimeMeta,
    SUPPORTED_API_MAJOR,
};
