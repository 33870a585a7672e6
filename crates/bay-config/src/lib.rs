pub mod catalog;
pub mod error;
pub mod raw;
pub mod settings;

pub use catalog::ProfileCatalog;
pub use error::ConfigError;
pub use settings::{
    AuthSettings, BaySettings, ClusterSettings, DatabaseSettings, DefaultSettings,
    DriverBackend, DriverSettings, GcSettings, RuntimeSettings,
};
