pub mod cluster;
pub mod docker;
pub mod driver;
pub mod error;
pub mod stub;

pub use cluster::{ClusterDriver, ClusterDriverConfig};
pub use docker::DockerDriver;
pub use driver::{
    ContainerSpec, ContainerStatus, ContainerSummary, Driver, VolumeMount, VolumeSpec,
    LABEL_INSTANCE, LABEL_MANAGED, LABEL_OWNER, LABEL_ROLE, LABEL_SANDBOX, LABEL_SESSION,
};
pub use error::DriverError;
pub use stub::StubDriver;
