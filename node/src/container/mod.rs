pub mod dante;
pub mod runtime;
pub mod wireguard;

pub use dante::DanteDriver;
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use wireguard::{RotatedKeys, RotationOutcome, WireGuardDriver};
