pub mod domain;
pub mod postgres;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockCredentialRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDeviceProvisioner;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDownstreamPublisher;
