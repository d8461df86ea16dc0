pub mod config;
pub mod constants;
pub mod error;
pub mod intake;
pub mod integrator;
pub mod liveness;
pub mod model;
pub mod publisher;
pub mod supervisor;
pub mod transport;
pub mod wire;

pub use config::{CliOverrides, CoreConfig};
pub use error::{ConfigError, ProtocolError, TransportError};
pub use intake::{CommandIntake, IntakeOutcome, IntakeStats};
pub use integrator::VehicleIntegrator;
pub use liveness::{LivenessStats, LivenessSupervisor};
pub use model::{
    ControlSnapshot, LivenessState, Pose, SessionPhase, SessionState, Velocity, VehicleSnapshot,
    VehicleState,
};
pub use publisher::{PublisherStats, StatePublisher};
pub use supervisor::Supervisor;
pub use transport::{DataChannelTransport, TransportConnector, TransportSession};
