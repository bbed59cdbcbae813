pub mod credential;
pub mod environment;
pub mod error;
pub mod normalize;
pub mod process_engine;

pub use credential::ElevationCredential;
pub use environment::HostProbe;
pub use error::ExecError;
pub use normalize::{normalize, OutputNormalizer};
pub use process_engine::{ElevationConfig, ExecOutput, ProcessEngine, Shell};
