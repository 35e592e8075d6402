pub mod association;
pub mod config;
pub mod error;
pub mod flash;
pub mod flasher;
pub mod liveness;
pub mod orchestrator;
pub mod resolver;
pub mod transport;
pub mod version;

#[cfg(test)]
mod fakes;

pub use association::{wait_until_associated, Association, AssociationTimeout};
pub use config::{
    AssociationPolicy, DeviceConfig, LivenessConfig, NetworkConfig, TlsVerification, UpdateConfig,
};
pub use error::{ErrorKind, FlashError, ResolveError, TransportError, UpdateError};
pub use flash::{FlashSession, FlashWriter};
pub use flasher::{download_and_flash, FlashOptions, FlashReport};
pub use liveness::{Blinker, IndicatorPin, PinError};
pub use orchestrator::{BootUpdater, Restart, UpdateOutcome};
pub use resolver::resolve_latest_version;
pub use transport::{HttpConnection, OpenResponse, ResponseHead};
pub use version::{update_available, UpdateDecision, VersionToken};
