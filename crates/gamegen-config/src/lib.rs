//! Configuration for the game generation pipeline.
//!
//! Settings come from built-in defaults, an optional KDL file and finally
//! environment variables, in that order.

pub mod error;
pub mod providers;
pub mod scheduler;

pub use error::{ConfigError, ConfigResult};
pub use providers::{ProviderConfig, ProviderCredentials};
pub use scheduler::{RepairPolicy, SchedulerConfig, TimeoutPolicy};
