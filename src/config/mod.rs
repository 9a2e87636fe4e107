//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → OrchestratorConfig (validated, immutable)
//!     → shared to subsystems at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → preferences swapped atomically (services::preferences)
//! ```
//!
//! # Design Decisions
//! - Only preferences are hot reloaded; networks and keys need a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AccountConfig, AdminConfig, FeeConfig, GatewayKind, LogFormat, NameConfig, NetworkConfig,
    ObservabilityConfig, OrchestratorConfig, PreferencesConfig, RetryConfig, SignerConfig,
    StoreConfig, TierConfig, TrackerConfig,
};
