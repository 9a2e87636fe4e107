//! Collaborator services consumed around submission.
//!
//! - preferences.rs: default fee tier and network, swapped on config reload
//! - names.rs: name → address resolution for callers building requests

pub mod names;
pub mod preferences;

pub use names::{NameService, StaticNameService};
pub use preferences::PreferenceService;
