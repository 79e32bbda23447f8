// Config loader and validator
//
// Loads chatrelay.yaml, resolves `${VAR}` interpolation, applies defaults,
// validates ranges, decides whether retrieval augmentation is enabled, and
// computes a deterministic config hash for logging.

mod defaults;
mod error;
mod interpolation;
mod loader;
mod raw;
mod source;
mod types;

pub use defaults::*;
pub use error::ConfigError;
pub use interpolation::resolve_variables;
pub use loader::{compute_hash, load_config};
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::*;
