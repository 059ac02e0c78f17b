//! Configuration loading, validation and env substitution.
//!
//! Config files: `modsmith.toml`, `modsmith.yaml`, or `modsmith.json`
//! Searched in `./` then the user config dir (`~/.config/modsmith/` on Linux).
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config, parse_config},
    schema::{
        CatalogConfig, EngineConfig, LedgerBackend, LedgerConfig, ModsmithConfig, RunMode,
        TargetConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
