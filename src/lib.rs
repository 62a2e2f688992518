pub mod analyzer;
pub mod config;
pub mod evaluate;
pub mod recording;

/// Recording file extensions we support
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv"];

/// Prefix of clinical annotation files stored next to a recording
pub const ANNOTATION_PREFIX: &str = "Notas_";

/// Application name for XDG paths
pub const APP_NAME: &str = "motiometrics";
