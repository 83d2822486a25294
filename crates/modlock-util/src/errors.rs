use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for modlock operations.
///
/// Lower layers return their own typed errors; this is what they collapse into
/// once they reach the operations layer.
#[derive(Debug, Error, Diagnostic)]
pub enum ModlockError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed version or range text in package metadata.
    #[error("Parse error: {message}")]
    #[diagnostic(help("Check the version and constraint strings in the package metadata"))]
    Parse { message: String },

    /// The dependency graph could not be built.
    #[error("Dependency graph error: {message}")]
    Graph { message: String },

    /// Resolution ended in a conflict (unsatisfiable, incompatible, cycle, timeout...).
    #[error("Dependency resolution failed: {message}")]
    Resolution { message: String },

    /// Lockfile missing, stale, or unreadable.
    #[error("Lockfile error: {message}")]
    Lockfile { message: String },

    /// Metadata source failed to deliver package releases.
    #[error("Metadata error: {message}")]
    Metadata { message: String },

    /// Invalid user configuration.
    #[error("Configuration error: {message}")]
    #[diagnostic(help("Check ~/.modlock/config.toml and MODLOCK_* environment variables"))]
    Config { message: String },

    /// Catch-all for miscellaneous errors.
    #[error("{message}")]
    Generic { message: String },
}

/// Convenience alias for `miette::Result<T>`.
pub type ModlockResult<T> = miette::Result<T>;
