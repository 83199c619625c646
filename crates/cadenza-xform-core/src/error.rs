use thiserror::Error;

/// Failure reported by a plugin callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// The callback is not implemented by this plugin.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    /// The plugin rejected its input data or stream type.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Reading from or seeking the underlying resource failed.
    #[error("io failed: {0}")]
    Io(String),
    /// Any other plugin-specific failure.
    #[error("plugin failure: {0}")]
    Failed(String),
}

impl PluginError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }
}

impl From<String> for PluginError {
    fn from(value: String) -> Self {
        Self::Failed(value)
    }
}

impl From<std::io::Error> for PluginError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}
