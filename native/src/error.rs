use thiserror::Error;

/// Errors raised by pipe enumeration and the watcher.
#[derive(Error, Debug)]
pub enum PipeError {
    #[error("Pipe namespace of host '{host}' unavailable (code {code}): {message}")]
    NamespaceUnavailable {
        host: String,
        code: i32,
        message: String,
    },
    #[error("Security query failed for {path} (code {code})")]
    SecurityQuery { path: String, code: u32 },
    #[error("Malformed directory entry at offset {offset}: {reason}")]
    MalformedBuffer { offset: usize, reason: &'static str },
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Pipe watcher has been disposed")]
    Disposed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipeError {
    /// Namespace failure for a platform without a pipe namespace.
    pub fn unsupported(host: &str) -> Self {
        PipeError::NamespaceUnavailable {
            host: host.to_string(),
            code: -1,
            message: "named pipe namespace is only available on Windows".to_string(),
        }
    }

    /// Whether this failure only affects the current tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipeError::NamespaceUnavailable { .. } | PipeError::MalformedBuffer { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PipeError>;
