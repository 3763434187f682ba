//! Error types for routerctl

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum RouterError {
    /// IO error
    Io(io::Error),
    /// Remote command execution failed
    CommandFailed { cmd: String, code: Option<i32>, stderr: String },
    /// Invalid parameter
    InvalidParameter(String),
    /// Daemon never logged its success marker within the startup window
    StartupTimeout(String),
    /// Daemon reported a failed interface initialization
    BadConfiguration(String),
    /// Daemon process exited while being polled for startup
    ProcessDied(String),
    /// No free capacity left (interfaces or local servers)
    ResourceExhausted(String),
    /// Operation requires a configured instance but none matched
    NotConfigured(String),
    /// Multiple instances present and no explicit index given
    AmbiguousInstance(String),
    /// Already exists
    AlreadyExists(String),
    /// Parse error
    ParseError(String),
    /// Service error (hostapd, wpa_supplicant, dnsmasq)
    ServiceError(String),
    /// Timeout
    Timeout(String),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::Io(e) => write!(f, "IO error: {}", e),
            RouterError::CommandFailed { cmd, code, stderr } => {
                if let Some(code) = code {
                    write!(f, "Command '{}' failed with code {}: {}", cmd, code, stderr)
                } else {
                    write!(f, "Command '{}' failed: {}", cmd, stderr)
                }
            }
            RouterError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            RouterError::StartupTimeout(msg) => write!(f, "Startup timed out: {}", msg),
            RouterError::BadConfiguration(msg) => write!(f, "Bad configuration: {}", msg),
            RouterError::ProcessDied(msg) => write!(f, "Process died: {}", msg),
            RouterError::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            RouterError::NotConfigured(msg) => write!(f, "Not configured: {}", msg),
            RouterError::AmbiguousInstance(msg) => write!(f, "Ambiguous instance: {}", msg),
            RouterError::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            RouterError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            RouterError::ServiceError(msg) => write!(f, "Service error: {}", msg),
            RouterError::Timeout(msg) => write!(f, "Timeout: {}", msg),
        }
    }
}

impl std::error::Error for RouterError {}

impl From<io::Error> for RouterError {
    fn from(error: io::Error) -> Self {
        RouterError::Io(error)
    }
}

pub type RouterResult<T> = Result<T, RouterError>;
