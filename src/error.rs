//! Error types for comm-check
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for comm-check operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Connection errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,
    ConnectionLost = 303,

    // Protocol errors (4xx)
    ProtocolMalformed = 401,
    ProtocolUnexpected = 402,
    PeerMismatch = 403,

    // Collective operation errors (5xx)
    CollectiveFailed = 500,
    CollectiveTimeout = 501,

    // Environment errors (6xx)
    InterfaceMissing = 600,
    IpUnresolved = 601,
    RankInvalid = 602,

    // GPU errors (7xx)
    GpuUnavailable = 700,
    GpuProbeFailed = 701,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // IO errors
            300..=399 => 30, // Connection errors
            400..=499 => 40, // Protocol errors
            500..=599 => 50, // Collective errors
            600..=699 => 60, // Environment errors
            700..=799 => 70, // GPU errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for comm-check
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────

    /// Connection to the peer failed
    #[error("Failed to connect to {addr}: {message}")]
    ConnectionFailed { addr: String, message: String },

    /// Connection setup exceeded the init timeout
    #[error("Connection to {addr} timed out after {timeout_secs}s")]
    ConnectionTimeout { addr: String, timeout_secs: u64 },

    /// Peer closed the connection mid-run
    #[error("Lost connection to peer: {message}")]
    ConnectionLost { message: String },

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// Frame could not be decoded
    #[error("Malformed frame: {message}")]
    ProtocolMalformed { message: String },

    /// Frame exceeds the wire size limit
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: u32, max: u32 },

    /// Received a frame that does not fit the current operation
    #[error("Unexpected frame: expected {expected}, got {got}")]
    ProtocolUnexpected { expected: String, got: String },

    /// Handshake disagreed on rank or world size
    #[error("Peer mismatch: {message}")]
    PeerMismatch { message: String },

    /// JSON encode/decode error on the wire
    #[error("Frame encoding error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Collective Operation Errors
    // ─────────────────────────────────────────────────────────────

    /// A collective call against the peer failed
    #[error("{operation} with rank {rank} failed: {reason}")]
    CollectiveFailed {
        operation: &'static str,
        rank: u32,
        reason: String,
    },

    /// A collective call exceeded the operation timeout
    #[error("{operation} timed out after {timeout_secs}s")]
    CollectiveTimeout {
        operation: &'static str,
        timeout_secs: u64,
    },

    // ─────────────────────────────────────────────────────────────
    // Environment Errors
    // ─────────────────────────────────────────────────────────────

    /// Expected network interface is absent
    #[error("Network interface not found: {name}")]
    InterfaceMissing { name: String },

    /// Local IP address could not be determined
    #[error("Could not determine local IP address: {message}")]
    IpUnresolved { message: String },

    /// Rank argument or derivation out of range
    #[error("Invalid rank: {message}")]
    RankInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // GPU Errors
    // ─────────────────────────────────────────────────────────────

    /// GPU runtime required but not usable
    #[error("GPU unavailable: {message}")]
    GpuUnavailable { message: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::ConnectionLost { .. } => ErrorCode::ConnectionLost,

            Error::ProtocolMalformed { .. } => ErrorCode::ProtocolMalformed,
            Error::FrameTooLarge { .. } => ErrorCode::ProtocolMalformed,
            Error::ProtocolUnexpected { .. } => ErrorCode::ProtocolUnexpected,
            Error::PeerMismatch { .. } => ErrorCode::PeerMismatch,
            Error::Json(_) => ErrorCode::ProtocolMalformed,

            Error::CollectiveFailed { .. } => ErrorCode::CollectiveFailed,
            Error::CollectiveTimeout { .. } => ErrorCode::CollectiveTimeout,

            Error::InterfaceMissing { .. } => ErrorCode::InterfaceMissing,
            Error::IpUnresolved { .. } => ErrorCode::IpUnresolved,
            Error::RankInvalid { .. } => ErrorCode::RankInvalid,

            Error::GpuUnavailable { .. } => ErrorCode::GpuUnavailable,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'comm-check config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'comm-check config validate' to see details."
            ),
            Error::Config(_) => Some(
                "Review the configuration file and fix the invalid values."
            ),

            Error::ConnectionFailed { .. } => Some(
                "Verify the master address and port, and that the peer node is reachable over the configured interface."
            ),
            Error::ConnectionTimeout { .. } => Some(
                "Start rank 0 first so it is listening, then start rank 1. Check firewall rules on the master port."
            ),
            Error::ConnectionLost { .. } => Some(
                "The peer process exited or the link dropped. Re-run the test on both nodes."
            ),

            Error::PeerMismatch { .. } => Some(
                "Both nodes must use the same configuration, with rank 0 on the master node and rank 1 on the other."
            ),
            Error::ProtocolUnexpected { .. } => Some(
                "The two nodes are out of step. Make sure both run the same comm-check version and command."
            ),

            Error::CollectiveTimeout { .. } => Some(
                "The peer may be stuck or unreachable. Run 'comm-check check' on both nodes and retry."
            ),

            Error::InterfaceMissing { .. } => Some(
                "Run 'comm-check check' to list available interfaces, then set cluster.interface in the config."
            ),
            Error::IpUnresolved { .. } => Some(
                "Ensure the node has an address on the cluster subnet, or pass an explicit rank with 'comm-check test <rank>'."
            ),
            Error::RankInvalid { .. } => Some(
                "Rank must be 0 (master node) or 1 (peer node)."
            ),

            Error::GpuUnavailable { .. } => Some(
                "Check that the NVIDIA driver is installed and loaded (nvidia-smi should work)."
            ),

            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let code = self.code();
        let suggestion = self.suggestion();

        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", code.as_str(), self);

        if let Some(hint) = suggestion {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}
