//! Error handling for servicekit
//!
//! The error system follows two rules:
//! 1. **Strongly-typed errors** for the failures callers need to recognise
//!    (missing executor, missing update source, directory conflicts, ...)
//! 2. **User-friendly messages** with actionable suggestions for the CLI
//!
//! Library functions return [`anyhow::Result`] and raise [`ServiceError`] values
//! where a caller may want to react to a specific failure. The typed error can
//! be recovered with `downcast_ref::<ServiceError>()`.
//!
//! # Error Categories
//!
//! - **Configuration**: [`ServiceError::NoExecutor`], [`ServiceError::NoUpdateSource`],
//!   [`ServiceError::InvalidPattern`], [`ServiceError::ConfigError`]
//! - **Transport**: [`ServiceError::DownloadFailed`], [`ServiceError::MissingContentLength`],
//!   [`ServiceError::IncompleteDownload`], [`ServiceError::ChecksumMismatch`]
//! - **Filesystem**: [`ServiceError::DirectoryConflict`], [`ServiceError::UnsafeEntry`],
//!   [`ServiceError::UpdateInProgress`]
//! - **External commands**: [`ServiceError::CommandFailed`], [`ServiceError::AlreadyInstalled`],
//!   [`ServiceError::NotInstalled`], [`ServiceError::PlatformNotSupported`]
//! - **Dispatch**: [`ServiceError::UnknownCommand`], [`ServiceError::ArityMismatch`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use servicekit::core::{ServiceError, user_friendly_error};
//!
//! let error = anyhow::Error::from(ServiceError::NoUpdateSource);
//! let context = user_friendly_error(error);
//! context.display(); // Shows colored error with suggestions
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for servicekit operations.
///
/// Each variant maps to one failure class of the supervisor. Variants carry
/// the path, URL or command involved so messages are useful without a
/// debugger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// `run` was called on a service without a work function.
    #[error("service execute is not defined")]
    NoExecutor,

    /// `update` was called without an update URL.
    #[error("no update url provided")]
    NoUpdateSource,

    /// An exclusion glob in the configuration does not parse.
    #[error("Invalid exclusion pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending glob
        pattern: String,
        /// Parser message
        reason: String,
    },

    /// Configuration file problems
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the problem
        message: String,
    },

    /// The download request failed or returned a non-success status.
    #[error("Failed to download update from {url}: {reason}")]
    DownloadFailed {
        /// Source URL
        url: String,
        /// Transport or HTTP status message
        reason: String,
    },

    /// The update response did not carry a usable `content-length` header.
    #[error("Update response from {url} has no valid content-length header")]
    MissingContentLength {
        /// Source URL
        url: String,
    },

    /// The payload stream ended before `content-length` bytes arrived.
    #[error("Incomplete download: expected {expected} bytes, received {received}")]
    IncompleteDownload {
        /// Advertised length
        expected: u64,
        /// Bytes actually read
        received: u64,
    },

    /// The payload digest does not match `update_sha256`.
    #[error("Checksum mismatch for update payload: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Configured digest
        expected: String,
        /// Computed digest
        actual: String,
    },

    /// The payload could not be unpacked.
    #[error("Invalid update archive: {reason}")]
    InvalidArchive {
        /// Decoder message
        reason: String,
    },

    /// An archive entry would escape the install root.
    #[error("Refusing to write archive entry outside the install root: {name}")]
    UnsafeEntry {
        /// The entry name as stored in the archive
        name: String,
    },

    /// A file occupies a path that the update wants to use as a directory.
    #[error("cannot create directory {path:?}: file exists")]
    DirectoryConflict {
        /// The conflicting path
        path: String,
    },

    /// Another update holds the installation lock.
    #[error("Another update of '{name}' is already in progress")]
    UpdateInProgress {
        /// Service name
        name: String,
    },

    /// A service-manager command exited unsuccessfully.
    #[error("run {command:?} failed: {stderr}")]
    CommandFailed {
        /// The full command line
        command: String,
        /// Captured error output
        stderr: String,
    },

    /// Install found an existing registration.
    #[error("Service {name} exists")]
    AlreadyInstalled {
        /// Unit file path or service name
        name: String,
    },

    /// Uninstall found no registration.
    #[error("service {name} is not installed")]
    NotInstalled {
        /// Service name
        name: String,
    },

    /// The service manager needed for the operation is unavailable.
    #[error("Operation not supported on this platform: {operation}")]
    PlatformNotSupported {
        /// The operation that was attempted
        operation: String,
    },

    /// The verb is not registered.
    #[error("unknown arguments: {args}")]
    UnknownCommand {
        /// The full argument line
        args: String,
        /// Closest registered verb, if any
        suggestion: Option<String>,
    },

    /// The verb was given the wrong number of arguments.
    #[error("{command} need {expected} arguments")]
    ArityMismatch {
        /// The verb
        command: String,
        /// Required argument count
        expected: usize,
    },

    /// Other error
    #[error("{message}")]
    Other {
        /// Generic error message
        message: String,
    },
}

/// Error wrapper that adds user-facing details and suggestions.
///
/// Displayed by the binary before it exits with a non-zero status.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: ServiceError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context without suggestions or details.
    #[must_use]
    pub const fn new(error: ServiceError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr: error in red, details in yellow, suggestion in green.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with suggestions.
///
/// Recognises [`ServiceError`] anywhere in the error chain, common
/// [`std::io::Error`] kinds, and falls back to printing the whole chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(service_error) = error.chain().find_map(|e| e.downcast_ref::<ServiceError>()) {
        let mut context = create_error_context(service_error.clone());
        // Keep the outer context lines visible, they usually name the file involved.
        if context.details.is_none() && error.chain().count() > 1 {
            context.details = Some(error.to_string());
        }
        return context;
    }

    if let Some(io_error) = error.chain().find_map(|e| e.downcast_ref::<std::io::Error>()) {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(ServiceError::Other {
                    message: error.to_string(),
                })
                .with_suggestion(
                    "Service management usually needs elevated permissions (sudo/Administrator)",
                )
                .with_details(io_error.to_string());
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(ServiceError::Other {
                    message: error.to_string(),
                })
                .with_suggestion("Check that the file or directory exists and the path is correct")
                .with_details(io_error.to_string());
            }
            _ => {}
        }
    }

    let mut message = error.to_string();
    let chain: Vec<String> =
        error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(ServiceError::Other {
        message,
    })
}

fn create_error_context(error: ServiceError) -> ErrorContext {
    match &error {
        ServiceError::NoExecutor => ErrorContext::new(error)
            .with_suggestion("Configure a work function with Service::exec before calling run"),
        ServiceError::NoUpdateSource => ErrorContext::new(error)
            .with_suggestion("Set options.update_url in the service configuration"),
        ServiceError::InvalidPattern { .. } => ErrorContext::new(error)
            .with_suggestion("Fix the glob in options.exclude_files (e.g. \"*.log\", \"conf/*\")"),
        ServiceError::MissingContentLength { .. } => ErrorContext::new(error)
            .with_details("Updates need the payload size up front to track progress")
            .with_suggestion("Serve the update file without chunked transfer encoding"),
        ServiceError::DownloadFailed { .. } | ServiceError::IncompleteDownload { .. } => {
            ErrorContext::new(error)
                .with_details("No installed files were modified")
                .with_suggestion("Check the update URL and your network connection, then retry")
        }
        ServiceError::ChecksumMismatch { .. } => ErrorContext::new(error)
            .with_details("No installed files were modified")
            .with_suggestion("Verify options.update_sha256 matches the published payload"),
        ServiceError::DirectoryConflict { .. } => ErrorContext::new(error)
            .with_details("Files written before the conflict were kept")
            .with_suggestion("Remove the conflicting file or list it in options.remove_before_update"),
        ServiceError::UpdateInProgress { .. } => ErrorContext::new(error)
            .with_suggestion("Wait for the running update to finish"),
        ServiceError::CommandFailed { .. } => ErrorContext::new(error).with_suggestion(
            "Run the command manually for more output, it may require elevated permissions",
        ),
        ServiceError::AlreadyInstalled { .. } => ErrorContext::new(error)
            .with_suggestion("Uninstall the existing service first"),
        ServiceError::UnknownCommand { suggestion, .. } => {
            let hint = suggestion.as_ref().map(|s| format!("Did you mean '{s}'?"));
            let context = ErrorContext::new(error.clone());
            match hint {
                Some(hint) => context.with_suggestion(hint),
                None => context,
            }
        }
        _ => ErrorContext::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_messages_match_cli_wording() {
        assert_eq!(ServiceError::NoExecutor.to_string(), "service execute is not defined");
        assert_eq!(ServiceError::NoUpdateSource.to_string(), "no update url provided");
        assert_eq!(
            ServiceError::ArityMismatch {
                command: "test".to_string(),
                expected: 2
            }
            .to_string(),
            "test need 2 arguments"
        );
        assert_eq!(
            ServiceError::DirectoryConflict {
                path: "/opt/app/web".to_string()
            }
            .to_string(),
            "cannot create directory \"/opt/app/web\": file exists"
        );
    }

    #[test]
    fn test_user_friendly_error_finds_typed_error_in_chain() {
        let error = Err::<(), _>(ServiceError::NoUpdateSource)
            .context("Failed to update service")
            .unwrap_err();

        let context = user_friendly_error(error);
        assert_eq!(context.error, ServiceError::NoUpdateSource);
        assert!(context.suggestion.unwrap().contains("update_url"));
        assert_eq!(context.details.as_deref(), Some("Failed to update service"));
    }

    #[test]
    fn test_stop_failure_keeps_outer_context() {
        let error = Err::<(), _>(ServiceError::CommandFailed {
            command: "systemctl stop app".to_string(),
            stderr: "exit status 5".to_string(),
        })
        .context("Failed to stop 'app'")
        .unwrap_err();

        let context = user_friendly_error(error);
        assert!(matches!(context.error, ServiceError::CommandFailed { .. }));
        assert_eq!(context.details.as_deref(), Some("Failed to stop 'app'"));
        assert!(context.to_string().contains("Details: Failed to stop 'app'"));
    }

    #[test]
    fn test_bare_typed_error_has_no_outer_details() {
        let context = user_friendly_error(ServiceError::NoUpdateSource.into());
        assert_eq!(context.error, ServiceError::NoUpdateSource);
        assert_eq!(context.details, None);
    }

    #[test]
    fn test_unknown_command_suggestion() {
        let error = anyhow::Error::from(ServiceError::UnknownCommand {
            args: "restar".to_string(),
            suggestion: Some("restart".to_string()),
        });
        let context = user_friendly_error(error);
        assert_eq!(context.suggestion.as_deref(), Some("Did you mean 'restart'?"));
    }

    #[test]
    fn test_generic_error_includes_chain() {
        let error = anyhow::anyhow!("root cause").context("outer");
        let context = user_friendly_error(error);
        let rendered = context.to_string();
        assert!(rendered.contains("outer"));
        assert!(rendered.contains("Caused by:"));
        assert!(rendered.contains("root cause"));
    }
}
