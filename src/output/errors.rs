// Human-readable error messages for volley

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use colored::*;

/// Initialize color output based on TTY detection and NO_COLOR environment variable
fn should_use_colors() -> bool {
    // Check NO_COLOR environment variable first (https://no-color.org/)
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    // Errors are written to stderr
    std::io::stderr().is_terminal()
}

/// Classification of a per-host connection failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectKind {
    /// Address resolution or TCP connect failed
    Tcp,
    /// SSH protocol handshake failed
    Handshake,
    /// Host key was rejected or missing from known_hosts
    HostKey,
    /// All configured authentication methods failed
    Auth,
}

impl fmt::Display for ConnectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectKind::Tcp => "ConnectionError",
            ConnectKind::Handshake => "HandshakeError",
            ConnectKind::HostKey => "HostKeyError",
            ConnectKind::Auth => "AuthenticationError",
        };
        f.write_str(name)
    }
}

/// All error types in volley
#[derive(Debug)]
pub enum VolleyError {
    /// Invalid configuration (bad batch size, malformed settings)
    Config {
        message: String,
        suggestion: Option<String>,
    },

    /// The selection resolved to zero hosts; nothing to do
    NoHosts,

    /// Per-host connection failure (recovered locally, siblings unaffected)
    Connection {
        host: String,
        kind: ConnectKind,
        message: String,
        suggestion: Option<String>,
    },

    /// The remote side refused to execute the command on one host
    ExecRejected { host: String, message: String },

    /// A remote command exited non-zero while stop-on-failure was active
    RemoteFailure { host: String, exit_code: i32 },

    /// Inventory resolution errors
    Inventory {
        message: String,
        suggestion: Option<String>,
    },

    /// I/O errors
    Io {
        message: String,
        path: Option<PathBuf>,
    },
}

impl VolleyError {
    /// Process exit code for a fatal occurrence of this error
    pub fn exit_code(&self) -> i32 {
        match self {
            VolleyError::NoHosts => 10,
            _ => 1,
        }
    }
}

impl std::error::Error for VolleyError {}

impl fmt::Display for VolleyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Set color mode based on TTY detection and NO_COLOR
        if !should_use_colors() {
            colored::control::set_override(false);
        }

        match self {
            VolleyError::Config {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "CONFIG ERROR".red().bold(), message)?;
                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }
                Ok(())
            }

            VolleyError::NoHosts => {
                writeln!(
                    f,
                    "{}: No hosts returned from search!",
                    "FATAL".red().bold()
                )
            }

            VolleyError::Connection {
                host,
                kind,
                message,
                suggestion,
            } => {
                writeln!(
                    f,
                    "{}: Failed to connect to {} -- {}: {}",
                    "SSH ERROR".red().bold(),
                    host,
                    kind,
                    message
                )?;
                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }
                Ok(())
            }

            VolleyError::ExecRejected { host, message } => {
                writeln!(f, "{}: {}", "EXEC REJECTED".red().bold(), message)?;
                writeln!(f, "  {} {}", "Host:".dimmed(), host)?;
                Ok(())
            }

            VolleyError::RemoteFailure { host, exit_code } => {
                writeln!(
                    f,
                    "{}: remote command exited with status {}",
                    "COMMAND FAILED".red().bold(),
                    exit_code
                )?;
                writeln!(f, "  {} {}", "Host:".dimmed(), host)?;
                Ok(())
            }

            VolleyError::Inventory {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "INVENTORY ERROR".red().bold(), message)?;
                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }
                Ok(())
            }

            VolleyError::Io { message, path } => {
                writeln!(f, "{}: {}", "I/O ERROR".red().bold(), message)?;
                if let Some(path) = path {
                    writeln!(f, "  {} {}", "Path:".dimmed(), path.display())?;
                }
                Ok(())
            }
        }
    }
}

/// Suggest a fix for common TCP-level connection errors
pub fn connect_suggestion(e: &std::io::Error) -> Option<String> {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Some("Ensure SSH service is running on the target host".to_string())
        }
        std::io::ErrorKind::TimedOut => {
            Some("Check network connectivity and firewall rules".to_string())
        }
        std::io::ErrorKind::PermissionDenied => {
            Some("Check SSH key permissions and authentication".to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = VolleyError::Connection {
            host: "web1.example.com".to_string(),
            kind: ConnectKind::Tcp,
            message: "connection refused".to_string(),
            suggestion: Some("Ensure SSH service is running on the target host".to_string()),
        };

        let output = format!("{}", err);
        let clean = console::strip_ansi_codes(&output);

        assert!(clean.contains("Failed to connect to web1.example.com"));
        assert!(clean.contains("ConnectionError: connection refused"));
        assert!(clean.contains("Hint"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(VolleyError::NoHosts.exit_code(), 10);
        assert_eq!(
            VolleyError::RemoteFailure {
                host: "db1".to_string(),
                exit_code: 3,
            }
            .exit_code(),
            1
        );
        assert_eq!(
            VolleyError::Config {
                message: "batch size must be greater than zero".to_string(),
                suggestion: None,
            }
            .exit_code(),
            1
        );
    }
}
