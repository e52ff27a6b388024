// Settings file and per-run connection options

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default SSH port when neither the settings file nor the flag set one
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Settings file errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid settings file '{path}': {source}")]
    InvalidYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Key-value settings loaded from the optional YAML settings file.
///
/// Every field has a CLI counterpart; the file supplies defaults for values
/// the invocation does not pass.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub ssh_user: Option<String>,
    pub ssh_port: Option<u16>,
    pub ssh_password: Option<String>,
    pub identity_file: Option<String>,
    pub inventory_script: Option<PathBuf>,
    pub attribute: Option<String>,
}

impl Settings {
    /// Load settings from a YAML file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_yaml::from_str(&content).map_err(|source| SettingsError::InvalidYaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load settings from the default location (`~/.volley/config.yaml`).
    /// A missing file is not an error; it just yields empty settings.
    pub fn load_default() -> Result<Self, SettingsError> {
        match default_settings_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Settings::default()),
        }
    }

    /// Pin an SSH port into the settings, as if the file had set it.
    ///
    /// Passing `--ssh-port` explicitly pins its value here, and port
    /// resolution prefers the pinned value over the flag default. The net
    /// effect: a settings-file port beats the default of 22, and an
    /// explicitly passed flag beats the settings file.
    pub fn pin_port(&mut self, port: u16) {
        self.ssh_port = Some(port);
    }
}

/// Default settings file location
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".volley").join("config.yaml"))
}

/// Host key verification policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyVerification {
    /// Verify the server key against the known-hosts file
    Strict,
    /// Skip verification; the known-hosts file is redirected to a null sink
    Disabled,
}

/// One way to authenticate a connection. Methods are tried in order; the
/// transport uses the first that succeeds.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Keys held by a running SSH agent
    Agent,
    /// A private key file on disk
    KeyFile(PathBuf),
    /// Plain password (also retried as keyboard-interactive)
    Password(String),
}

/// Resolved per-host connection descriptor.
///
/// Built once per run; the type allows `user` and `auth` to differ between
/// hosts even though a single run currently shares one descriptor.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub user: Option<String>,
    pub auth: Vec<AuthMethod>,
    pub port: u16,
    pub host_key: HostKeyVerification,
    pub known_hosts_file: PathBuf,
    pub connect_timeout: Duration,
}

/// Per-invocation values that override the settings file.
///
/// `port` is `Some` only when the flag was explicitly passed.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOverrides {
    pub user: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
    pub no_host_key_verify: bool,
    pub connect_timeout: Duration,
}

/// Build the run's connection options from settings plus invocation
/// overrides.
///
/// An explicit `--ssh-port` pins its value into the settings before port
/// resolution, which then reads the pinned value (see [`Settings::pin_port`]).
pub fn build_connection_options(
    settings: &mut Settings,
    overrides: &ConnectionOverrides,
) -> ConnectionOptions {
    if let Some(port) = overrides.port {
        settings.pin_port(port);
    }
    let port = settings.ssh_port.unwrap_or(DEFAULT_SSH_PORT);

    let user = overrides.user.clone().or_else(|| settings.ssh_user.clone());

    // The agent is always tried first; key file and password are not
    // mutually exclusive, both are handed to the transport when set.
    let mut auth = vec![AuthMethod::Agent];
    if let Some(identity) = overrides
        .identity_file
        .as_deref()
        .or(settings.identity_file.as_deref())
    {
        auth.push(AuthMethod::KeyFile(expand_path(identity)));
    }
    if let Some(password) = overrides
        .password
        .as_deref()
        .or(settings.ssh_password.as_deref())
    {
        auth.push(AuthMethod::Password(password.to_string()));
    }

    let (host_key, known_hosts_file) = if overrides.no_host_key_verify {
        (HostKeyVerification::Disabled, PathBuf::from("/dev/null"))
    } else {
        let known_hosts = dirs::home_dir()
            .map(|home| home.join(".ssh").join("known_hosts"))
            .unwrap_or_else(|| PathBuf::from("/dev/null"));
        (HostKeyVerification::Strict, known_hosts)
    };

    ConnectionOptions {
        user,
        auth,
        port,
        host_key,
        known_hosts_file,
        connect_timeout: if overrides.connect_timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            overrides.connect_timeout
        },
    }
}

/// Expand an identity-file path: `~` and relative paths resolve against the
/// process home directory. Absolute paths pass through untouched.
pub fn expand_path(path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        return p.to_path_buf();
    }

    let home = match dirs::home_dir() {
        Some(home) => home,
        None => return p.to_path_buf(),
    };

    if let Some(rest) = path.strip_prefix("~/") {
        home.join(rest)
    } else if path == "~" {
        home
    } else {
        home.join(p)
    }
}

/// Simple home directory lookup
mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}
