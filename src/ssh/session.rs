// Concurrent per-batch SSH session management

use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use ssh2::{CheckResult, KeyboardInteractivePrompt, KnownHostFileKind, Session};
use tokio::sync::Semaphore;

use crate::config::{AuthMethod, ConnectionOptions, HostKeyVerification};
use crate::output::errors::{connect_suggestion, ConnectKind, VolleyError};
use crate::output::{OutputMultiplexer, Terminal};

/// One successfully connected host within a batch
pub struct HostHandle {
    pub host: String,
    pub session: Session,
}

/// The set of connections open for one batch. Torn down (all transports
/// dropped) before the next batch begins.
pub struct BatchSession {
    pub handles: Vec<HostHandle>,
    pub failed_hosts: Vec<String>,
}

/// Outcome of a single connection attempt
enum ConnectOutcome {
    Connected(HostHandle),
    Failed { host: String, error: VolleyError },
}

/// Opens one transport connection per host in a batch, concurrently.
///
/// A per-host failure is reported to the warn sink and recorded; it never
/// aborts sibling connections and never surfaces to the caller.
pub struct SessionPool {
    opts: ConnectionOptions,
    concurrency: Option<usize>,
    mux: Arc<OutputMultiplexer>,
    terminal: Arc<Terminal>,
}

impl SessionPool {
    pub fn new(
        opts: ConnectionOptions,
        concurrency: Option<usize>,
        mux: Arc<OutputMultiplexer>,
        terminal: Arc<Terminal>,
    ) -> Self {
        SessionPool {
            opts,
            concurrency,
            mux,
            terminal,
        }
    }

    /// Open connections to every host in the batch and return the session
    /// of those that succeeded plus the hosts that failed.
    pub async fn open(&self, batch: &[String]) -> BatchSession {
        // Every host considered feeds the label-width tracker, connected
        // or not, so output alignment is decided before any line arrives.
        for host in batch {
            self.mux.observe_host(host);
        }

        // Batch size already throttles fan-out; the semaphore only bites
        // when an explicit connection cap is configured below it.
        let cap = self.concurrency.unwrap_or(batch.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(cap));

        let mut attempts = Vec::with_capacity(batch.len());
        for host in batch {
            let host = host.clone();
            let opts = self.opts.clone();
            let semaphore = semaphore.clone();

            attempts.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;

                tracing::debug!(%host, "opening connection");
                let target = host.clone();
                let connected =
                    tokio::task::spawn_blocking(move || connect(&target, &opts)).await;

                match connected {
                    Ok(Ok(session)) => ConnectOutcome::Connected(HostHandle { host, session }),
                    Ok(Err(error)) => ConnectOutcome::Failed { host, error },
                    Err(join_error) => ConnectOutcome::Failed {
                        error: VolleyError::Connection {
                            host: host.clone(),
                            kind: ConnectKind::Tcp,
                            message: format!("connection task failed: {}", join_error),
                            suggestion: None,
                        },
                        host,
                    },
                }
            }));
        }

        let mut handles = Vec::new();
        let mut failed_hosts = Vec::new();

        for attempt in join_all(attempts).await {
            let outcome = match attempt {
                Ok(outcome) => outcome,
                // A panicked spawn leaves nothing to report against a host;
                // the panic itself is already on stderr.
                Err(_) => continue,
            };

            match outcome {
                ConnectOutcome::Connected(handle) => handles.push(handle),
                ConnectOutcome::Failed { host, error } => {
                    self.report_failure(&host, &error);
                    failed_hosts.push(host);
                }
            }
        }

        BatchSession {
            handles,
            failed_hosts,
        }
    }

    fn report_failure(&self, host: &str, error: &VolleyError) {
        match error {
            VolleyError::Connection {
                kind,
                message,
                suggestion,
                ..
            } => {
                self.terminal
                    .warn(&format!("Failed to connect to {} -- {}: {}", host, kind, message));
                tracing::debug!(%host, %kind, cause = %message, "connection failed");
                if let Some(suggestion) = suggestion {
                    tracing::debug!(%host, suggestion, "connection hint");
                }
            }
            other => {
                self.terminal
                    .warn(&format!("Failed to connect to {} -- {}", host, other));
            }
        }
    }
}

/// Establish and authenticate one SSH session. Blocking; runs on the
/// blocking thread pool.
fn connect(host: &str, opts: &ConnectionOptions) -> Result<Session, VolleyError> {
    let addr = (host, opts.port)
        .to_socket_addrs()
        .map_err(|e| connection_error(host, ConnectKind::Tcp, format!("{}", e), None))?
        .next()
        .ok_or_else(|| {
            connection_error(
                host,
                ConnectKind::Tcp,
                "address did not resolve".to_string(),
                Some("Check the host name or the inventory attribute".to_string()),
            )
        })?;

    let tcp = TcpStream::connect_timeout(&addr, opts.connect_timeout).map_err(|e| {
        connection_error(
            host,
            ConnectKind::Tcp,
            format!("{}", e),
            connect_suggestion(&e),
        )
    })?;

    let mut session = Session::new().map_err(|e| {
        connection_error(
            host,
            ConnectKind::Handshake,
            format!("failed to create SSH session: {}", e),
            None,
        )
    })?;

    session.set_tcp_stream(tcp);
    session.set_timeout(opts.connect_timeout.as_millis() as u32);

    session.handshake().map_err(|e| {
        connection_error(
            host,
            ConnectKind::Handshake,
            format!("{}", e),
            Some("Check SSH service is running on the target".to_string()),
        )
    })?;

    if opts.host_key == HostKeyVerification::Strict {
        verify_host_key(&session, host, opts)?;
    }

    authenticate(&session, host, opts)?;

    Ok(session)
}

/// Verify the server key against the known-hosts file
fn verify_host_key(
    session: &Session,
    host: &str,
    opts: &ConnectionOptions,
) -> Result<(), VolleyError> {
    let mut known_hosts = session.known_hosts().map_err(|e| {
        connection_error(
            host,
            ConnectKind::HostKey,
            format!("failed to load known hosts: {}", e),
            None,
        )
    })?;

    // A missing known-hosts file just means no keys are known yet
    known_hosts
        .read_file(Path::new(&opts.known_hosts_file), KnownHostFileKind::OpenSSH)
        .ok();

    let (key, _key_type) = session.host_key().ok_or_else(|| {
        connection_error(
            host,
            ConnectKind::HostKey,
            "server did not present a host key".to_string(),
            None,
        )
    })?;

    match known_hosts.check_port(host, opts.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(connection_error(
            host,
            ConnectKind::HostKey,
            "host key mismatch".to_string(),
            Some(format!(
                "The key in {} does not match; remove the stale entry if the host was reinstalled",
                opts.known_hosts_file.display()
            )),
        )),
        CheckResult::NotFound => Err(connection_error(
            host,
            ConnectKind::HostKey,
            "host key not found in known hosts".to_string(),
            Some("Connect once with ssh to record the key, or pass --no-host-key-verify".to_string()),
        )),
        CheckResult::Failure => Err(connection_error(
            host,
            ConnectKind::HostKey,
            "host key check failed".to_string(),
            None,
        )),
    }
}

/// Try the configured authentication methods in order
fn authenticate(
    session: &Session,
    host: &str,
    opts: &ConnectionOptions,
) -> Result<(), VolleyError> {
    let user = opts
        .user
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "root".to_string());

    for method in &opts.auth {
        if session.authenticated() {
            break;
        }

        match method {
            AuthMethod::Agent => {
                if let Ok(mut agent) = session.agent() {
                    if agent.connect().is_ok() {
                        agent.list_identities().ok();
                        for identity in agent.identities().unwrap_or_default() {
                            if agent.userauth(&user, &identity).is_ok() {
                                break;
                            }
                        }
                    }
                }
            }
            AuthMethod::KeyFile(path) => {
                if path.exists() {
                    session.userauth_pubkey_file(&user, None, path, None).ok();
                } else {
                    tracing::debug!(%host, path = %path.display(), "identity file not found");
                }
            }
            AuthMethod::Password(password) => {
                if session.userauth_password(&user, password).is_err() {
                    // Fall back to keyboard-interactive auth (used by some
                    // PAM configurations)
                    let mut prompter = PasswordPrompter(password.clone());
                    session
                        .userauth_keyboard_interactive(&user, &mut prompter)
                        .ok();
                }
            }
        }
    }

    if session.authenticated() {
        Ok(())
    } else {
        Err(connection_error(
            host,
            ConnectKind::Auth,
            format!("authentication failed for user '{}'", user),
            Some(
                "Ensure an SSH key is added to the agent, pass --identity-file, or use --ask-pass"
                    .to_string(),
            ),
        ))
    }
}

fn connection_error(
    host: &str,
    kind: ConnectKind,
    message: String,
    suggestion: Option<String>,
) -> VolleyError {
    VolleyError::Connection {
        host: host.to_string(),
        kind,
        message,
        suggestion,
    }
}

/// Helper for keyboard-interactive authentication
struct PasswordPrompter(String);

impl KeyboardInteractivePrompt for PasswordPrompter {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        // Return the password for each prompt (typically just one)
        prompts.iter().map(|_| self.0.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionOptions, HostKeyVerification};
    use std::path::PathBuf;
    use std::time::Duration;

    fn test_options() -> ConnectionOptions {
        ConnectionOptions {
            user: Some("nobody".to_string()),
            auth: vec![AuthMethod::Agent],
            port: 1, // nothing listens here
            host_key: HostKeyVerification::Disabled,
            known_hosts_file: PathBuf::from("/dev/null"),
            connect_timeout: Duration::from_millis(500),
        }
    }

    fn pool(opts: ConnectionOptions) -> (SessionPool, Arc<OutputMultiplexer>) {
        let mux = Arc::new(OutputMultiplexer::with_sink(Box::new(std::io::sink())));
        let pool = SessionPool::new(opts, None, mux.clone(), Arc::new(Terminal::new(true)));
        (pool, mux)
    }

    #[tokio::test]
    async fn test_connection_failure_does_not_abort_siblings() {
        let (pool, _mux) = pool(test_options());
        let batch = vec!["127.0.0.1".to_string(), "127.0.0.1".to_string()];

        let session = pool.open(&batch).await;

        // Both attempts settle independently; neither aborts the other
        assert!(session.handles.is_empty());
        assert_eq!(session.failed_hosts.len(), 2);
    }

    #[tokio::test]
    async fn test_every_considered_host_feeds_the_label_width() {
        let (pool, mux) = pool(test_options());
        let batch = vec![
            "a".to_string(),
            "unreachable-but-long-name".to_string(),
        ];

        pool.open(&batch).await;

        assert_eq!(mux.label_width(), "unreachable-but-long-name".len());
    }

    #[tokio::test]
    async fn test_connection_cap_of_one_still_settles_all_attempts() {
        let opts = test_options();
        let mux = Arc::new(OutputMultiplexer::with_sink(Box::new(std::io::sink())));
        let pool = SessionPool::new(opts, Some(1), mux, Arc::new(Terminal::new(true)));
        let batch = vec![
            "127.0.0.1".to_string(),
            "127.0.0.1".to_string(),
            "127.0.0.1".to_string(),
        ];

        let session = pool.open(&batch).await;

        assert_eq!(session.failed_hosts.len(), 3);
    }
}
