// Runs one command across every channel of a batch session

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::output::errors::VolleyError;
use crate::output::{OutputMultiplexer, Terminal};
use crate::ssh::{BatchSession, HostHandle};

/// Result of one host's command execution: the remote exit status, or the
/// error that kept the command from running at all.
pub struct HostOutcome {
    pub host: String,
    pub result: Result<i32, VolleyError>,
}

/// Everything one batch's dispatch produced: the per-host outcomes, plus
/// the failure that tripped stop-on-failure when the policy is enabled.
pub struct BatchReport {
    pub outcomes: Vec<HostOutcome>,
    pub fatal: Option<VolleyError>,
}

/// Execute `command` on every open channel of the session, streaming output
/// through the multiplexer, and block until every channel has settled.
///
/// A host whose exec request is rejected is reported and excluded; siblings
/// keep running. With `stop_on_failure`, the first non-zero remote exit
/// status becomes the report's fatal after the batch settles; completed
/// siblings keep their output and their own failures are still warned about.
pub async fn run(
    session: BatchSession,
    command: &str,
    stop_on_failure: bool,
    mux: Arc<OutputMultiplexer>,
    terminal: &Terminal,
) -> BatchReport {
    let mut executions = Vec::with_capacity(session.handles.len());

    for handle in session.handles {
        let command = command.to_string();
        let mux = mux.clone();

        executions.push(tokio::task::spawn_blocking(move || {
            let host = handle.host.clone();
            let result = exec_channel(&handle, &command, &mux);
            HostOutcome { host, result }
        }));
    }

    // Explicit join over every channel task; the session is complete when
    // the last one settles.
    let mut outcomes = Vec::new();
    for execution in join_all(executions).await {
        match execution {
            Ok(outcome) => outcomes.push(outcome),
            Err(join_error) => {
                terminal.warn(&format!("command task failed: {}", join_error));
            }
        }
    }

    for outcome in &outcomes {
        if let Err(error) = &outcome.result {
            terminal.warn(&format!(
                "Execution rejected on {} -- {}",
                outcome.host,
                error_summary(error)
            ));
        }
    }

    // Under stop-on-failure the first non-zero exit becomes the fatal; any
    // sibling that also exited non-zero is still warned about.
    for (host, code) in reportable_failures(&outcomes, stop_on_failure) {
        terminal.warn(&format!("Command on {} exited with status {}", host, code));
    }

    let fatal = if stop_on_failure {
        first_remote_failure(&outcomes)
            .map(|(host, exit_code)| VolleyError::RemoteFailure { host, exit_code })
    } else {
        None
    };

    BatchReport { outcomes, fatal }
}

/// First host whose command ran and exited non-zero, if any
pub fn first_remote_failure(outcomes: &[HostOutcome]) -> Option<(String, i32)> {
    outcomes.iter().find_map(|o| match o.result {
        Ok(code) if code != 0 => Some((o.host.clone(), code)),
        _ => None,
    })
}

/// Non-zero exits that get warnings. With stop-on-failure the first one is
/// excluded; it is reported as the fatal abort instead.
fn reportable_failures(outcomes: &[HostOutcome], stop_on_failure: bool) -> Vec<(String, i32)> {
    let mut skip_fatal = stop_on_failure;
    outcomes
        .iter()
        .filter_map(|o| match o.result {
            Ok(code) if code != 0 => {
                if skip_fatal {
                    skip_fatal = false;
                    None
                } else {
                    Some((o.host.clone(), code))
                }
            }
            _ => None,
        })
        .collect()
}

fn error_summary(error: &VolleyError) -> String {
    match error {
        VolleyError::ExecRejected { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Open a channel, request a pty, run the command, and stream its output.
/// Blocking; runs on the blocking thread pool.
fn exec_channel(
    handle: &HostHandle,
    command: &str,
    mux: &OutputMultiplexer,
) -> Result<i32, VolleyError> {
    let mut channel =
        handle
            .session
            .channel_session()
            .map_err(|e| VolleyError::ExecRejected {
                host: handle.host.clone(),
                message: format!("failed to open channel: {}", e),
            })?;

    channel
        .request_pty("xterm", None, None)
        .map_err(|e| VolleyError::ExecRejected {
            host: handle.host.clone(),
            message: format!("pty request refused: {}", e),
        })?;

    channel.exec(command).map_err(|e| VolleyError::ExecRejected {
        host: handle.host.clone(),
        message: format!("cannot execute '{}': {}", command, e),
    })?;

    // Stream both streams as chunks arrive; each chunk is labeled and
    // flushed immediately by the multiplexer.
    handle.session.set_blocking(false);

    let mut stdout_buf = [0u8; 4096];
    let mut stderr_buf = [0u8; 4096];

    loop {
        let mut activity = false;

        match channel.read(&mut stdout_buf) {
            Ok(0) => {}
            Ok(n) => {
                mux.emit(&handle.host, &stdout_buf[..n]);
                activity = true;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => break,
        }

        match channel.stderr().read(&mut stderr_buf) {
            Ok(0) => {}
            Ok(n) => {
                mux.emit(&handle.host, &stderr_buf[..n]);
                activity = true;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => break,
        }

        if channel.eof() {
            break;
        }

        if !activity {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    handle.session.set_blocking(true);
    channel.wait_close().ok();
    Ok(channel.exit_status().unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(host: &str, result: Result<i32, VolleyError>) -> HostOutcome {
        HostOutcome {
            host: host.to_string(),
            result,
        }
    }

    #[test]
    fn test_first_remote_failure_finds_nonzero_exit() {
        let outcomes = vec![
            outcome("web1", Ok(0)),
            outcome("web2", Ok(2)),
            outcome("web3", Ok(1)),
        ];

        assert_eq!(
            first_remote_failure(&outcomes),
            Some(("web2".to_string(), 2))
        );
    }

    #[test]
    fn test_all_zero_exits_are_not_a_failure() {
        let outcomes = vec![outcome("web1", Ok(0)), outcome("web2", Ok(0))];

        assert_eq!(first_remote_failure(&outcomes), None);
    }

    #[test]
    fn test_exec_rejection_is_not_a_remote_failure() {
        // A host that never ran the command must not trip stop-on-failure
        let outcomes = vec![
            outcome("web1", Ok(0)),
            outcome(
                "web2",
                Err(VolleyError::ExecRejected {
                    host: "web2".to_string(),
                    message: "pty request refused".to_string(),
                }),
            ),
        ];

        assert_eq!(first_remote_failure(&outcomes), None);
    }

    #[test]
    fn test_sibling_failures_are_still_reported_under_stop_on_failure() {
        let outcomes = vec![
            outcome("web1", Ok(0)),
            outcome("web2", Ok(2)),
            outcome("web3", Ok(3)),
        ];

        // web2 becomes the fatal; web3's failure must not fall silent
        assert_eq!(
            reportable_failures(&outcomes, true),
            vec![("web3".to_string(), 3)]
        );
    }

    #[test]
    fn test_every_failure_is_reported_without_stop_on_failure() {
        let outcomes = vec![
            outcome("web1", Ok(0)),
            outcome("web2", Ok(2)),
            outcome("web3", Ok(3)),
        ];

        assert_eq!(
            reportable_failures(&outcomes, false),
            vec![("web2".to_string(), 2), ("web3".to_string(), 3)]
        );
    }

    #[tokio::test]
    async fn test_empty_session_produces_an_empty_report() {
        let session = BatchSession {
            handles: Vec::new(),
            failed_hosts: Vec::new(),
        };
        let mux = Arc::new(OutputMultiplexer::with_sink(Box::new(std::io::sink())));

        let report = run(session, "echo hi", true, mux, &Terminal::new(true)).await;

        assert!(report.outcomes.is_empty());
        assert!(report.fatal.is_none());
    }
}
