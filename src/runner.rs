// Drives batches in order: open session, run command, pace, repeat

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::batch;
use crate::config::ConnectionOptions;
use crate::dispatch;
use crate::output::errors::VolleyError;
use crate::output::{OutputMultiplexer, Terminal};
use crate::ssh::SessionPool;

/// Run-wide knobs for the batch engine
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Hosts per batch
    pub batch_size: usize,
    /// Seconds to sleep between batches
    pub wait: f64,
    /// Abort the whole run on the first non-zero remote exit status
    pub stop_on_failure: bool,
    /// Cap on simultaneous in-flight connection attempts within a batch
    pub concurrency: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            batch_size: 5,
            wait: 0.5,
            stop_on_failure: false,
            concurrency: None,
        }
    }
}

/// Aggregate outcome of a run
#[derive(Debug, Default)]
pub struct RunResult {
    pub batches_completed: usize,
    pub failed_hosts: HashSet<String>,
    pub aborted: bool,
}

/// Orchestrates the whole run: partition, connect, dispatch, pace.
///
/// Batches run strictly in sequence; batch *i+1* does not start until batch
/// *i*'s session is torn down and the pacing sleep has elapsed. Concurrency
/// is therefore bounded by the batch size.
pub struct BatchRunner {
    opts: ConnectionOptions,
    config: RunConfig,
    mux: Arc<OutputMultiplexer>,
    terminal: Arc<Terminal>,
}

impl BatchRunner {
    pub fn new(
        opts: ConnectionOptions,
        config: RunConfig,
        mux: Arc<OutputMultiplexer>,
        terminal: Arc<Terminal>,
    ) -> Self {
        BatchRunner {
            opts,
            config,
            mux,
            terminal,
        }
    }

    /// Run `command` across `hosts` in paced batches.
    ///
    /// Fatal conditions (no hosts, bad batch size) surface as errors before
    /// any connection attempt. A stop-on-failure abort returns a result
    /// with `aborted` set; per-host failures only accumulate.
    pub async fn run(&self, hosts: &[String], command: &str) -> Result<RunResult, VolleyError> {
        // A negative or non-finite wait would blow up the pacing sleep
        // mid-run; reject it before touching any host.
        if !self.config.wait.is_finite() || self.config.wait < 0.0 {
            return Err(VolleyError::Config {
                message: format!(
                    "wait must be a non-negative number of seconds, got {}",
                    self.config.wait
                ),
                suggestion: Some("Pass --wait with a value >= 0".to_string()),
            });
        }

        let batches = batch::partition(hosts, self.config.batch_size)?;

        let pool = SessionPool::new(
            self.opts.clone(),
            self.config.concurrency,
            self.mux.clone(),
            self.terminal.clone(),
        );

        let mut result = RunResult::default();
        let last = batches.len() - 1;

        for (index, hosts) in batches.iter().enumerate() {
            tracing::debug!(batch = index + 1, total = batches.len(), "starting batch");

            let session = pool.open(hosts).await;
            result.failed_hosts.extend(session.failed_hosts.iter().cloned());

            let report = dispatch::run(
                session,
                command,
                self.config.stop_on_failure,
                self.mux.clone(),
                &self.terminal,
            )
            .await;

            if self.absorb_batch(report, &mut result) {
                // Stop-on-failure tripped: no further batches run
                return Ok(result);
            }

            // Pacing only happens between batches, never after the last one
            if index < last {
                self.terminal.separator();
                self.terminal.pacing_notice(self.config.wait);
                self.terminal.separator();
                tokio::time::sleep(Duration::from_secs_f64(self.config.wait)).await;
            }
        }

        Ok(result)
    }

    /// Fold one batch's report into the run result. Hosts whose command
    /// never ran count as failed even when the batch aborts the run.
    /// Returns true when stop-on-failure fired and the run must end.
    fn absorb_batch(&self, report: dispatch::BatchReport, result: &mut RunResult) -> bool {
        for outcome in &report.outcomes {
            if outcome.result.is_err() {
                result.failed_hosts.insert(outcome.host.clone());
            }
        }

        match report.fatal {
            Some(VolleyError::RemoteFailure { host, exit_code }) => {
                self.terminal.fatal(&format!(
                    "Remote command on {} exited with status {}; stopping",
                    host, exit_code
                ));
                result.aborted = true;
                true
            }
            Some(other) => {
                self.terminal.fatal(&other.to_string());
                result.aborted = true;
                true
            }
            None => {
                result.batches_completed += 1;
                false
            }
        }
    }
}
