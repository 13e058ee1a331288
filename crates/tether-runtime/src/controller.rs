//! Connector lifecycle controller
//!
//! Owns the read → publish → commit loop for one connector identity:
//!
//! ```text
//! Created ─start─▶ Starting ─▶ Running ─run─▶ Stopping ─▶ Stopped
//!    │                │           │
//!    └────────────────┴───────────┴──────▶ Failed
//! ```
//!
//! A position is committed only after the publisher has flushed every record
//! up to and including the one that produced it. Records read after the last
//! commit are re-read (and re-published) after a crash, never skipped.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

use tether_core::{
    Backoff, ConnectorConfig, EndOfDataPolicy, PositionIndex, ReadOutcome, Record,
    RecordPublisher, SourceAdapter,
};

use crate::error::{ConnectorFailure, Error, Result};
use crate::offsets::OffsetStore;

/// Lifecycle state of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// Constructed, not started
    Created,
    /// Resolving the resume point and opening the source
    Starting,
    /// Reading and publishing
    Running,
    /// Draining: final flush and commit
    Stopping,
    /// Stopped cleanly
    Stopped,
    /// Stopped on an unrecoverable error
    Failed,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectorState::Created => "created",
            ConnectorState::Starting => "starting",
            ConnectorState::Running => "running",
            ConnectorState::Stopping => "stopping",
            ConnectorState::Stopped => "stopped",
            ConnectorState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Cloneable handle requesting a graceful stop from another task
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Ask the connector to finish its current iteration and stop
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether a stop was requested
    pub fn is_stop_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Outcome of a clean run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Connector identity
    pub connector: String,
    /// Records published during this run
    pub records_published: u64,
    /// Commits written during this run
    pub commits: u64,
    /// Position the next run resumes from
    pub last_committed: Option<PositionIndex>,
}

/// Runs one source connector
pub struct Connector {
    config: ConnectorConfig,
    source: Box<dyn SourceAdapter>,
    publisher: Box<dyn RecordPublisher>,
    offsets: Arc<dyn OffsetStore>,
    state: ConnectorState,
    stop: StopHandle,
    stop_rx: watch::Receiver<bool>,
    /// Index after the last published record, not yet committed
    pending: Option<PositionIndex>,
    last_committed: Option<PositionIndex>,
    last_commit_at: Instant,
    records_published: u64,
    commits: u64,
    closed: bool,
}

impl Connector {
    /// Create a connector wiring a source to a publisher, tracking positions in `offsets`
    pub fn new(
        config: ConnectorConfig,
        source: Box<dyn SourceAdapter>,
        publisher: Box<dyn RecordPublisher>,
        offsets: Arc<dyn OffsetStore>,
    ) -> Self {
        let (tx, stop_rx) = watch::channel(false);
        Self {
            config,
            source,
            publisher,
            offsets,
            state: ConnectorState::Created,
            stop: StopHandle { tx: Arc::new(tx) },
            stop_rx,
            pending: None,
            last_committed: None,
            last_commit_at: Instant::now(),
            records_published: 0,
            commits: 0,
            closed: false,
        }
    }

    /// Connector identity
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectorState {
        self.state
    }

    /// Last position written to the offset store
    pub fn last_committed(&self) -> Option<&PositionIndex> {
        self.last_committed.as_ref()
    }

    /// Handle for requesting a stop from other tasks
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Request a graceful stop
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Resolve the resume point, open the source and seek to it
    pub async fn start(&mut self) -> std::result::Result<(), ConnectorFailure> {
        self.expect_state(ConnectorState::Created, "start")?;
        self.transition(ConnectorState::Starting);

        let resume = match self.read_last_committed().await {
            Ok(resume) => resume,
            Err(e) => return Err(self.fail(e)),
        };
        self.last_committed = resume.clone();

        if let Err(e) = self.source.open().await {
            return Err(self.fail(e));
        }

        match &resume {
            Some(index) => {
                tracing::info!(
                    connector = %self.config.name,
                    %index,
                    "Resuming from committed position"
                );
                if let Err(e) = self.source.seek(index).await {
                    return Err(self.fail(e));
                }
            }
            None => {
                tracing::info!(
                    connector = %self.config.name,
                    index = %self.source.beginning(),
                    "No committed position, starting from the beginning"
                );
            }
        }

        self.pending = resume;
        self.last_commit_at = Instant::now();
        self.transition(ConnectorState::Running);
        Ok(())
    }

    /// Read, publish and commit until end-of-data, a stop request or a fatal error
    pub async fn run(&mut self) -> std::result::Result<RunSummary, ConnectorFailure> {
        self.expect_state(ConnectorState::Running, "run")?;
        if self.closed {
            return Err(self.invalid_state("run"));
        }

        loop {
            if self.stop.is_stop_requested() {
                tracing::info!(connector = %self.config.name, "Stop requested");
                break;
            }

            let outcome = match self.read_next().await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => break,
                Err(e) => return Err(self.fail(e)),
            };

            match outcome {
                ReadOutcome::Record(record) => {
                    if let Err(e) = self.publish(&record).await {
                        return Err(self.fail(e));
                    }
                    self.records_published += 1;
                    self.pending = Some(self.source.current_index());

                    if self.commit_due() {
                        if let Err(e) = self.commit_pending().await {
                            return Err(self.fail(e));
                        }
                    }
                }
                ReadOutcome::EndOfData => match self.config.on_end_of_data {
                    EndOfDataPolicy::Stop => {
                        tracing::info!(
                            connector = %self.config.name,
                            "End of data reached, stopping"
                        );
                        break;
                    }
                    EndOfDataPolicy::WaitAndRetry => {
                        if self.wait_for_data().await {
                            tracing::info!(
                                connector = %self.config.name,
                                "Stop requested while waiting for data"
                            );
                            break;
                        }
                        // an idle source still commits what it already published
                        if self.commit_due() {
                            if let Err(e) = self.commit_pending().await {
                                return Err(self.fail(e));
                            }
                        }
                    }
                },
            }
        }

        self.transition(ConnectorState::Stopping);
        if let Err(e) = self.commit_pending().await {
            return Err(self.fail(e));
        }
        self.transition(ConnectorState::Stopped);

        Ok(RunSummary {
            connector: self.config.name.clone(),
            records_published: self.records_published,
            commits: self.commits,
            last_committed: self.last_committed.clone(),
        })
    }

    /// Release the source and publisher. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let source = self.source.close().await;
        let publisher = self.publisher.close().await;
        tracing::debug!(
            connector = %self.config.name,
            state = %self.state,
            "Connector closed"
        );
        source.and(publisher)
    }

    /// Start, run and close; the terminal result of the whole lifecycle
    pub async fn execute(mut self) -> std::result::Result<RunSummary, ConnectorFailure> {
        let result = match self.start().await {
            Ok(()) => self.run().await,
            Err(failure) => Err(failure),
        };
        if let Err(e) = self.close().await {
            tracing::warn!(connector = %self.config.name, "Error while closing connector: {}", e);
        }
        result
    }

    /// Read the next outcome, retrying transient errors.
    ///
    /// Returns `None` when a stop request outlived the grace period of an
    /// in-flight read.
    async fn read_next(&mut self) -> Result<Option<ReadOutcome>> {
        let mut backoff = self.config.read_retry.backoff();
        loop {
            let mut stop_rx = self.stop_rx.clone();
            let grace = self.config.shutdown_grace;
            let result = tokio::select! {
                result = self.source.read() => result,
                _ = stop_after_grace(&mut stop_rx, grace) => {
                    tracing::warn!(
                        connector = %self.config.name,
                        "Read did not finish within {:?} of stop request, abandoning it",
                        grace
                    );
                    return Ok(None);
                }
            };

            match result {
                Ok(outcome) => return Ok(Some(outcome)),
                Err(e) if e.is_transient() => {
                    retry_or_give_up(&mut backoff, &self.config.name, "read", e).await?
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Suspend for `poll_interval`. Returns true if a stop was requested meanwhile.
    async fn wait_for_data(&mut self) -> bool {
        let mut stop_rx = self.stop_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval) => false,
            _ = stop_rx.wait_for(|stopped| *stopped) => true,
        }
    }

    async fn publish(&mut self, record: &Record) -> Result<()> {
        let mut backoff = self.config.publish_retry.backoff();
        loop {
            match self.publisher.publish(record).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    retry_or_give_up(&mut backoff, &self.config.name, "publish", e).await?
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let mut backoff = self.config.publish_retry.backoff();
        loop {
            match self.publisher.flush().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    retry_or_give_up(&mut backoff, &self.config.name, "flush", e).await?
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn commit_due(&self) -> bool {
        self.last_commit_at.elapsed() >= self.config.offset_commit_interval
    }

    /// Flush the publisher, then commit the pending position
    async fn commit_pending(&mut self) -> Result<()> {
        let Some(index) = self.pending.clone() else {
            return Ok(());
        };
        if self.last_committed.as_ref() == Some(&index) {
            return Ok(());
        }

        self.flush().await?;
        self.commit(&index).await?;

        tracing::info!(connector = %self.config.name, %index, "Committed position");
        self.last_committed = Some(index);
        self.last_commit_at = Instant::now();
        self.commits += 1;
        Ok(())
    }

    async fn commit(&mut self, index: &PositionIndex) -> Result<()> {
        let mut backoff = self.config.commit_retry.backoff();
        let timeout = self.config.commit_timeout;
        loop {
            let result = match tokio::time::timeout(
                timeout,
                self.offsets.commit(&self.config.name, index),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation: "offset commit".to_string(),
                    after: timeout,
                }),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    retry_or_give_up(&mut backoff, &self.config.name, "commit", e).await?
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn read_last_committed(&mut self) -> Result<Option<PositionIndex>> {
        let mut backoff = self.config.commit_retry.backoff();
        let timeout = self.config.commit_timeout;
        loop {
            let result = match tokio::time::timeout(
                timeout,
                self.offsets.read_last(&self.config.name),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation: "reading committed position".to_string(),
                    after: timeout,
                }),
            };

            match result {
                Ok(index) => return Ok(index),
                Err(e) if e.is_transient() => {
                    retry_or_give_up(&mut backoff, &self.config.name, "offset read", e).await?
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn transition(&mut self, next: ConnectorState) {
        tracing::debug!(
            connector = %self.config.name,
            from = %self.state,
            to = %next,
            "State transition"
        );
        self.state = next;
    }

    fn expect_state(
        &self,
        expected: ConnectorState,
        operation: &str,
    ) -> std::result::Result<(), ConnectorFailure> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &str) -> ConnectorFailure {
        let error = Error::InvalidState {
            operation: operation.to_string(),
            state: if self.closed {
                "closed".to_string()
            } else {
                self.state.to_string()
            },
        };
        ConnectorFailure {
            connector: self.config.name.clone(),
            last_committed: self.last_committed.clone(),
            kind: error.kind(),
            error,
        }
    }

    /// Enter `Failed`. The offset store keeps the last good commit.
    fn fail(&mut self, error: Error) -> ConnectorFailure {
        self.transition(ConnectorState::Failed);
        let failure = ConnectorFailure {
            connector: self.config.name.clone(),
            last_committed: self.last_committed.clone(),
            kind: error.kind(),
            error,
        };
        tracing::error!(
            connector = %failure.connector,
            kind = %failure.kind,
            last_committed = ?failure.last_committed,
            "Connector failed: {}",
            failure.error
        );
        failure
    }
}

/// Completes `grace` after a stop is requested
async fn stop_after_grace(stop_rx: &mut watch::Receiver<bool>, grace: std::time::Duration) {
    if stop_rx.wait_for(|stopped| *stopped).await.is_err() {
        // sender gone: no stop can ever arrive
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(grace).await;
}

/// Sleep for the next backoff delay, or hand back the error once the budget is spent
async fn retry_or_give_up(
    backoff: &mut Backoff,
    connector: &str,
    operation: &str,
    error: Error,
) -> Result<()> {
    match backoff.next_delay() {
        Some(delay) => {
            tracing::warn!(
                connector,
                retry = backoff.retries(),
                "Transient {} error, retrying in {:?}: {}",
                operation,
                delay,
                error
            );
            tokio::time::sleep(delay).await;
            Ok(())
        }
        None => Err(error),
    }
}
