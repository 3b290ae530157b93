//! Parallel call coordination with a single completion signal.
//!
//! One logical operation fans out into one call per destination server.
//! Every call runs as its own tokio task; as soon as a response arrives it is
//! decoded and scattered by the operation's handler, then the call reports
//! its status to the shared [`PendingCall`]. The last call to report fires
//! the one-shot completion signal the caller is awaiting.
//!
//! ```text
//!            ┌──────── task 0 ── transport.call ── handler ──┐
//! dispatch ──┼──────── task 1 ── transport.call ── handler ──┼──► PendingCall ──► oneshot ──► caller
//!            └──────── task N ── transport.call ── handler ──┘   (countdown)
//! ```

use crate::aggregator::ScatterError;
use crate::client::ClientError;
use crate::metrics::ClientMetrics;
use crate::protocol::PsRequest;
use crate::sharding::ServerIndex;
use crate::transport::{PsTransport, TransportError};
use bytes::Bytes;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Outcome of one call of a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    /// Response received, decoded and scattered.
    Succeeded,
    /// The transport failed or timed out.
    TransportFailed(TransportError),
    /// The response arrived but could not be decoded or scattered.
    DecodeFailed(ScatterError),
    /// The operation was cancelled before the response was handled.
    Cancelled,
    /// The call task ended without reporting.
    Aborted,
}

impl CallStatus {
    /// Returns true for [`CallStatus::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, CallStatus::Succeeded)
    }

    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            CallStatus::Succeeded => "success",
            CallStatus::TransportFailed(_) => "transport_failure",
            CallStatus::DecodeFailed(_) => "decode_failure",
            CallStatus::Cancelled => "cancelled",
            CallStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Succeeded => write!(f, "succeeded"),
            CallStatus::TransportFailed(e) => write!(f, "transport failure: {}", e),
            CallStatus::DecodeFailed(e) => write!(f, "decode failure: {}", e),
            CallStatus::Cancelled => write!(f, "cancelled"),
            CallStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Status of one call together with the server it went to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// Server the call was sent to.
    pub server: ServerIndex,
    /// How the call ended.
    pub status: CallStatus,
}

/// Per-call statuses of a finished fan-out, in dispatch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallReport {
    /// One entry per issued call.
    pub calls: Vec<CallOutcome>,
}

impl CallReport {
    /// Number of calls that succeeded.
    pub fn succeeded(&self) -> usize {
        self.calls.iter().filter(|c| c.status.is_success()).count()
    }

    /// Calls that did not succeed.
    pub fn failures(&self) -> Vec<CallOutcome> {
        self.calls
            .iter()
            .filter(|c| !c.status.is_success())
            .cloned()
            .collect()
    }

    /// True when at least one call was issued and none succeeded.
    pub fn all_failed(&self) -> bool {
        !self.calls.is_empty() && self.succeeded() == 0
    }

    /// True when every call succeeded.
    pub fn is_complete(&self) -> bool {
        self.succeeded() == self.calls.len()
    }

    /// True when at least one response was dropped because of cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.calls.iter().any(|c| c.status == CallStatus::Cancelled)
    }
}

/// One call to issue as part of a fan-out.
#[derive(Debug, Clone)]
pub struct OutboundCall {
    /// Destination server.
    pub server: ServerIndex,
    /// Encoded request.
    pub request: PsRequest,
}

// =============================================================================
// Pending call state
// =============================================================================

/// Completion bookkeeping for one in-flight fan-out.
///
/// Holds the countdown of unfinished calls, one write-once status slot per
/// call, and the sender half of the completion signal. The signal fires
/// exactly once, when the last call reports; late or repeated reports are
/// ignored.
pub struct PendingCall {
    remaining: AtomicUsize,
    servers: Vec<ServerIndex>,
    statuses: Vec<OnceLock<CallStatus>>,
    done: Mutex<Option<oneshot::Sender<CallReport>>>,
}

impl PendingCall {
    /// Creates the state for calls to `servers` and the receiver to await.
    pub fn new(servers: Vec<ServerIndex>) -> (Arc<Self>, oneshot::Receiver<CallReport>) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            remaining: AtomicUsize::new(servers.len()),
            statuses: servers.iter().map(|_| OnceLock::new()).collect(),
            servers,
            done: Mutex::new(Some(tx)),
        };
        (Arc::new(pending), rx)
    }

    /// Total number of calls.
    pub fn total(&self) -> usize {
        self.servers.len()
    }

    /// Calls that have not reported yet.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Records the status of call `call`.
    ///
    /// Returns true if this report was the last one and fired the signal.
    pub fn complete(&self, call: usize, status: CallStatus) -> bool {
        let Some(slot) = self.statuses.get(call) else {
            tracing::warn!(call = call, total = self.total(), "Completion for unknown call ignored");
            return false;
        };
        if slot.set(status).is_err() {
            tracing::warn!(call = call, "Duplicate completion ignored");
            return false;
        }

        match self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => {
                self.resolve();
                true
            }
            _ => false,
        }
    }

    fn resolve(&self) {
        let sender = match self.done.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(sender) = sender else {
            return;
        };

        let calls = self
            .servers
            .iter()
            .zip(&self.statuses)
            .map(|(&server, status)| CallOutcome {
                server,
                status: status.get().cloned().unwrap_or(CallStatus::Aborted),
            })
            .collect();

        // The caller may have stopped waiting; nothing to do then.
        let _ = sender.send(CallReport { calls });
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("total", &self.total())
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Reports a call as aborted if its task ends without reporting.
struct CompletionGuard {
    pending: Arc<PendingCall>,
    call: usize,
    reported: bool,
}

impl CompletionGuard {
    fn new(pending: Arc<PendingCall>, call: usize) -> Self {
        Self {
            pending,
            call,
            reported: false,
        }
    }

    fn finish(mut self, status: CallStatus) {
        self.reported = true;
        self.pending.complete(self.call, status);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.reported {
            self.pending.complete(self.call, CallStatus::Aborted);
        }
    }
}

// =============================================================================
// Per-server statistics
// =============================================================================

#[derive(Debug, Default)]
struct ServerCounters {
    successes: AtomicU64,
    failures: AtomicU64,
    total_latency_us: AtomicU64,
}

/// Snapshot of call statistics for one server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerCallStats {
    /// Calls that succeeded.
    pub successes: u64,
    /// Calls that failed for any reason.
    pub failures: u64,
    /// Mean call latency.
    pub avg_latency: Duration,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Issues the calls of a fan-out in parallel and waits for all of them.
pub struct CallCoordinator {
    transport: Arc<dyn PsTransport>,
    call_timeout: Duration,
    metrics: Arc<ClientMetrics>,
    server_stats: Arc<DashMap<ServerIndex, ServerCounters>>,
}

impl CallCoordinator {
    /// Creates a coordinator over a transport.
    pub fn new(transport: Arc<dyn PsTransport>, call_timeout: Duration, metrics: Arc<ClientMetrics>) -> Self {
        Self {
            transport,
            call_timeout,
            metrics,
            server_stats: Arc::new(DashMap::new()),
        }
    }

    /// Returns the per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Returns accumulated statistics for a server.
    pub fn server_stats(&self, server: ServerIndex) -> ServerCallStats {
        match self.server_stats.get(&server) {
            Some(counters) => {
                let successes = counters.successes.load(Ordering::Relaxed);
                let failures = counters.failures.load(Ordering::Relaxed);
                let calls = successes + failures;
                let avg_latency = if calls == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_micros(counters.total_latency_us.load(Ordering::Relaxed) / calls)
                };
                ServerCallStats {
                    successes,
                    failures,
                    avg_latency,
                }
            }
            None => ServerCallStats::default(),
        }
    }

    /// Runs every call concurrently and resolves once all have reported.
    ///
    /// `handler(call_index, response)` runs on the task that received the
    /// response, right away. The operation fails only if every call failed;
    /// otherwise the report lists the status of each call. Once `cancel` fires,
    /// calls not yet sent are skipped and responses are no longer handled, but
    /// in-flight calls still run to the end. The operation resolves as
    /// cancelled only if some call was skipped or its response dropped.
    pub async fn dispatch<H>(
        &self,
        calls: Vec<OutboundCall>,
        handler: H,
        cancel: CancellationToken,
    ) -> Result<CallReport, ClientError>
    where
        H: Fn(usize, Bytes) -> Result<(), ScatterError> + Send + Sync + 'static,
    {
        if calls.is_empty() {
            return Ok(CallReport::default());
        }

        let servers: Vec<ServerIndex> = calls.iter().map(|c| c.server).collect();
        tracing::debug!(calls = calls.len(), servers = ?servers, "Dispatching fan-out");

        let (pending, done) = PendingCall::new(servers);
        let handler = Arc::new(handler);
        let started = Instant::now();

        for (index, call) in calls.into_iter().enumerate() {
            let guard = CompletionGuard::new(Arc::clone(&pending), index);
            let transport = Arc::clone(&self.transport);
            let handler = Arc::clone(&handler);
            let metrics = Arc::clone(&self.metrics);
            let server_stats = Arc::clone(&self.server_stats);
            let cancel = cancel.clone();
            let timeout = self.call_timeout;

            tokio::spawn(async move {
                let server = call.server;
                let call_started = Instant::now();
                let status =
                    run_call(transport.as_ref(), call, timeout, &cancel, |bytes| handler(index, bytes)).await;
                drop(handler);

                let latency = call_started.elapsed();
                record_stats(&server_stats, server, &status, latency);
                metrics.record_call(status.label(), latency);
                guard.finish(status);
            });
        }
        drop(handler);

        let report = done.await.map_err(|_| ClientError::Aborted)?;
        self.metrics.record_operation_latency(started.elapsed());

        if report.was_cancelled() {
            tracing::debug!(calls = report.calls.len(), "Fan-out cancelled");
            return Err(ClientError::Cancelled);
        }
        if report.all_failed() {
            tracing::error!(calls = report.calls.len(), "All calls of fan-out failed");
            return Err(ClientError::AllCallsFailed(report.calls));
        }
        if !report.is_complete() {
            tracing::warn!(
                succeeded = report.succeeded(),
                total = report.calls.len(),
                "Fan-out completed with partial results"
            );
        }
        Ok(report)
    }
}

impl fmt::Debug for CallCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallCoordinator")
            .field("servers", &self.transport.server_count())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

async fn run_call<F>(
    transport: &dyn PsTransport,
    call: OutboundCall,
    timeout: Duration,
    cancel: &CancellationToken,
    handle: F,
) -> CallStatus
where
    F: FnOnce(Bytes) -> Result<(), ScatterError>,
{
    let server = call.server;
    let cmd = call.request.cmd;

    if cancel.is_cancelled() {
        return CallStatus::Cancelled;
    }

    let response = match tokio::time::timeout(timeout, transport.call(server, call.request)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            tracing::warn!(server = server, cmd = %cmd, error = %e, "Call failed");
            return CallStatus::TransportFailed(e);
        }
        Err(_) => {
            let e = TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            };
            tracing::warn!(server = server, cmd = %cmd, error = %e, "Call timed out");
            return CallStatus::TransportFailed(e);
        }
    };

    if cancel.is_cancelled() {
        return CallStatus::Cancelled;
    }

    match handle(response) {
        Ok(()) => CallStatus::Succeeded,
        Err(e) => {
            tracing::warn!(server = server, cmd = %cmd, error = %e, "Response rejected");
            CallStatus::DecodeFailed(e)
        }
    }
}

fn record_stats(
    stats: &DashMap<ServerIndex, ServerCounters>,
    server: ServerIndex,
    status: &CallStatus,
    latency: Duration,
) {
    // A cancelled call says nothing about the server.
    if *status == CallStatus::Cancelled {
        return;
    }

    let counters = stats.entry(server).or_default();
    if status.is_success() {
        counters.successes.fetch_add(1, Ordering::Relaxed);
    } else {
        counters.failures.fetch_add(1, Ordering::Relaxed);
    }
    counters
        .total_latency_us
        .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::encode_pull_request;
    use crate::protocol::DecodeError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;

    /// Echoes the server index back as a one-byte body, failing listed servers.
    struct EchoTransport {
        servers: usize,
        failing: HashSet<ServerIndex>,
        delay: Duration,
        sent: Arc<AtomicUsize>,
    }

    impl EchoTransport {
        fn new(servers: usize) -> Self {
            Self {
                servers,
                failing: HashSet::new(),
                delay: Duration::ZERO,
                sent: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(mut self, servers: &[ServerIndex]) -> Self {
            self.failing = servers.iter().copied().collect();
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl PsTransport for EchoTransport {
        fn server_count(&self) -> usize {
            self.servers
        }

        async fn call(&self, server: ServerIndex, _request: PsRequest) -> Result<Bytes, TransportError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay * (server as u32 + 1)).await;
            }
            if self.failing.contains(&server) {
                return Err(TransportError::ConnectionFailed {
                    server,
                    message: "refused".to_string(),
                });
            }
            Ok(Bytes::from(vec![server as u8]))
        }
    }

    fn coordinator(transport: EchoTransport) -> CallCoordinator {
        CallCoordinator::new(
            Arc::new(transport),
            Duration::from_secs(5),
            Arc::new(ClientMetrics::new().unwrap()),
        )
    }

    fn calls(servers: &[ServerIndex]) -> Vec<OutboundCall> {
        servers
            .iter()
            .map(|&server| OutboundCall {
                server,
                request: encode_pull_request(0, 0, 0, 1),
            })
            .collect()
    }

    #[test]
    fn test_pending_call_fires_once() {
        let (pending, mut rx) = PendingCall::new(vec![0, 1]);
        assert_eq!(pending.remaining(), 2);

        assert!(!pending.complete(1, CallStatus::Succeeded));
        assert!(rx.try_recv().is_err());

        // Duplicate report for the same call does not count.
        assert!(!pending.complete(1, CallStatus::Aborted));
        assert_eq!(pending.remaining(), 1);

        assert!(pending.complete(0, CallStatus::Cancelled));
        assert_eq!(pending.remaining(), 0);

        let report = rx.try_recv().unwrap();
        assert_eq!(report.calls[0].status, CallStatus::Cancelled);
        assert_eq!(report.calls[1].status, CallStatus::Succeeded);

        // Late reports after resolution are ignored.
        assert!(!pending.complete(5, CallStatus::Succeeded));
        assert!(!pending.complete(0, CallStatus::Succeeded));
    }

    #[test]
    fn test_dropped_guard_reports_aborted() {
        let (pending, mut rx) = PendingCall::new(vec![3]);
        drop(CompletionGuard::new(Arc::clone(&pending), 0));
        let report = rx.try_recv().unwrap();
        assert_eq!(report.calls[0].server, 3);
        assert_eq!(report.calls[0].status, CallStatus::Aborted);
    }

    #[tokio::test]
    async fn test_dispatch_runs_handler_per_call() {
        let coord = coordinator(EchoTransport::new(3).with_delay(Duration::from_millis(2)));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let report = coord
            .dispatch(
                calls(&[2, 0, 1]),
                move |index, bytes| {
                    sink.lock().unwrap().push((index, bytes[0]));
                    Ok(())
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.calls.iter().map(|c| c.server).collect::<Vec<_>>(), vec![2, 0, 1]);

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![(0, 2), (1, 0), (2, 1)]);
        assert_eq!(coord.server_stats(2).successes, 1);
    }

    #[tokio::test]
    async fn test_partial_failure_is_success() {
        let coord = coordinator(EchoTransport::new(3).failing(&[1]));
        let report = coord
            .dispatch(calls(&[0, 1, 2]), |_, _| Ok(()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 2);
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].server, 1);
        assert!(matches!(failures[0].status, CallStatus::TransportFailed(_)));
        assert_eq!(coord.server_stats(1).failures, 1);
    }

    #[tokio::test]
    async fn test_all_failed_is_error() {
        let coord = coordinator(EchoTransport::new(2).failing(&[0, 1]));
        let err = coord
            .dispatch(calls(&[0, 1]), |_, _| Ok(()), CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ClientError::AllCallsFailed(outcomes) => assert_eq!(outcomes.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_abort_siblings() {
        let coord = coordinator(EchoTransport::new(2));
        let report = coord
            .dispatch(
                calls(&[0, 1]),
                |index, _| {
                    if index == 0 {
                        Err(DecodeError::PayloadMismatch { declared: 12, actual: 0 }.into())
                    } else {
                        Ok(())
                    }
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(report.calls[0].status, CallStatus::DecodeFailed(_)));
        assert!(report.calls[1].status.is_success());
    }

    #[tokio::test]
    async fn test_empty_dispatch_resolves_immediately() {
        let coord = coordinator(EchoTransport::new(1));
        let report = coord
            .dispatch(Vec::new(), |_, _| Ok(()), CancellationToken::new())
            .await
            .unwrap();
        assert!(report.calls.is_empty());
        assert!(!report.all_failed());
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transport_failure() {
        let transport = EchoTransport::new(2).with_delay(Duration::from_millis(200));
        let coord = CallCoordinator::new(
            Arc::new(transport),
            Duration::from_millis(20),
            Arc::new(ClientMetrics::new().unwrap()),
        );

        let err = coord
            .dispatch(calls(&[0, 1]), |_, _| Ok(()), CancellationToken::new())
            .await
            .unwrap_err();
        let ClientError::AllCallsFailed(outcomes) = err else {
            panic!("expected aggregate failure");
        };
        assert!(outcomes.iter().all(|o| matches!(
            o.status,
            CallStatus::TransportFailed(TransportError::Timeout { timeout_ms: 20 })
        )));
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch_sends_nothing() {
        let transport = EchoTransport::new(2);
        let sent = Arc::clone(&transport.sent);
        let coord = coordinator(transport);
        let handled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&handled);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = coord
            .dispatch(
                calls(&[0, 1]),
                move |_, _| {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                },
                cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Cancelled));
        assert!(!handled.load(Ordering::SeqCst));
        assert_eq!(sent.load(Ordering::SeqCst), 0);
        // Skipped calls are not held against the servers.
        assert_eq!(coord.server_stats(0), ServerCallStats::default());
        assert_eq!(coord.server_stats(1), ServerCallStats::default());
    }

    #[tokio::test]
    async fn test_cancel_during_flight_drops_responses() {
        let transport = EchoTransport::new(2).with_delay(Duration::from_millis(20));
        let sent = Arc::clone(&transport.sent);
        let coord = coordinator(transport);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let err = coord
            .dispatch(calls(&[0, 1]), |_, _| Ok(()), cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Cancelled));
        // Both calls were already in flight and ran to completion.
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_after_last_response_keeps_results() {
        let coord = coordinator(EchoTransport::new(2));
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let report = coord
            .dispatch(
                calls(&[0, 1]),
                move |_, _| {
                    if counter.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                        trigger.cancel();
                    }
                    Ok(())
                },
                cancel.clone(),
            )
            .await
            .unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(handled.load(Ordering::SeqCst), 2);
        assert!(report.is_complete());
        assert!(!report.was_cancelled());
    }
}
