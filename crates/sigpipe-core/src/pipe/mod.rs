//! Pipe - inbound / outbound の 2 本の Channel と 1 本の worker をまとめたもの
//!
//! # 主要コンポーネント
//! - **Pipe**: write / read / close の façade
//! - **PipeWriter**: 複数 producer 向けの clone 可能な書き込みハンドル
//! - **worker_loop**: inbound → Transform → outbound を回すバックグラウンドタスク
//! - **PipeConfig / FailurePolicy**: 名前と Transform 失敗時の方針
//! - **PipeStats**: queue の深さとカウンタ
//!
//! # 使用例
//! ```ignore
//! let pipe = Pipe::spawn(Identity);
//! pipe.write(Envelope::new("peer", "hello"))?;
//! let out = pipe.read().await; // Some(envelope)
//! pipe.close();
//! assert!(pipe.read().await.is_none());
//! ```

pub mod config;
pub mod state;
pub mod stats;
mod worker_loop;

pub use self::config::{FailurePolicy, PipeConfig};
pub use self::state::PipeState;
pub use self::stats::PipeStats;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, debug_span};

use crate::channel::Channel;
use crate::domain::Envelope;
use crate::error::{PipeError, WriteRejected};
use crate::transform::Transform;

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    processed: AtomicU64,
    emitted: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

/// State shared by the façade, its writers and the worker.
struct Shared<In, Out> {
    config: PipeConfig,
    inbound: Channel<Envelope<In>>,
    outbound: Channel<Envelope<Out>>,
    lifecycle: watch::Sender<PipeState>,
    counters: Counters,
}

impl<In, Out> Shared<In, Out> {
    fn new(config: PipeConfig) -> Self {
        let (lifecycle, _) = watch::channel(PipeState::Open);
        Self {
            config,
            inbound: Channel::new(),
            outbound: Channel::new(),
            lifecycle,
            counters: Counters::default(),
        }
    }

    fn state(&self) -> PipeState {
        *self.lifecycle.borrow()
    }

    fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Open -> Closed, then wake the worker and every reader.
    ///
    /// The state flips before the channels close so that a woken worker always
    /// observes Closed.
    fn close(&self) -> bool {
        let transitioned = self.lifecycle.send_if_modified(|state| {
            if *state == PipeState::Open {
                *state = PipeState::Closed;
                true
            } else {
                false
            }
        });
        self.inbound.close();
        self.outbound.close();
        if transitioned {
            debug!(pipe = %self.config.name, "pipe closed");
        }
        transitioned
    }

    fn write(&self, envelope: Envelope<In>) -> Result<(), WriteRejected<Envelope<In>>> {
        match self.inbound.push(envelope) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(envelope) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(pipe = %self.config.name, envelope = %envelope.id(), "write after close rejected");
                Err(WriteRejected::new(self.config.name.clone(), envelope))
            }
        }
    }

    fn stats(&self) -> PipeStats {
        PipeStats {
            state: self.state(),
            inbound_depth: self.inbound.len(),
            outbound_depth: self.outbound.len(),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Asynchronous signal pipe with exactly one worker.
///
/// - `write` never waits. Per-producer order is preserved end to end.
/// - `read` waits for the next output and returns `None` once the pipe is
///   closed and every queued output has been read.
/// - `close` is idempotent. The worker stops without processing what is still
///   queued; outputs already published stay readable.
/// - Dropping the pipe closes it.
pub struct Pipe<In, Out> {
    shared: Arc<Shared<In, Out>>,
    worker: Mutex<Option<JoinHandle<Result<(), PipeError>>>>,
}

impl<In, Out> Pipe<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Start a pipe with the default config.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    pub fn spawn<T: Transform<In, Out>>(transform: T) -> Self {
        Self::spawn_with_config(transform, PipeConfig::default())
    }

    /// Start a pipe. The worker is spawned immediately and is never replaced.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    pub fn spawn_with_config<T: Transform<In, Out>>(transform: T, config: PipeConfig) -> Self {
        let span = debug_span!("pipe_worker", pipe = %config.name);
        let shared = Arc::new(Shared::new(config));
        let worker = tokio::spawn(
            worker_loop::run(Arc::clone(&shared), Box::new(transform)).instrument(span),
        );

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }
}

impl<In, Out> Pipe<In, Out> {
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &PipeConfig {
        &self.shared.config
    }

    /// Enqueue one envelope for the worker.
    ///
    /// After close the envelope is handed back inside [`WriteRejected`]. A
    /// write racing with close may still be accepted and then never processed.
    pub fn write(&self, envelope: Envelope<In>) -> Result<(), WriteRejected<Envelope<In>>> {
        self.shared.write(envelope)
    }

    /// A cloneable handle for producers. It does not keep the pipe open.
    pub fn writer(&self) -> PipeWriter<In, Out> {
        PipeWriter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Wait for the next output. `None` once closed and fully drained.
    pub async fn read(&self) -> Option<Envelope<Out>> {
        self.shared.outbound.take().await
    }

    /// Next output if one is queued right now.
    pub fn try_read(&self) -> Option<Envelope<Out>> {
        self.shared.outbound.try_take()
    }

    /// Close the pipe and wake the worker and all readers.
    ///
    /// Returns `true` if this call closed it, `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    pub fn state(&self) -> PipeState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Resolves once the pipe is Closed, whoever closed it.
    pub async fn closed(&self) {
        let mut rx = self.shared.lifecycle.subscribe();
        // the sender lives in `shared`, so this only fails if it is already gone
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }

    pub fn stats(&self) -> PipeStats {
        self.shared.stats()
    }

    /// Close, wait for the worker to exit, and return the final stats.
    ///
    /// Returns the worker's error if the transform halted it or panicked.
    /// The worker can be joined once; later calls return `AlreadyJoined`.
    pub async fn shutdown(&self) -> Result<PipeStats, PipeError> {
        self.close();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return Err(PipeError::AlreadyJoined(self.name().to_string()));
        };

        match worker.await {
            Ok(Ok(())) => Ok(self.stats()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(PipeError::WorkerPanicked {
                pipe: self.name().to_string(),
                message: panic_message(join_err),
            }),
        }
    }
}

impl<In, Out> Drop for Pipe<In, Out> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string()),
        Err(err) => err.to_string(),
    }
}

/// Producer-side handle of a [`Pipe`].
pub struct PipeWriter<In, Out> {
    shared: Arc<Shared<In, Out>>,
}

impl<In, Out> PipeWriter<In, Out> {
    pub fn write(&self, envelope: Envelope<In>) -> Result<(), WriteRejected<Envelope<In>>> {
        self.shared.write(envelope)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl<In, Out> Clone for PipeWriter<In, Out> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageId, Part};
    use crate::error::TransformError;
    use crate::transform::{Identity, Reassembler, from_fn};
    use rstest::rstest;
    use std::time::Duration;
    use tokio::time::timeout;

    const BLOCKED: Duration = Duration::from_millis(100);
    const PROMPT: Duration = Duration::from_secs(1);

    fn env(payload: &'static str) -> Envelope<&'static str> {
        Envelope::new("peer", payload)
    }

    fn payloads<T: Clone>(envelopes: &[Envelope<T>]) -> Vec<T> {
        envelopes.iter().map(|e| e.payload().clone()).collect()
    }

    #[tokio::test]
    async fn identity_reads_back_abc_then_none_after_close() {
        let pipe = Pipe::spawn(Identity);
        let written = vec![env("A"), env("B"), env("C")];
        for e in &written {
            pipe.write(e.clone()).unwrap();
        }

        let mut read = Vec::new();
        for _ in 0..3 {
            read.push(timeout(PROMPT, pipe.read()).await.unwrap().unwrap());
        }
        // pass-through keeps the envelopes untouched
        assert_eq!(read, written);

        assert!(pipe.close());
        assert!(timeout(PROMPT, pipe.read()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn outputs_follow_write_order_and_emission_order() {
        let fan_out = from_fn(|e: Envelope<u32>| {
            let n = *e.payload();
            Ok(vec![e.clone().map(|_| n * 10), e.map(|_| n * 10 + 1)])
        });
        let pipe = Pipe::spawn(fan_out);

        for n in 0..50u32 {
            pipe.write(Envelope::new("peer", n)).unwrap();
        }

        let mut read = Vec::new();
        for _ in 0..100 {
            read.push(*timeout(PROMPT, pipe.read()).await.unwrap().unwrap().payload());
        }
        let expected: Vec<u32> = (0..50).flat_map(|n| [n * 10, n * 10 + 1]).collect();
        assert_eq!(read, expected);
    }

    #[tokio::test]
    async fn buffering_transform_blocks_reader_until_nth_write() {
        let mut buffer = Vec::new();
        let every_third = from_fn(move |e: Envelope<&'static str>| {
            buffer.push(*e.payload());
            if buffer.len() < 3 {
                return Ok(vec![]);
            }
            Ok(vec![Envelope::new(e.stream().clone(), buffer.drain(..).collect::<Vec<_>>().join("+"))])
        });
        let pipe = Pipe::spawn(every_third);

        pipe.write(env("a")).unwrap();
        pipe.write(env("b")).unwrap();
        assert!(timeout(BLOCKED, pipe.read()).await.is_err());

        pipe.write(env("c")).unwrap();
        let out = timeout(PROMPT, pipe.read()).await.unwrap().unwrap();
        assert_eq!(out.payload(), "a+b+c");
        assert!(pipe.try_read().is_none());
    }

    #[tokio::test]
    async fn pairs_complete_only_when_both_halves_arrive() {
        let pipe = Pipe::spawn(Reassembler::new());
        let x = MessageId::generate();
        let y = MessageId::generate();

        pipe.write(env("X1").with_part(Part::new(x, 0, 2).unwrap())).unwrap();
        pipe.write(env("X2").with_part(Part::new(x, 1, 2).unwrap())).unwrap();
        pipe.write(env("Y1").with_part(Part::new(y, 0, 2).unwrap())).unwrap();

        let combined = timeout(PROMPT, pipe.read()).await.unwrap().unwrap();
        assert_eq!(combined.payload(), &vec!["X1", "X2"]);

        // Y1 never completes: the next read waits until closure
        assert!(timeout(BLOCKED, pipe.read()).await.is_err());
        pipe.close();
        assert!(timeout(PROMPT, pipe.read()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_wakes_a_blocked_reader() {
        let pipe = Arc::new(Pipe::<&'static str, &'static str>::spawn(Identity));

        let reader = tokio::spawn({
            let pipe = pipe.clone();
            async move { pipe.read().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        pipe.close();
        let out = timeout(PROMPT, reader).await.unwrap().unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let pipe = Pipe::<&'static str, &'static str>::spawn(Identity);
        assert_eq!(pipe.state(), PipeState::Open);

        assert!(pipe.close());
        assert!(!pipe.close());
        assert_eq!(pipe.state(), PipeState::Closed);
        timeout(PROMPT, pipe.closed()).await.unwrap();

        let stats = pipe.shutdown().await.unwrap();
        assert_eq!(stats.state, PipeState::Closed);
    }

    #[tokio::test]
    async fn outputs_queued_before_close_can_still_be_read() {
        let pipe = Pipe::spawn(Identity);
        pipe.write(env("A")).unwrap();
        pipe.write(env("B")).unwrap();

        // wait until both made it through
        while pipe.stats().emitted < 2 {
            tokio::task::yield_now().await;
        }
        pipe.close();

        assert_eq!(pipe.read().await.unwrap().payload(), &"A");
        assert_eq!(pipe.read().await.unwrap().payload(), &"B");
        assert!(pipe.read().await.is_none());
    }

    #[tokio::test]
    async fn write_after_close_is_rejected_with_the_envelope() {
        let pipe = Pipe::<&'static str, &'static str>::spawn(Identity);
        pipe.close();

        let e = env("late");
        let id = e.id();
        let rejected = pipe.write(e).unwrap_err();
        assert_eq!(rejected.pipe(), "pipe");
        assert_eq!(rejected.into_envelope().id(), id);

        let stats = pipe.stats();
        assert_eq!(stats.accepted, 0);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_stops_the_worker_without_draining_input() {
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let mut started_tx = Some(started_tx);
        let gated = from_fn(move |e: Envelope<&'static str>| {
            if let Some(tx) = started_tx.take() {
                let _ = tx.send(());
                // hold the worker inside the transform until the test says so
                let _ = release_rx.recv();
            }
            Ok(vec![e])
        });
        let pipe = Pipe::spawn(gated);

        pipe.write(env("first")).unwrap();
        timeout(PROMPT, started_rx).await.unwrap().unwrap();
        pipe.write(env("second")).unwrap();
        pipe.write(env("third")).unwrap();

        pipe.close();
        release_tx.send(()).unwrap();

        let stats = timeout(PROMPT, pipe.shutdown()).await.unwrap().unwrap();
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.emitted, 0);
        // "first"'s output plus the two queued inputs
        assert_eq!(stats.discarded, 3);
        assert_eq!(stats.inbound_depth, 0);
        assert!(pipe.read().await.is_none());
    }

    fn fail_on_bad() -> impl Transform<&'static str, &'static str> {
        from_fn(|e: Envelope<&'static str>| {
            if *e.payload() == "bad" {
                return Err(TransformError::Rejected("bad payload".to_string()));
            }
            Ok(vec![e])
        })
    }

    #[tokio::test]
    async fn halt_policy_closes_the_pipe_on_failure() {
        let pipe = Pipe::spawn(fail_on_bad());
        pipe.write(env("ok")).unwrap();
        pipe.write(env("bad")).unwrap();

        timeout(PROMPT, pipe.closed()).await.unwrap();
        assert!(pipe.write(env("never")).is_err());

        assert_eq!(pipe.read().await.unwrap().payload(), &"ok");
        assert!(pipe.read().await.is_none());

        let err = pipe.shutdown().await.unwrap_err();
        assert!(matches!(
            err,
            PipeError::Transform { ref pipe, source: TransformError::Rejected(_) } if pipe == "pipe"
        ));
        let stats = pipe.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn skip_policy_keeps_going_after_failure() {
        let config = PipeConfig::named("lenient").with_failure_policy(FailurePolicy::Skip);
        let pipe = Pipe::spawn_with_config(fail_on_bad(), config);

        for p in ["a", "bad", "b"] {
            pipe.write(env(p)).unwrap();
        }
        let first = timeout(PROMPT, pipe.read()).await.unwrap().unwrap();
        let second = timeout(PROMPT, pipe.read()).await.unwrap().unwrap();
        assert_eq!(payloads(&[first, second]), vec!["a", "b"]);
        assert_eq!(pipe.state(), PipeState::Open);

        let stats = pipe.shutdown().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.emitted, 2);
    }

    #[tokio::test]
    async fn panicking_transform_closes_the_pipe() {
        let pipe = Pipe::spawn(from_fn(|_: Envelope<&'static str>| -> Result<Vec<Envelope<&'static str>>, TransformError> {
            panic!("boom")
        }));
        pipe.write(env("x")).unwrap();

        assert!(timeout(PROMPT, pipe.read()).await.unwrap().is_none());
        assert!(pipe.is_closed());

        let err = pipe.shutdown().await.unwrap_err();
        assert!(matches!(err, PipeError::WorkerPanicked { ref message, .. } if message == "boom"));
    }

    #[tokio::test]
    async fn worker_can_be_joined_only_once() {
        let pipe = Pipe::<&'static str, &'static str>::spawn(Identity);
        pipe.shutdown().await.unwrap();
        assert!(matches!(pipe.shutdown().await, Err(PipeError::AlreadyJoined(_))));
    }

    #[rstest]
    #[case(1)]
    #[case(4)]
    #[tokio::test]
    async fn each_producer_keeps_its_own_order(#[case] producers: usize) {
        let pipe = Pipe::spawn(Identity);
        let per_producer = 200usize;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let writer = pipe.writer();
                tokio::spawn(async move {
                    for i in 0..per_producer {
                        writer.write(Envelope::new(format!("producer-{p}"), i)).unwrap();
                        if i % 16 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let mut seen: Vec<Vec<usize>> = vec![Vec::new(); producers];
        for _ in 0..producers * per_producer {
            let out = timeout(PROMPT, pipe.read()).await.unwrap().unwrap();
            let p: usize = out.stream().as_str()["producer-".len()..].parse().unwrap();
            seen[p].push(*out.payload());
        }
        for s in seen {
            assert_eq!(s, (0..per_producer).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn dropping_the_pipe_closes_its_writers() {
        let pipe = Pipe::<&'static str, &'static str>::spawn(Identity);
        let writer = pipe.writer();
        drop(pipe);

        assert!(writer.is_closed());
        assert!(writer.write(env("late")).is_err());
    }

    #[tokio::test]
    async fn stats_report_queue_depth() {
        let pipe = Pipe::spawn(Identity);
        for p in ["a", "b", "c"] {
            pipe.write(env(p)).unwrap();
        }
        while pipe.stats().emitted < 3 {
            tokio::task::yield_now().await;
        }

        let stats = pipe.stats();
        assert_eq!(stats.outbound_depth, 3);
        assert_eq!(stats.inbound_depth, 0);
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.processed, 3);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["state"], "open");
    }
}
