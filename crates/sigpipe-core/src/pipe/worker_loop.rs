//! WorkerLoop - inbound を drain して Transform を回すループ
//!
//! # フロー
//! 1. inbound から envelope を 1 件 take（来るか close されるまで待つ）
//! 2. 起きたら state を再確認。Closed なら残りの入力は処理せずに抜ける
//! 3. Transform::process を実行
//! 4. 出力を順番どおり outbound に push
//!
//! worker がどんな理由で終わっても（panic を含む）pipe は Closed になるので、
//! read で待っている consumer が取り残されることはありません。

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, error, trace, warn};

use super::Shared;
use super::config::FailurePolicy;
use crate::domain::Envelope;
use crate::error::PipeError;
use crate::transform::Transform;

/// Closes the pipe when the worker future finishes or unwinds.
struct CloseOnExit<'a, In, Out>(&'a Shared<In, Out>);

impl<In, Out> Drop for CloseOnExit<'_, In, Out> {
    fn drop(&mut self) {
        self.0.close();
    }
}

pub(crate) async fn run<In, Out>(
    shared: Arc<Shared<In, Out>>,
    mut transform: Box<dyn Transform<In, Out>>,
) -> Result<(), PipeError>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    let shared = &*shared;
    let _close_on_exit = CloseOnExit(shared);
    debug!("worker started");

    loop {
        trace!("waiting for signal data");
        let Some(envelope) = shared.inbound.take().await else {
            break;
        };

        // take は close 後も残りを返すので、ここで state を見て drain しない
        if shared.is_closed() {
            abandon_input(shared, 1);
            break;
        }

        trace!(envelope = %envelope.id(), stream = %envelope.stream(), "processing envelope");
        match transform.process(envelope) {
            Ok(outputs) => {
                shared.counters.processed.fetch_add(1, Ordering::Relaxed);
                publish(shared, outputs);
            }
            Err(err) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                match shared.config.failure_policy {
                    FailurePolicy::Halt => {
                        error!(error = %err, "transform failed; halting worker");
                        shared.close();
                        abandon_input(shared, 0);
                        return Err(PipeError::Transform {
                            pipe: shared.config.name.clone(),
                            source: err,
                        });
                    }
                    FailurePolicy::Skip => {
                        warn!(error = %err, "transform failed; skipping envelope");
                    }
                }
            }
        }
    }

    debug!("worker stopped");
    Ok(())
}

/// Push outputs in emission order. Anything produced after closure is dropped.
fn publish<In, Out>(shared: &Shared<In, Out>, outputs: Vec<Envelope<Out>>) {
    for output in outputs {
        if shared.is_closed() || shared.outbound.push(output).is_err() {
            shared.counters.discarded.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        shared.counters.emitted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Count `taken` envelopes already off the queue plus whatever is still queued.
fn abandon_input<In, Out>(shared: &Shared<In, Out>, taken: usize) {
    let abandoned = taken + shared.inbound.clear();
    if abandoned > 0 {
        debug!(abandoned, "pipe closed; dropping unprocessed input");
        shared
            .counters
            .discarded
            .fetch_add(abandoned as u64, Ordering::Relaxed);
    }
}
