//! Channel - 上限なし・順序保持のキュー
//!
//! # 学習ポイント
//! - Mutex + Notify による async の blocking take
//! - `Notified::enable()` で「確認してから待つ」間の通知取りこぼしを防ぐ
//! - close フラグを queue と同じ Mutex で守り、push と close を直列化する
//!
//! 容量の上限はありません。producer が consumer より速ければ queue は伸び続けます。
//! 深さは `len()` で観測できます。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

struct ChannelState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Unbounded FIFO shared between any number of pushers and takers.
///
/// - `push` never waits. It only fails once the channel is closed, handing the
///   item back.
/// - `take` waits until an item is available or the channel is closed. Items
///   queued before `close` are still handed out; `None` means closed *and*
///   empty.
/// - Each item is delivered to exactly one taker.
pub struct Channel<T> {
    state: Mutex<ChannelState<T>>,
    notify: Notify,
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    // The lock is never held across an await and nothing inside can leave the
    // queue half-updated, so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, ChannelState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item. Returns it back as `Err` when the channel is closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(item);
            }
            state.items.push_back(item);
        } // Lock released here

        self.notify.notify_one();
        Ok(())
    }

    /// Take the oldest item without waiting.
    pub fn try_take(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Wait for the oldest item. `None` once the channel is closed and empty.
    pub async fn take(&self) -> Option<T> {
        loop {
            // 先に待機登録してから queue を確認する（確認〜待機の間の通知を失わない）
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Close the channel and wake every waiting taker.
    ///
    /// Returns `true` if this call closed it.
    pub fn close(&self) -> bool {
        let was_open = {
            let mut state = self.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        if was_open {
            self.notify.notify_waiters();
        }
        was_open
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Drop every queued item, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let n = state.items.len();
        state.items.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}
