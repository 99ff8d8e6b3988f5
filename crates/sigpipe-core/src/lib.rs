//! sigpipe-core
//!
//! 非同期の signal-processing pipe。
//! producer が書いた生の envelope を専用の worker が Transform に通し、
//! 上位の envelope として consumer に渡します。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope）
//! - **channel**: 上限なし・順序保持で close 可能な queue
//! - **transform**: Transform trait と同梱の実装（Identity, Reassembler, JsonDecode）
//! - **pipe**: Pipe façade, worker loop, lifecycle, config, stats
//! - **error**: エラー型
//!
//! ログは `tracing` で出します。subscriber の設定は利用側の責務です。

pub mod channel;
pub mod domain;
pub mod error;
pub mod pipe;
pub mod transform;

pub use channel::Channel;
pub use domain::{Envelope, EnvelopeId, MessageId, Part, PartError, StreamId};
pub use error::{PipeError, TransformError, WriteRejected};
pub use pipe::{FailurePolicy, Pipe, PipeConfig, PipeState, PipeStats, PipeWriter};
pub use transform::{FnTransform, Identity, JsonDecode, Reassembler, ReassemblyError, Transform, from_fn};
