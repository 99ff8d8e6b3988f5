//! Envelope - pipe を流れる運搬用データ
//!
//! # 学習ポイント
//! - 不変データ（構築後は accessor のみ）
//! - `map` による所有権の移動を伴う payload の差し替え
//! - 構築時検証（`Part::new`）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{EnvelopeId, MessageId};

/// Origin of a signal (a connection, a peer, a topic...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartError {
    #[error("a multi-part message needs at least one part")]
    ZeroTotal,

    #[error("part index {index} is out of range for a message of {total} parts")]
    IndexOutOfRange { index: u32, total: u32 },
}

/// Part は multi-part message の一片であることを示す
///
/// 同じ `message` を持つ `total` 個の envelope が揃うと 1 つの上位メッセージになる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Part {
    message: MessageId,
    index: u32,
    total: u32,
}

impl Part {
    pub fn new(message: MessageId, index: u32, total: u32) -> Result<Self, PartError> {
        if total == 0 {
            return Err(PartError::ZeroTotal);
        }
        if index >= total {
            return Err(PartError::IndexOutOfRange { index, total });
        }
        Ok(Self {
            message,
            index,
            total,
        })
    }

    pub fn message(&self) -> MessageId {
        self.message
    }

    /// 0-based position within the message.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn total(&self) -> u32 {
        self.total
    }
}

/// Payload + correlation metadata.
///
/// Envelope は構築後に変更できません。payload を差し替えたい場合は
/// `map` で新しい envelope を作ります（id / stream / part は引き継がれる）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    id: EnvelopeId,
    stream: StreamId,
    part: Option<Part>,
    created_at: DateTime<Utc>,
    payload: T,
}

impl<T> Envelope<T> {
    pub fn new(stream: impl Into<StreamId>, payload: T) -> Self {
        Self {
            id: EnvelopeId::generate(),
            stream: stream.into(),
            part: None,
            created_at: Utc::now(),
            payload,
        }
    }

    /// Mark this envelope as one part of a multi-part message.
    pub fn with_part(mut self, part: Part) -> Self {
        self.part = Some(part);
        self
    }

    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    pub fn part(&self) -> Option<&Part> {
        self.part.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Replace the payload, keeping every piece of metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            id: self.id,
            stream: self.stream,
            part: self.part,
            created_at: self.created_at,
            payload: f(self.payload),
        }
    }
}
