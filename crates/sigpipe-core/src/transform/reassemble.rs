//! Multi-part message reassembly.

use std::collections::{BTreeMap, HashMap};

use crate::domain::{Envelope, MessageId, StreamId};
use crate::error::TransformError;

use super::Transform;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReassemblyError {
    #[error("{stream}/{message}: part {index} received twice")]
    DuplicatePart {
        stream: StreamId,
        message: MessageId,
        index: u32,
    },

    #[error("{stream}/{message}: expected {expected} parts but a part announced {announced}")]
    InconsistentTotal {
        stream: StreamId,
        message: MessageId,
        expected: u32,
        announced: u32,
    },
}

struct PartialMessage<T> {
    total: u32,
    parts: BTreeMap<u32, T>,
}

/// Collects the parts of each `(stream, message)` and emits the payloads in
/// index order once every part has arrived.
///
/// Envelopes without a part are complete on their own and come out as a
/// one-element vector. Parts may arrive in any order; parts of different
/// messages may interleave.
pub struct Reassembler<T> {
    pending: HashMap<(StreamId, MessageId), PartialMessage<T>>,
}

impl<T> Reassembler<T> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Number of messages still waiting for parts.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn accept(&mut self, input: Envelope<T>) -> Result<Option<Envelope<Vec<T>>>, ReassemblyError> {
        let Some(part) = input.part().copied() else {
            return Ok(Some(input.map(|payload| vec![payload])));
        };

        let stream = input.stream().clone();
        let key = (stream.clone(), part.message());
        let entry = self.pending.entry(key.clone()).or_insert_with(|| PartialMessage {
            total: part.total(),
            parts: BTreeMap::new(),
        });

        if entry.total != part.total() {
            return Err(ReassemblyError::InconsistentTotal {
                stream,
                message: part.message(),
                expected: entry.total,
                announced: part.total(),
            });
        }
        if entry.parts.contains_key(&part.index()) {
            return Err(ReassemblyError::DuplicatePart {
                stream,
                message: part.message(),
                index: part.index(),
            });
        }

        entry.parts.insert(part.index(), input.into_payload());
        if entry.parts.len() < entry.total as usize {
            return Ok(None);
        }

        let complete = self.pending.remove(&key).map(|m| m.parts.into_values().collect::<Vec<T>>());
        Ok(complete.map(|payloads| Envelope::new(stream, payloads)))
    }
}

impl<T> Default for Reassembler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Transform<T, Vec<T>> for Reassembler<T> {
    fn process(&mut self, input: Envelope<T>) -> Result<Vec<Envelope<Vec<T>>>, TransformError> {
        Ok(self.accept(input)?.into_iter().collect())
    }
}
