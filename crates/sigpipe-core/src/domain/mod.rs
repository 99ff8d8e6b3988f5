//! Domain model (identifiers, envelopes).

pub mod envelope;
pub mod ids;

pub use envelope::{Envelope, Part, PartError, StreamId};
pub use ids::{EnvelopeId, Id, IdMarker, MessageId};
