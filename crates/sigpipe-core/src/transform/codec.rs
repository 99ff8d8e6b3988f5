//! JsonDecode - JSON bytes を型付き payload に変換する Transform
//!
//! decode に失敗した envelope は `TransformError::Decode` になり、
//! その扱い（止める / 飛ばす）は pipe の FailurePolicy が決めます。

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::domain::Envelope;
use crate::error::TransformError;

use super::Transform;

pub struct JsonDecode<T> {
    // fn() -> T keeps JsonDecode Send regardless of T
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecode<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecode<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + 'static> Transform<Vec<u8>, T> for JsonDecode<T> {
    fn process(&mut self, input: Envelope<Vec<u8>>) -> Result<Vec<Envelope<T>>, TransformError> {
        let value: T = serde_json::from_slice(input.payload())?;
        Ok(vec![input.map(|_| value)])
    }
}
