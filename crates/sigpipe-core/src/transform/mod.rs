//! Transform - pipe の差し替え可能な変換ロジック
//!
//! # 学習ポイント
//! - ジェネリック trait (`Transform<In, Out>`)
//! - Object-safe なので `Box<dyn Transform<In, Out>>` として worker に渡せる
//! - `&mut self` で内部状態（multi-part の途中経過など）を持てる
//!
//! # 同梱の実装
//! - **Identity**: そのまま流す
//! - **FnTransform**: クロージャを Transform にする
//! - **Reassembler**: multi-part message を組み立てる
//! - **JsonDecode**: JSON bytes を型付き payload に decode する

pub mod codec;
pub mod reassemble;

pub use self::codec::JsonDecode;
pub use self::reassemble::{ReassemblyError, Reassembler};

use crate::domain::Envelope;
use crate::error::TransformError;

/// Transform は 1 つの入力 envelope から 0 個以上の出力 envelope を作る
///
/// # 契約
/// - 戻り値が空なら「まだ出力できない（入力がもっと必要）」
/// - 出力の順序はそのまま outbound に積まれる
/// - worker からのみ、1 つずつ呼ばれる（同時呼び出しはない）
/// - 長時間 block しないこと。block している間は後続の入力がすべて止まる
///
/// # 使用例
/// ```ignore
/// struct Upper;
///
/// impl Transform<String, String> for Upper {
///     fn process(&mut self, input: Envelope<String>) -> Result<Vec<Envelope<String>>, TransformError> {
///         Ok(vec![input.map(|s| s.to_uppercase())])
///     }
/// }
/// ```
pub trait Transform<In, Out>: Send + 'static {
    fn process(&mut self, input: Envelope<In>) -> Result<Vec<Envelope<Out>>, TransformError>;
}

impl<In, Out> Transform<In, Out> for Box<dyn Transform<In, Out>>
where
    In: 'static,
    Out: 'static,
{
    fn process(&mut self, input: Envelope<In>) -> Result<Vec<Envelope<Out>>, TransformError> {
        (**self).process(input)
    }
}

/// Pass-through transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<T: 'static> Transform<T, T> for Identity {
    fn process(&mut self, input: Envelope<T>) -> Result<Vec<Envelope<T>>, TransformError> {
        Ok(vec![input])
    }
}

/// Adapts a closure into a [`Transform`].
pub struct FnTransform<F> {
    f: F,
}

impl<In, Out, F> Transform<In, Out> for FnTransform<F>
where
    F: FnMut(Envelope<In>) -> Result<Vec<Envelope<Out>>, TransformError> + Send + 'static,
{
    fn process(&mut self, input: Envelope<In>) -> Result<Vec<Envelope<Out>>, TransformError> {
        (self.f)(input)
    }
}

/// Build a transform from a closure. The closure may capture buffering state.
pub fn from_fn<In, Out, F>(f: F) -> FnTransform<F>
where
    F: FnMut(Envelope<In>) -> Result<Vec<Envelope<Out>>, TransformError> + Send + 'static,
{
    FnTransform { f }
}
