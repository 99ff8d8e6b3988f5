//! PipeConfig - pipe の設定
//!
//! JSON から読めるように serde で (de)serialize します。
//! 省略したフィールドはデフォルト値になります。

use serde::{Deserialize, Serialize};

/// What the worker does when the transform fails on one envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The failure is fatal: the worker stops, the pipe closes, queued input is lost.
    #[default]
    Halt,

    /// Log and count the failure, then continue with the next envelope.
    /// The failed envelope produces no output.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Used in logs and errors.
    pub name: String,
    pub failure_policy: FailurePolicy,
}

impl PipeConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            name: "pipe".to_string(),
            failure_policy: FailurePolicy::Halt,
        }
    }
}
