//! Per-hop work inputs and outputs.

use serde::{Deserialize, Serialize};

/// A token id together with its decoded text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: u32,
    pub text: String,
}

impl Token {
    pub fn new(id: u32, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// The input a worker receives for one hop.
///
/// The first segment of a pass gets a raw token; every later segment gets
/// the hidden state produced by the previous hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkInput {
    Token { position: usize, token: u32 },
    HiddenState { values: Vec<f32> },
}

/// The output a worker returns from one hop.
///
/// `Empty` is produced by a tail-bearing segment during input replay
/// (nothing to sample), `HiddenState` by any segment that is not the last
/// of the pass, and `Token` by the tail once generation is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkOutput {
    Empty,
    HiddenState { values: Vec<f32> },
    Token { token: u32 },
}
