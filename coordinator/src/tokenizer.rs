//! Tokenizer seam.
//!
//! Real text↔token mapping (BPE vocabularies, merges) is an external
//! collaborator; the coordinator only needs the narrow contract below.
//! [`CharTokenizer`] is the in-tree implementation: one token per char,
//! enough to drive every pipeline path end to end.

use protocol::Token;

/// The tokenizer contract the query lifecycle depends on.
pub trait Tokenizer: Send + Sync {
    /// Split text into tokens.
    fn encode(&self, text: &str) -> Vec<Token>;

    /// Decode token ids back into text.
    fn decode(&self, ids: &[u32]) -> String;

    /// The end-of-text token that terminates generation (and substitutes
    /// for an empty prompt).
    fn eos(&self) -> Token;
}

/// Char-code tokenization: token id == Unicode scalar value.
pub struct CharTokenizer {
    eos_id: u32,
}

impl CharTokenizer {
    pub fn new(eos_id: u32) -> Self {
        Self { eos_id }
    }
}

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Vec<Token> {
        text.chars()
            .map(|c| Token::new(c as u32, c.to_string()))
            .collect()
    }

    fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .map(|&id| {
                if id == self.eos_id {
                    String::new()
                } else {
                    char::from_u32(id).map(String::from).unwrap_or_default()
                }
            })
            .collect()
    }

    fn eos(&self) -> Token {
        Token::new(self.eos_id, "<|endoftext|>")
    }
}
