//! Lexical hash-embedding encoder.
//!
//! A text is tokenized, each unigram (and optionally each adjacent bigram) is
//! hashed into one of `dim` buckets, counts are damped with `ln(1 + x)` and the
//! result is scaled to unit length. Identical input and dimension always give a
//! bit-identical vector.

use crate::error::{Error, Result};
use crate::hasher::{bigram_key, bucket, unigram_key};
use crate::tokenizer::tokenize;

/// Dimension used when none is configured.
pub const DEFAULT_DIMENSION: usize = 512;

/// Encodes `text` into a vector of exactly `dim` components.
///
/// Returns the all-zero vector when the text has no tokens.
pub fn encode(text: &str, dim: usize, use_bigrams: bool) -> Vec<f32> {
    let mut vector = vec![0.0f32; dim];
    if dim == 0 {
        return vector;
    }
    let tokens = tokenize(text);
    for token in &tokens {
        vector[bucket(&unigram_key(token), dim)] += 1.0;
    }
    if use_bigrams && tokens.len() >= 2 {
        for pair in tokens.windows(2) {
            vector[bucket(&bigram_key(&pair[0], &pair[1]), dim)] += 1.0;
        }
    }
    for value in vector.iter_mut() {
        *value = value.ln_1p();
    }
    let norm = l2_norm(&vector);
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
    vector
}

/// Euclidean length of `values`.
pub fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|value| value * value).sum::<f32>().sqrt()
}

/// Stateless encoder bound to one dimension and bigram setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashEncoder {
    dim: usize,
    use_bigrams: bool,
}

impl HashEncoder {
    /// Builds an encoder with bigram features enabled.
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::Config(
                "embedding dimension must be positive".to_string(),
            ));
        }
        Ok(Self {
            dim,
            use_bigrams: true,
        })
    }

    /// Toggles bigram features.
    pub fn with_bigrams(mut self, use_bigrams: bool) -> Self {
        self.use_bigrams = use_bigrams;
        self
    }

    /// Output dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Whether adjacent token pairs contribute features.
    pub fn use_bigrams(&self) -> bool {
        self.use_bigrams
    }

    /// Encodes `text` with this encoder's settings.
    pub fn encode(&self, text: &str) -> Vec<f32> {
        encode(text, self.dim, self.use_bigrams)
    }
}

impl Default for HashEncoder {
    fn default() -> Self {
        Self {
            dim: DEFAULT_DIMENSION,
            use_bigrams: true,
        }
    }
}
