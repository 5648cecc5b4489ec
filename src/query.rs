//! Similarity queries over the document table.

use tracing::debug;

use crate::config::DistanceMetric;
use crate::document::SimilarDocument;
use crate::encoder::HashEncoder;
use crate::error::{Error, Result};
use crate::vector_store::VectorStore;

/// Encodes query text with the write-path encoder and ranks stored rows.
pub struct QueryEngine<'a> {
    store: &'a VectorStore,
    encoder: HashEncoder,
}

impl<'a> QueryEngine<'a> {
    /// Binds `encoder` to `store`; their dimensions must agree.
    pub fn new(store: &'a VectorStore, encoder: HashEncoder) -> Result<Self> {
        check_dimension(&encoder, store.dimension())?;
        Ok(Self { store, encoder })
    }

    /// Up to `top_k` documents closest to `text`, nearest first.
    ///
    /// Under cosine distance, text without tokens has no direction to rank by
    /// and yields no hits. Under euclidean distance the zero vector is an
    /// ordinary query point and the store is searched as usual.
    pub async fn query_similar(&self, text: &str, top_k: usize) -> Result<Vec<SimilarDocument>> {
        let planned = plan_query(
            &self.encoder,
            self.store.dimension(),
            self.store.metric(),
            text,
            top_k,
        )?;
        let Some(embedding) = planned else {
            debug!("query text has no tokens; returning no hits");
            return Ok(Vec::new());
        };
        let hits = self.store.nearest(&embedding, top_k).await?;
        debug!(top_k, hits = hits.len(), "similarity query complete");
        Ok(hits)
    }
}

/// Validates a query and encodes it; `None` means a zero vector under cosine.
fn plan_query(
    encoder: &HashEncoder,
    dimension: usize,
    metric: DistanceMetric,
    text: &str,
    top_k: usize,
) -> Result<Option<Vec<f32>>> {
    if top_k == 0 {
        return Err(Error::InvalidTopK);
    }
    check_dimension(encoder, dimension)?;
    let embedding = encoder.encode(text);
    if metric == DistanceMetric::Cosine && embedding.iter().all(|value| *value == 0.0) {
        return Ok(None);
    }
    Ok(Some(embedding))
}

fn check_dimension(encoder: &HashEncoder, dimension: usize) -> Result<()> {
    if encoder.dim() != dimension {
        return Err(Error::DimensionMismatch {
            expected: dimension,
            actual: encoder.dim(),
        });
    }
    Ok(())
}
