//! Document records stored in the vector table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unit of retrieval: one article-like row plus its derived embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable unique identifier, used as the upsert conflict key.
    pub id: String,
    /// Headline.
    pub title: String,
    /// Canonical URL of the source article.
    #[serde(default)]
    pub link: String,
    /// Short body text; preferred over the title for embedding.
    #[serde(default)]
    pub summary: String,
    /// Publisher or feed name.
    #[serde(default)]
    pub source_name: String,
    /// Ordered author names.
    #[serde(default)]
    pub authors: Vec<String>,
    /// Ordered tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Publication timestamp as delivered by the feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    /// Row creation time, assigned by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Derived vector; `None` until the synchronizer has written one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    /// Minimal document with only an id and title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            link: String::new(),
            summary: String::new(),
            source_name: String::new(),
            authors: Vec::new(),
            tags: Vec::new(),
            published: None,
            created_at: None,
            embedding: None,
        }
    }

    /// Sets the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Sets the link.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = link.into();
        self
    }

    /// Text the embedding is computed from: the summary, or the title when the
    /// summary is blank.
    pub fn canonical_text(&self) -> &str {
        if self.summary.trim().is_empty() {
            &self.title
        } else {
            &self.summary
        }
    }
}

/// A document returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarDocument {
    /// Matched row, without its embedding.
    #[serde(flatten)]
    pub document: Document,
    /// Distance under the configured metric; lower is closer.
    pub distance: f64,
}

/// Renders hits as `Title:`/`Summary:` blocks for a question-answering prompt.
pub fn render_context(hits: &[SimilarDocument]) -> String {
    hits.iter()
        .map(|hit| {
            let doc = &hit.document;
            if doc.summary.trim().is_empty() {
                format!("Title: {}", doc.title)
            } else {
                format!("Title: {}\nSummary: {}", doc.title, doc.summary)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
