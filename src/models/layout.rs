//! Layout analysis results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Zero-or-one layout record per paper.
///
/// `layout_json` is the analyzer's structured payload (sections,
/// paragraphs, tables, figures per page) and is stored opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutAnalysis {
    pub doc_id: String,
    pub page_count: u32,
    pub layout_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LayoutAnalysis {
    pub fn new(doc_id: String, page_count: u32, layout_json: serde_json::Value) -> Self {
        Self {
            doc_id,
            page_count,
            layout_json,
            created_at: Utc::now(),
        }
    }
}
