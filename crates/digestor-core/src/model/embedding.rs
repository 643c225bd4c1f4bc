use serde::{Deserialize, Serialize};

use super::Vector;

/// The embedding currently on file for a `ContentItem`. Unique per item;
/// replaced wholesale whenever `model`/`dims` change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Embedding {
    pub content_item_id: String,
    pub model: String,
    pub dims: usize,
    pub vector: Vector,
}

impl Embedding {
    pub fn matches_model(&self, model: &str, dims: usize) -> bool {
        self.model == model && self.dims == dims
    }
}
