//! On-disk vector index for document and page embeddings.
//!
//! The index is the system of record for vectors: one JSON segment file
//! per document under the index directory, mirrored in memory for
//! search. Vectors are L2-normalized at write time so similarity search
//! is a plain dot product.

mod store;

pub use store::{SearchHit, VectorEntry, VectorIndex};
