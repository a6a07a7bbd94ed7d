//! DrugVista Search
//!
//! Retrieval layer providing:
//! - In-memory cosine-similarity vector index
//! - Atomic index replacement with per-run snapshots
//! - Evidence retrieval (embed, search, excerpt, deduplicate)
//! - Corpus loading from the document store and upload parsing

pub mod corpus;
pub mod index;
pub mod retrieval;

pub use corpus::{
    build_index, embed_documents, records_from_upload, text_record, DirectoryCorpus, DocumentSource,
    SourceDocument, StaticSource, UploadFormat,
};
pub use index::{IndexHandle, IndexSnapshot, SearchHit, VectorIndex};
pub use retrieval::{PinnedRetriever, RetrievalOptions, Retriever, VectorRetriever};
