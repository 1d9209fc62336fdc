//! Memory extraction, redaction, and retrieval for the Waypoint runtime
//! (spec §4.5). Retrieval scores candidates by lexical overlap with the
//! prompt, confidence, and recency, not by vector similarity — no
//! embedding/vector-index stack is needed for this spec's scope.

pub mod coordinator;
pub mod extractor;
pub mod policy;
pub mod repository;
pub mod types;

pub use coordinator::{ExtractAndPersistRequest, MemoryCoordinator, RetrieveContextRequest};
pub use extractor::{ExtractedItem, MemoryExtractor};
pub use policy::{MemoryError, MemoryPolicy, MAX_CONTENT_CHARS};
pub use repository::{MemoryRepository, SessionMemoryStore};
pub use types::{
    MemoryClassification, MemoryContext, MemoryEvent, MemoryRetrievalMeta, MemoryScope,
    ScoredMemoryEvent,
};
