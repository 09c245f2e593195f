pub mod baseline;
pub mod defs;
pub mod empty;
pub mod state;

pub use baseline::BaselineSummarizer;
pub use defs::*;
pub use empty::{EmptySummarizer, PassthroughTranslator};
pub use state::{DocumentStore, JsonFileStore, MemoryStore, SqliteDocumentStore, StoreError};
