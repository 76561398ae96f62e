pub mod dbdocs;
pub mod memdocs;
pub mod store;

pub use dbdocs::PgDocumentStore;
pub use memdocs::MemoryDocumentStore;
pub use store::{DocumentStore, SharedStore, Subscription};
