pub mod chat;
pub mod chunker;
pub mod crypto;
pub mod embeddings;
pub mod extractor;
pub mod ingestion;
pub mod redactor;
pub mod sessions;
pub mod settings;
pub mod tokens;
pub mod users;
pub mod vector_store;
