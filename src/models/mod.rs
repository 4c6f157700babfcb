pub mod attachments;
pub mod chat;
pub mod documents;
pub mod requests;
pub mod settings;
pub mod sse;
pub mod users;
