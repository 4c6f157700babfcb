pub mod admin;
pub mod attachments;
pub mod auth;
pub mod chat;
pub mod chats;
pub mod documents;
pub mod health;
