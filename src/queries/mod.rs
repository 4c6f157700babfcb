pub mod attachments;
pub mod chats;
pub mod documents;
pub mod messages;
pub mod settings;
pub mod users;
