pub mod attachments;
pub mod chat;
pub mod codec;
pub mod identity;
pub mod typing;
