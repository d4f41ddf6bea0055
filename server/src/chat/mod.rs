pub mod broadcast;
pub mod conversations;
pub mod groups;
pub mod messages;
pub mod store;
