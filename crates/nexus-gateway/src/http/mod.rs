pub mod chat;
pub mod health;
pub mod message;
pub mod notifications;
pub mod openai_compat;
pub mod ui;
pub mod webhooks;
