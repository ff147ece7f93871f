pub mod chat;
pub mod server;
pub mod services;
