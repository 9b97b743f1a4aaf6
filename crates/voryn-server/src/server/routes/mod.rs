//! Route modules for the Voryn relay's HTTP surface.
pub mod admin;
pub mod websocket;
