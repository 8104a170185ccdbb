//! REST client for the Remedi backend

pub mod auth;
pub mod chat;
pub mod client;
pub mod notifications;

pub use client::ApiError;
