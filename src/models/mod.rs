//! Data models for Remedi chat entities

pub mod de;
mod message;
mod notification;
mod user;

pub use message::*;
pub use notification::*;
pub use user::*;
