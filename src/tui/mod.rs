//! TUI module for Remedi chat
//!
//! Terminal user interface using Ratatui.

mod app;
mod backend;
mod compose;
mod messages;
mod ui;

pub use app::run;
