//! BookFinder AI: queued, streamed AI content for book pages.

pub mod config;
pub mod content;
pub mod error;
pub mod queue;
pub mod stream;
pub mod taxonomy;
