//! Security news aggregation with progressive rendering.
//!
//! Feeds are listed in an OPML taxonomy, fetched concurrently, normalized
//! into [`feed::Article`]s, and merged into an in-memory index as each feed
//! lands. A front end drives everything through [`session::FeedSession`].

pub mod config;
pub mod engine;
pub mod export;
pub mod feed;
pub mod index;
pub mod session;
pub mod util;
