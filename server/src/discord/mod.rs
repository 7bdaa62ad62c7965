//! Discord-facing side of the bot: wire models, the [`client::GuildClient`]
//! seam the scan engine and cleanup jobs are written against, and the REST
//! implementation of it.

pub mod client;
pub mod models;
pub mod permissions;
pub mod rate_limiter;
pub mod rest;
