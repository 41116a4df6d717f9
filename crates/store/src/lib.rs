#![warn(clippy::unwrap_used)]

pub mod client;
pub mod codec;

pub use client::RedisStore;
