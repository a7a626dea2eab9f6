pub mod cache;
pub mod client;
pub mod fetcher;
pub mod payload;

pub use cache::*;
pub use client::*;
pub use fetcher::*;
pub use payload::*;
