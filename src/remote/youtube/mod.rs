//! YouTube Live as the broadcast platform.

pub mod auth;
pub mod client;

pub use auth::TokenStore;
pub use client::YoutubeClient;
