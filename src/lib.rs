pub mod api;
pub mod clock;
pub mod config;
pub mod logging;
pub mod models;
pub mod persist;
pub mod pool;
pub mod ranking_cache;
pub mod replay_cache;
pub mod replay_stats;
pub mod search;
pub mod transport;
