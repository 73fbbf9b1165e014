pub mod batch;
pub mod config;
pub mod dedup;
pub mod discord;
pub mod model;
pub mod saddlebag;
pub mod scheduler;
pub mod watch;
