pub mod codec;
pub mod config;
pub mod density;
pub mod domain;
pub mod error;
pub mod filter;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod record;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod staging;
pub mod window;
