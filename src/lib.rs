//! Cache-aside entity lookups with negative caching, named key views and a
//! stampede lock, over pluggable key-value and relational stores.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
