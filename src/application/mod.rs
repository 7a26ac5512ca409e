//! Application seams consumed by the cache layer.

pub mod repos;
