pub mod batch;
pub mod cache;
pub mod loader;
pub mod profile;
pub mod ranking;
pub mod scheduler;
pub mod store;
