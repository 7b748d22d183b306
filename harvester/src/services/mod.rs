pub mod collector;
pub mod export;
pub mod extractor;
pub mod filter;
pub mod identity_store;
pub mod pipeline;
pub mod scheduler;
