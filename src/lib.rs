pub mod audit;
pub mod config;
pub mod content_hash;
pub mod contexts;
pub mod data;
pub mod mapping_store;
pub mod path_extraction;
pub mod registries;
pub mod test_output;
