pub mod connection_cache;
pub mod database;
pub mod quality_reader;
pub mod repositories;
