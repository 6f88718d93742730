// Library for tests to access modules

pub mod aggregation;
pub mod config;
pub mod engine;
pub mod liveness;
pub mod models;
pub mod normalizer;
pub mod ring_buffer;
pub mod rollup;
pub mod routes;
pub mod scheduler;
pub mod snapshot;
pub mod source;
pub mod version;
pub mod worker;
