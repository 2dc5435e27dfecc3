// Library for tests to access modules

pub mod backfill;
pub mod bucket_store;
pub mod cache;
pub mod config;
pub mod delta;
pub mod derived;
pub mod exposition;
pub mod models;
pub mod pipeline;
pub mod rollup_worker;
pub mod routes;
pub mod scrape;
pub mod upload_repo;
pub mod version;
pub mod worker;
