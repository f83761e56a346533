pub mod app;
pub mod builder;
pub mod claims;
pub mod config;
pub mod domain;
pub mod error;
pub mod ncbi;
pub mod normalize;
pub mod output;
pub mod query;
pub mod record;
pub mod resolver;
pub mod store;
pub mod upsert;
pub mod wikibase;
