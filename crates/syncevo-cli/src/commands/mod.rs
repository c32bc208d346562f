pub mod config;
pub mod introspect;
pub mod list;
pub mod reports;
pub mod serve;
pub mod sync;
