//! Synthetic data purge.
//!
//! Rows written by SimCity traffic carry `synthetic_source = 'simcity'`. [Purger::purge] counts
//! (dry run) or deletes them table by table, after refusing outright in production and then
//! checking the caller's credentials.

mod auth;
mod purge;
mod rows;

pub use auth::{
    Caller, Credentials, PurgeAuth, SIMCITY_ADMIN_TOKEN_ENV, SIMCITY_INTERNAL_TOKEN_ENV,
};
pub use purge::{purge_synthetic, PurgeError, PurgeReport, PurgeRequest, Purger, TableResult};
pub use rows::SyntheticRowStore;
