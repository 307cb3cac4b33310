pub mod acquire;
pub mod app;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod ledger;
pub mod mash;
pub mod merge;
pub mod output;
pub mod remote;
pub mod resolver;
pub mod store;
pub mod taxonomy;
pub mod tools;
