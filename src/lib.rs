//! mapify library - turns lists of map links into grouped, rendered maps and
//! keeps a versioned store of places and markers.

pub mod config;
pub mod db;
pub mod enrich;
pub mod error;
pub mod geo;
pub mod grouping;
pub mod input;
pub mod links;
pub mod models;
pub mod progress;
pub mod render;
pub mod safety;

pub use error::{Error, Result};
