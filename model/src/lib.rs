//! Persistence layer of the TPN federation node: SeaORM entities for the
//! worker inventory, mining pools, the two lease tables, and the challenge
//! store, plus the query methods the node's stores and scorers call.

mod error;

pub mod entities;
pub mod methods;

pub use error::{DbErr, Error, Result, ValidationError};
