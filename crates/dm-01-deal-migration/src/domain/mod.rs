//! # Domain Module
//!
//! Core domain types for the Deal Migration subsystem.

pub mod classification;
pub mod config;
pub mod errors;
pub mod registration;
pub mod report;
pub mod stream;
pub mod value_objects;

pub use classification::*;
pub use config::*;
pub use errors::*;
pub use registration::*;
pub use report::*;
pub use stream::*;
pub use value_objects::*;
