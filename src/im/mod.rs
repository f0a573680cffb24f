pub mod constant;
pub mod db;
pub mod error;
pub mod message;

pub use error::{Result, StoreError};
