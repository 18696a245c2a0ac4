pub mod context;
pub mod error;
