pub mod cache;
pub mod etl;
pub mod export;
pub mod import;
pub mod service;
pub mod stats;

pub use crate::domain::ports::{Backend, Pipeline, Storage};
pub use crate::utils::error::Result;
