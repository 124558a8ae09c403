pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::{InMemoryBackend, LocalStorage, RestClient};
pub use config::AppConfig;
pub use core::{
    etl::TransferEngine, export::ExportPipeline, import::ImportPipeline, service::MealService,
};
pub use utils::error::{MealError, Result};
