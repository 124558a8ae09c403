// Adapters layer: concrete implementations for external systems (backend, storage).

pub mod http;
pub mod memory;
pub mod storage;

pub use http::RestClient;
pub use memory::InMemoryBackend;
pub use storage::LocalStorage;
