pub mod config;
pub mod middleware;
pub mod rate_limit;
pub mod server;
pub mod store;

pub use config::ServerConfig;
pub use middleware::ServerMiddleware;
pub use server::UploadEndpoint;
pub use store::PersistenceStore;
