pub mod config;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod reports;
pub mod server;

pub use config::{
    AppConfig, AuthSettings, CorsConfig, LoggingConfig, ReportsConfig, ServerConfig,
};
pub use observability::init_tracing;
pub use reports::{DeviceReport, ReportGenerator, ReportsResponse};
pub use server::{AppState, ReportsServer, ServerBuilder, ServerError, build_app};
