//! HTTP handlers. Each module maps one slice of the API onto the services.

pub mod admin_handlers;
pub mod auth;
pub mod deploy_handlers;
pub mod health_handlers;
pub mod project_handlers;
