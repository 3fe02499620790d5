// Shared components
pub mod config;
pub mod error;
pub mod metrics;

// Dispatch engine
pub mod connection_manager;
pub mod gateway;
pub mod notification;

// Backlog owner
pub mod backlog;
