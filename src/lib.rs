//! # Stratus
//!
//! Declarative controller dispatch for axum.
//!
//! Controllers describe their routes once at boot. Stratus turns those
//! descriptions into a route table with a fixed pipeline per route:
//! rate limiting, authentication, parameter injection, marker-driven
//! processors, the handler itself, then marshalling or view rendering.
//! Every failure on the way goes through one error handler.
//!
//! ## Features
//!
//! - **Route registry**: `{name}`, `{id:int}`, `{id:uuid}` and `*` segments, most specific match wins
//! - **Parameter injection**: annotation table first, type table second, unresolved parameters abort boot
//! - **Processors**: markers such as [`processor::View`] become pre/post handlers in an onion chain
//! - **Services**: singletons with start/stop hooks, periodic tasks, bus consumers and cached proxies
//! - **Errors**: error pages for view routes, marshalled payloads for API routes, stack traces only on request
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratus::prelude::*;
//!
//! struct DogController;
//!
//! impl DogController {
//!     async fn find(&self, id: i64) -> DispatchResult<serde_json::Value> {
//!         Ok(serde_json::json!({ "id": id, "name": "Snoopy" }))
//!     }
//! }
//!
//! impl Controller for DogController {
//!     fn describe(self: Arc<Self>) -> ControllerDescriptor {
//!         ControllerDescriptor::new("/dogs").route(
//!             RouteDescriptor::get("/{id:int}")
//!                 .param(ParamDescriptor::path::<i64>("id"))
//!                 .bind(&self, |this, mut params| async move {
//!                     this.find(params.take::<i64>("id")?).await
//!                 }),
//!         )
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> stratus::error::Result<()> {
//!     let app = Application::builder()
//!         .controller(DogController)
//!         .build()
//!         .await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     app.serve(listener).await
//! }
//! ```

pub mod auth;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod exception;
pub mod inject;
pub mod interceptor;
pub mod lifecycle;
pub mod marshal;
pub mod processor;
pub mod routing;
pub mod service;
pub mod throttle;
pub mod view;

pub use error::{Result, StratusError};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use stratus::prelude::*;
/// ```
pub mod prelude {
    pub use crate::auth::{AuthMethod, AuthProvider, AuthRequirement, Principal};
    pub use crate::config::Config;
    pub use crate::controller::{Controller, ControllerDescriptor, RouteDescriptor};
    pub use crate::dispatch::{DispatchService, Dispatcher, Exchange};
    pub use crate::error::{Result, StratusError};
    pub use crate::exception::{DispatchError, DispatchResult, HttpException};
    pub use crate::inject::{ParamDescriptor, Params};
    pub use crate::interceptor::{Interceptor, Next};
    pub use crate::lifecycle::{Application, ApplicationBuilder};
    pub use crate::marshal::Payload;
    pub use crate::processor::{Flow, Processor, ResponseHeader, View};
    pub use crate::service::{ManagedService, ServiceDefinition, ServiceFactories, ServiceRegistry};
    pub use async_trait::async_trait;
    pub use axum::http::StatusCode;
    pub use std::sync::Arc;
}
