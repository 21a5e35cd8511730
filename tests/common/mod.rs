//! Shared fixtures for the pipeline tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use stratus::auth::{AuthError, Credentials};
use stratus::interceptor::LoggingInterceptor;
use stratus::prelude::*;
use stratus::service::EventBus;
use stratus::view::{TemplateEngine, TemplateEngineManager};
use tower::ServiceExt;

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dog {
    pub name: String,
    pub breed: String,
}

pub struct DogRepository {
    dogs: Vec<Dog>,
}

impl DogRepository {
    pub fn new() -> Self {
        Self {
            dogs: vec![
                Dog { name: "Snoopy".into(), breed: "beagle".into() },
                Dog { name: "Laika".into(), breed: "mongrel".into() },
                Dog { name: "Rex".into(), breed: "shepherd".into() },
            ],
        }
    }

    pub fn find(&self, id: i64) -> Option<&Dog> {
        usize::try_from(id).ok().and_then(|i| self.dogs.get(i))
    }

    pub fn list(&self, limit: Option<usize>) -> Vec<Dog> {
        self.dogs.iter().take(limit.unwrap_or(usize::MAX)).cloned().collect()
    }
}

pub trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

pub struct BusGreeter {
    address: String,
}

impl Greeter for BusGreeter {
    fn greet(&self) -> String {
        format!("hello via {}", self.address)
    }
}

pub struct DogController;

impl Controller for DogController {
    fn describe(self: Arc<Self>) -> ControllerDescriptor {
        ControllerDescriptor::new("/dogs")
            .route(
                RouteDescriptor::get("/")
                    .param(ParamDescriptor::service::<DogRepository>("repo", "dogRepository"))
                    .param(ParamDescriptor::query::<Option<usize>>("limit"))
                    .handler(|mut params: Params| async move {
                        let repo = params.take::<Arc<DogRepository>>("repo")?;
                        let limit = params.take::<Option<usize>>("limit")?;
                        Payload::json(&repo.list(limit))
                    }),
            )
            .route(
                RouteDescriptor::post("/")
                    .param(ParamDescriptor::body::<Dog>("dog"))
                    .handler(|mut params: Params| async move {
                        let dog = params.take::<Dog>("dog")?;
                        Payload::json(&dog)
                    }),
            )
            .route(RouteDescriptor::get("/new").handler(|_| async { Ok("new dog form") }))
            .route(RouteDescriptor::get("/boom").handler(|_| async {
                Err::<(), _>(DispatchError::Unexpected(anyhow::anyhow!("kennel database exploded")))
            }))
            .route(
                RouteDescriptor::get("/{id}")
                    .param(ParamDescriptor::path::<i64>("id"))
                    .param(ParamDescriptor::service::<DogRepository>("repo", "dogRepository"))
                    .handler(|mut params: Params| async move {
                        let id = params.take::<i64>("id")?;
                        let repo = params.take::<Arc<DogRepository>>("repo")?;
                        let dog = repo.find(id).ok_or_else(|| {
                            HttpException::new(StatusCode::NOT_FOUND, format!("No dog with id {id}"))
                        })?;
                        Payload::json(dog)
                    }),
            )
            .route(
                RouteDescriptor::get("/{id}/page")
                    .marker(View::new("dog.html"))
                    .param(ParamDescriptor::path::<i64>("id"))
                    .param(ParamDescriptor::service::<DogRepository>("repo", "dogRepository"))
                    .handler(|mut params: Params| async move {
                        let id = params.take::<i64>("id")?;
                        let repo = params.take::<Arc<DogRepository>>("repo")?;
                        let dog = repo.find(id).ok_or_else(|| {
                            HttpException::new(StatusCode::NOT_FOUND, format!("No dog with id {id}"))
                        })?;
                        Payload::json(dog)
                    }),
            )
            .route(RouteDescriptor::get("/*").handler(|_| async { Ok("somewhere in the kennel") }))
    }
}

/// Marker recorded by [`TraceProcessor`]; `halt` answers 403 from the pre-handler.
pub struct Trace {
    pub name: &'static str,
    pub halt: bool,
}

pub struct TraceProcessor {
    name: &'static str,
    halt: bool,
    log: Log,
}

impl TraceProcessor {
    pub fn new(marker: &Trace, log: Log) -> Self {
        Self { name: marker.name, halt: marker.halt, log }
    }
}

#[async_trait]
impl Processor for TraceProcessor {
    async fn pre_handle(&self, exchange: &mut Exchange) -> DispatchResult<Flow> {
        self.log.lock().unwrap().push(format!("pre:{}", self.name));
        if self.halt {
            exchange.respond(StatusCode::FORBIDDEN, "text/plain", format!("halted by {}", self.name));
            return Ok(Flow::Halt);
        }
        Ok(Flow::Continue)
    }

    async fn post_handle(&self, _exchange: &mut Exchange) -> DispatchResult {
        self.log.lock().unwrap().push(format!("post:{}", self.name));
        Ok(())
    }
}

pub struct Recorder {
    pub name: &'static str,
    pub log: Log,
}

#[async_trait]
impl Interceptor for Recorder {
    async fn intercept(&self, exchange: &mut Exchange, next: Next<'_>) -> DispatchResult {
        self.log.lock().unwrap().push(format!("in:{}", self.name));
        let result = next.run(exchange).await;
        self.log.lock().unwrap().push(format!("out:{}", self.name));
        result
    }
}

pub struct OnionController {
    pub log: Log,
}

impl Controller for OnionController {
    fn describe(self: Arc<Self>) -> ControllerDescriptor {
        ControllerDescriptor::new("/onion")
            .interceptor(Recorder { name: "controller", log: self.log.clone() })
            .marker(Trace { name: "class", halt: false })
            .route(
                RouteDescriptor::get("/")
                    .interceptor(Recorder { name: "route", log: self.log.clone() })
                    .marker(Trace { name: "method", halt: false })
                    .bind(&self, |this: Arc<Self>, _params: Params| async move {
                        this.log.lock().unwrap().push("handler".to_string());
                        Ok("peeled")
                    }),
            )
            .route(
                RouteDescriptor::get("/halt")
                    .marker(Trace { name: "gate", halt: true })
                    .bind(&self, |this: Arc<Self>, _params: Params| async move {
                        this.log.lock().unwrap().push("handler".to_string());
                        Ok("unreachable")
                    }),
            )
    }
}

pub struct AdminController;

impl Controller for AdminController {
    fn describe(self: Arc<Self>) -> ControllerDescriptor {
        ControllerDescriptor::new("/admin")
            .auth(AuthRequirement::authority("admin").using(AuthMethod::ApiToken))
            .route(
                RouteDescriptor::get("/whoami")
                    .param(ParamDescriptor::typed::<Principal>("principal"))
                    .handler(|mut params: Params| async move {
                        let principal = params.take::<Principal>("principal")?;
                        Ok(principal.name().to_string())
                    }),
            )
            .route(
                RouteDescriptor::get("/me")
                    .auth(AuthRequirement::authenticated().using(AuthMethod::ApiToken))
                    .param(ParamDescriptor::typed::<Principal>("principal"))
                    .handler(|mut params: Params| async move {
                        let principal = params.take::<Principal>("principal")?;
                        Ok(principal.name().to_string())
                    }),
            )
    }
}

pub struct MiscController;

impl Controller for MiscController {
    fn describe(self: Arc<Self>) -> ControllerDescriptor {
        ControllerDescriptor::new("/misc")
            .interceptor(LoggingInterceptor)
            .route(
                RouteDescriptor::get("/limited")
                    .throttled()
                    .handler(|_| async { Ok("ok") }),
            )
            .route(
                RouteDescriptor::get("/headers")
                    .marker(ResponseHeader::new("x-kennel", "open"))
                    .handler(|_| async { Ok("ok") }),
            )
            .route(
                RouteDescriptor::get("/empty-view")
                    .marker(View::new(""))
                    .handler(|_| async { Ok(()) }),
            )
            .route(
                RouteDescriptor::get("/text")
                    .produces("text/plain")
                    .produces("application/json")
                    .handler(|_| async { Ok("woof") }),
            )
            .route(
                RouteDescriptor::get("/greet")
                    .param(ParamDescriptor::proxy::<dyn Greeter>("greeter", "greeter.service"))
                    .handler(|mut params: Params| async move {
                        let greeter = params.take::<Arc<dyn Greeter>>("greeter")?;
                        Ok(greeter.greet())
                    }),
            )
            .route(
                RouteDescriptor::get("/names/{name}")
                    .param(ParamDescriptor::path::<String>("name"))
                    .handler(|mut params: Params| async move {
                        let name = params.take::<String>("name")?;
                        Ok(name)
                    }),
            )
            .route(
                RouteDescriptor::post("/count")
                    .param(ParamDescriptor::body::<i64>("count"))
                    .handler(|mut params: Params| async move {
                        let count = params.take::<i64>("count")?;
                        Ok(serde_json::Value::from(count + 1))
                    }),
            )
            .route(
                RouteDescriptor::get("/agent")
                    .param(ParamDescriptor::header::<String>("user-agent"))
                    .param(ParamDescriptor::typed::<HeaderMap>("headers"))
                    .handler(|mut params: Params| async move {
                        let agent = params.take::<String>("user-agent")?;
                        let headers = params.take::<HeaderMap>("headers")?;
                        Ok(format!("{agent} ({} headers)", headers.len()))
                    }),
            )
    }
}

/// Accepts `admin-token` (authority `admin`) and `user-token`.
pub struct Tokens;

#[async_trait]
impl AuthProvider for Tokens {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> std::result::Result<Principal, AuthError> {
        match credentials {
            Credentials::ApiToken(t) if t == "admin-token" => {
                Ok(Principal::new("root").with_authority("admin"))
            }
            Credentials::ApiToken(t) if t == "user-token" => Ok(Principal::new("bob")),
            _ => Err(AuthError::InvalidCredentials("Unknown token".to_string())),
        }
    }
}

/// Renders `<template>|<context>` without touching the filesystem.
pub struct Pages;

#[async_trait]
impl TemplateEngine for Pages {
    fn extension(&self) -> &str {
        "html"
    }

    async fn render(&self, template: &str, context: &serde_json::Value) -> anyhow::Result<String> {
        Ok(format!("{template}|{context}"))
    }
}

pub fn services() -> Arc<ServiceRegistry> {
    let mut services = ServiceRegistry::default();
    services
        .register_service("dogRepository", ServiceDefinition::new(DogRepository::new()))
        .unwrap();
    services.register_proxy::<dyn Greeter, _>(|_bus: Arc<dyn EventBus>, address: &str| {
        Arc::new(BusGreeter { address: address.to_string() }) as Arc<dyn Greeter>
    });
    Arc::new(services)
}

/// A dispatcher over every fixture controller.
pub fn dispatcher(config: Config, log: Log) -> DispatchService {
    let mut engines = TemplateEngineManager::new();
    engines.register(Arc::new(Pages));

    let trace_log = log.clone();
    let dispatcher = Dispatcher::builder()
        .config(config)
        .services(services())
        .engines(Arc::new(engines))
        .auth_provider(Arc::new(Tokens))
        .processor::<Trace, TraceProcessor, _>(move |marker: &Trace| {
            Ok(TraceProcessor::new(marker, trace_log.clone()))
        })
        .controller(DogController)
        .controller(OnionController { log })
        .controller(AdminController)
        .controller(MiscController)
        .build()
        .unwrap();
    DispatchService::from(dispatcher)
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Reply {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn send(service: &DispatchService, request: Request<Body>) -> Reply {
    let response = service.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    Reply {
        status,
        headers,
        body: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}
