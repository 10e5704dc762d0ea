//! Example consumer: a separate Rust project that uses restful-sdk as a dependency.
//!
//! Run from repo root: `cargo run -p example-consumer`
//!
//! With `RESOURCES_FILE` set (see `demos/resources.json`) resources are declared in JSON and
//! backed by `DATABASE_URL` / `MONGODB_URI` when given. Otherwise an in-memory `books`
//! resource is served with one custom route.

use async_trait::async_trait;
use axum::http::Method;
use restful_sdk::{
    load_resources, ActionInput, Api, ApiConfig, CollectionAction, Connections, FieldDef, FieldKind, MemoryBackend,
    ModelResource, ResourceBuilder, ResourceMeta, RestError, Route, Schema, SortKey, ValidationRule,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;

/// GET /books/latest: the most recently published book.
struct Latest;

#[async_trait]
impl CollectionAction for Latest {
    async fn call(&self, resource: &ModelResource, _input: ActionInput) -> Result<Value, RestError> {
        let sort = [SortKey {
            attribute: "year_published".into(),
            descending: true,
        }];
        let item = resource.service.first(&[], &sort).await?;
        Ok(resource.service.schema().dump(&item))
    }
}

fn books() -> ResourceBuilder {
    let schema = Schema::new()
        .field(FieldDef::new("id", FieldKind::Integer).dump_only())
        .field(
            FieldDef::new("title", FieldKind::String)
                .required()
                .validate(ValidationRule {
                    min_length: Some(1),
                    max_length: Some(200),
                    ..Default::default()
                }),
        )
        .field(FieldDef::new("author", FieldKind::String))
        .field(FieldDef::new("yearPublished", FieldKind::Integer).attribute("year_published"))
        .field(FieldDef::new("price", FieldKind::Decimal))
        .field(FieldDef::new("tags", FieldKind::List));
    ResourceBuilder::new(ResourceMeta::new("books"), schema)
        .backend(MemoryBackend::new())
        .route(Route::collection(Method::GET, "latest", Latest))
}

async fn connections() -> Result<Connections, Box<dyn std::error::Error>> {
    let mut connections = Connections::default();
    if let Ok(url) = std::env::var("DATABASE_URL") {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        connections.pool = Some(pool);
    }
    if let Ok(uri) = std::env::var("MONGODB_URI") {
        let client = mongodb::Client::with_uri_str(&uri).await?;
        let db = std::env::var("MONGODB_DATABASE").unwrap_or_else(|_| "restful".into());
        connections.mongo = Some(client.database(&db));
    }
    Ok(connections)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("restful_sdk=info,example_consumer=info")),
        )
        .init();

    let api = match std::env::var("RESOURCES_FILE") {
        Ok(path) => {
            let file = load_resources(&path).await?;
            let connections = connections().await?;
            let mut api = Api::new(file.api).default_backend(|_meta| Arc::new(MemoryBackend::new()));
            for resource in file.resources {
                api.add_resource(resource.into_builder(&connections)?)?;
            }
            api
        }
        Err(_) => {
            let mut api = Api::new(ApiConfig::from_env()?);
            api.add_resource(books())?;
            api
        }
    };
    for endpoint in api.endpoints() {
        tracing::info!(method = %endpoint.method, path = %endpoint.path, name = %endpoint.name, "endpoint");
    }

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Example consumer listening on http://127.0.0.1:{}", port);
    axum::serve(listener, api.router()).await?;
    Ok(())
}
