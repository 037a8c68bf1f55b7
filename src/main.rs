use std::sync::Arc;

use actix_web::{App, HttpResponse, HttpServer, Responder, middleware::Logger, web};
use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use medichain_gateway::{Gateway, GatewayConfig, IpfsBlobStore, MemoryLedger, handlers};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("medichain_gateway=info,actix_web=info")),
        )
        .init();

    let config = GatewayConfig::from_env().context("loading gateway configuration")?;

    let ledger = MemoryLedger::new(config.admin_address.clone())
        .with_appointment_fee(config.appointment_fee);
    let blobs = IpfsBlobStore::new(&config.ipfs_api_url)
        .with_context(|| format!("connecting to IPFS API at {}", config.ipfs_api_url))?;
    let gateway = Gateway::new(Arc::new(ledger), Arc::new(blobs), config.settings());

    info!(
        addr = %config.bind_addr,
        port = config.bind_port,
        admin = %config.admin_address,
        "starting gateway"
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(gateway.clone()))
            .configure(handlers::routes)
            .route("/", web::get().to(hello))
    })
    .bind((config.bind_addr.as_str(), config.bind_port))
    .with_context(|| format!("binding {}:{}", config.bind_addr, config.bind_port))?
    .run()
    .await
    .context("running HTTP server")
}

async fn hello() -> impl Responder {
    HttpResponse::Ok().body("Hello, MediChain!")
}
