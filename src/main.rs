use actix_web::{web, App, HttpResponse, HttpServer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use typerace_server::app_state::AppState;
use typerace_server::broker::Broker;
use typerace_server::config::Settings;
use typerace_server::health::{HealthSink, LoggingHealthSink};
use typerace_server::persistence::PersistenceLayer;
use typerace_server::registrar::Registrar;
use typerace_server::sentence_supply::{self, HttpTextGenerator};

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let settings = match Settings::new() {
        Ok(s) => Arc::new(s),
        Err(e) => {
            log::error!("startup: configuration error: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("typerace-server starting up");
    log::info!("ssh port: {}, http: {}", settings.ssh_port, settings.http_addr());

    let persistence = match PersistenceLayer::new(&settings.database.data_directory) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            log::error!("startup: persistence error: {}", e);
            std::process::exit(1);
        }
    };

    let broker = Arc::new(Broker::new());
    let health: Arc<dyn HealthSink> = Arc::new(LoggingHealthSink);
    let app_state = AppState::new(persistence.clone(), broker.clone(), settings.clone(), health.clone());

    let shutdown = CancellationToken::new();

    let generator = Arc::new(HttpTextGenerator::new(settings.openai_api_key.clone()));
    let supply_shutdown = shutdown.clone();
    let supply_persistence = persistence.clone();
    let supply_settings = settings.clone();
    let supply_health = health.clone();
    let supply_task = tokio::spawn(async move {
        sentence_supply::run(supply_persistence, generator, supply_settings, supply_health, supply_shutdown).await;
    });

    let registrar = Registrar::new(broker.clone(), persistence.clone(), settings.clone(), health.clone());
    let registrar_shutdown = shutdown.clone();
    let registrar_task = tokio::spawn(async move {
        if let Err(e) = registrar.run(registrar_shutdown).await {
            log::error!("registrar: exited with error: {}", e);
        }
    });

    let http_data = web::Data::new(app_state);
    let http_addr = settings.http_addr();
    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(http_data.clone())
            .service(web::resource("/health").route(web::get().to(health_check)))
    })
    .bind(&http_addr)?
    .run();
    let http_handle = http_server.handle();
    let http_task = tokio::spawn(http_server);

    log::info!("press ctrl-c to stop");
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("shutdown signal received, stopping"),
        Err(e) => log::error!("failed to listen for shutdown signal: {}", e),
    }

    shutdown.cancel();
    let stop_fut = http_handle.stop(true);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), stop_fut).await;

    if let Err(e) = http_task.await {
        log::error!("http server task error: {:?}", e);
    }
    if let Err(e) = supply_task.await {
        log::error!("supply loop task error: {:?}", e);
    }
    if let Err(e) = registrar_task.await {
        log::error!("registrar task error: {:?}", e);
    }

    Ok(())
}
