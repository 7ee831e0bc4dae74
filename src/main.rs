use actix_web::{App, HttpServer, middleware, web};
use std::io;

use evalflow::{config::Config, db, handlers, voting};

fn to_io(e: impl std::fmt::Display) -> io::Error {
    io::Error::other(e.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env: {e}");
        }
    }
    env_logger::init();

    let config = Config::from_env().map_err(to_io)?;

    // Initialize database
    let pool = db::init_pool(&config).await.map_err(to_io)?;
    db::run_migrations(&pool).await.map_err(to_io)?;

    voting::spawn_scheduler(pool.clone(), config.vote_sweep_interval);
    log::info!(
        "Vote sweep scheduled every {}s",
        config.vote_sweep_interval.as_secs()
    );

    log::info!("Starting server at http://{}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(web::Data::new(pool.clone()))
            .configure(handlers::configure)
            .default_service(web::to(|| async {
                actix_web::HttpResponse::NotFound().json(serde_json::json!({ "error": "Not found" }))
            }))
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
