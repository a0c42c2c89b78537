use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use keystone_server::auth::handlers::{change_password, login, logout, me, register};
use keystone_server::ops::handlers::{
    list_sessions, provision_agent, recent_events, revoke_agent, revoke_session,
    revoke_user_sessions,
};
use keystone_server::{health_check, AppError, AppState, RequireAuth, Settings};
use std::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[actix_web::main]
async fn main() -> keystone_server::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();

    // Load configuration
    let config = Settings::new()?;
    info!("Configuration loaded successfully");

    info!("Starting server at {}:{}", config.server.host, config.server.port);

    // Initialize application state: pool, cache, session store, services.
    let state = AppState::new(config.clone()).await?;
    let state = web::Data::new(state);

    let guard = RequireAuth::new(
        state.auth_flow.clone(),
        state.config.auth.access_expiry_minutes * 60,
    );

    // Create and bind TCP listener
    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;

    // Start HTTP server
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin("http://localhost:8080")
            .allowed_origin("http://127.0.0.1:8080")
            .allowed_methods(vec!["GET", "POST", "DELETE"])
            .allowed_headers(vec!["Authorization", "Content-Type", "X-Provisioning-Secret"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .service(
                        web::resource("/logout")
                            .wrap(guard.clone())
                            .route(web::post().to(logout)),
                    )
                    .service(
                        web::resource("/me")
                            .wrap(guard.clone())
                            .route(web::get().to(me)),
                    )
                    .service(
                        web::resource("/password")
                            .wrap(guard.clone())
                            .route(web::post().to(change_password)),
                    ),
            )
            .service(
                web::scope("/ops")
                    .route("/users/{user_id}/sessions", web::get().to(list_sessions))
                    .route("/users/{user_id}/sessions", web::delete().to(revoke_user_sessions))
                    .route("/sessions/{session_id}", web::delete().to(revoke_session))
                    .route("/agents", web::post().to(provision_agent))
                    .route("/agents/{name}", web::delete().to(revoke_agent))
                    .route("/events", web::get().to(recent_events)),
            )
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()))?;

    Ok(())
}
