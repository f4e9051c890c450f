use actix_cors::Cors;
use actix_web::{dev::Server, http::header, middleware, web, App, HttpServer};
use tracing::info;

use crate::{
    configuration::{AppState, State},
    controller::{update, version},
    error::Error,
};

pub async fn server_task(app_state: &AppState<State>) -> Result<(), Error> {
    let app = app_state.clone();
    tokio::spawn(async move {
        let server = init_server(app)?;
        server.await?;
        Ok(())
    })
    .await?
}

/// `*` in `ALLOWED_ORIGINS` opens the routes to every origin.
fn cors(allowed_origins: Vec<String>) -> Cors {
    let any_origin = allowed_origins.iter().any(|origin| origin == "*");

    Cors::default()
        .allowed_origin_fn(move |origin, _| {
            any_origin
                || origin
                    .to_str()
                    .is_ok_and(|origin| allowed_origins.iter().any(|o| o == origin))
        })
        .allowed_methods(vec!["GET"])
        .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT])
        .allowed_header(header::CONTENT_TYPE)
}

fn init_server(app_state: AppState<State>) -> Result<Server, Error> {
    let host = app_state.config.server_host.to_owned();
    let port = app_state.config.port;
    info!("Listening on {}:{}", host, port);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(cors(app_state.config.allowed_origins.clone()))
            .wrap(middleware::Compress::default())
            .app_data(web::Data::new(app_state.clone()))
            .service(version::index)
            .service(update::index)
            .service(update::with_min_liquidity)
    })
    .bind((host, port))?
    .disable_signals()
    .run();
    Ok(server)
}
