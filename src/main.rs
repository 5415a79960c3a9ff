mod auth;
mod config;
mod crypto;
mod messages;
mod presence;
mod router;
mod server;
mod spam;
mod store;

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use log::{error, info, warn};
use serde::Deserialize;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use auth::TokenVerifier;
use config::ServerConfig;
use server::ChatServer;
use store::MemoryStore;

#[derive(Debug)]
struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

#[derive(Deserialize)]
struct AuthQuery {
    token: String,
}

fn tls_files_valid(cert_path: &str, key_path: &str) -> bool {
    let cert_file = match File::open(cert_path) {
        Ok(file) => file,
        Err(e) => {
            error!("failed to open certificate file: {e}");
            return false;
        }
    };
    let key_file = match File::open(key_path) {
        Ok(file) => file,
        Err(e) => {
            error!("failed to open private key file: {e}");
            return false;
        }
    };

    let cert_reader = &mut BufReader::new(cert_file);
    let key_reader = &mut BufReader::new(key_file);

    let certs: Vec<_> = match rustls_pemfile::certs(cert_reader).collect::<Result<_, _>>() {
        Ok(certs) => certs,
        Err(e) => {
            error!("failed to parse certificate: {e}");
            return false;
        }
    };
    let keys: Vec<_> = match rustls_pemfile::pkcs8_private_keys(key_reader).collect::<Result<_, _>>()
    {
        Ok(keys) => keys,
        Err(e) => {
            error!("failed to parse private key: {e}");
            return false;
        }
    };

    if certs.is_empty() || keys.is_empty() {
        error!("certificate or private key file contains no usable entries");
        return false;
    }
    true
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    if err.find::<Unauthorized>().is_some() {
        Ok(warp::reply::with_status(
            "invalid auth token",
            StatusCode::UNAUTHORIZED,
        ))
    } else {
        Err(err)
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            return;
        }
    };

    let store = Arc::new(MemoryStore::new());
    let server = match ChatServer::new(&config, store.clone(), store) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("invalid encryption key: {e}");
            return;
        }
    };
    let verifier = Arc::new(TokenVerifier::new(&config.secret_key));

    let ws_route = warp::path("ws")
        .and(warp::ws())
        .and(warp::query::<AuthQuery>())
        .and_then(move |ws: warp::ws::Ws, query: AuthQuery| {
            let server = server.clone();
            let verifier = verifier.clone();
            async move {
                // A bad token refuses the upgrade outright; there is no
                // unauthenticated session state to degrade into.
                match verifier.verify(&query.token) {
                    Ok(user_id) => Ok(ws.on_upgrade(move |socket| async move {
                        server.handle_connection(socket, user_id).await;
                    })),
                    Err(e) => {
                        warn!("refusing websocket upgrade: {e}");
                        Err(warp::reject::custom(Unauthorized))
                    }
                }
            }
        });

    let routes = ws_route
        .recover(handle_rejection)
        .with(warp::cors().allow_any_origin());

    let addr = (config.host, config.port);
    match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) if tls_files_valid(cert, key) => {
            info!("starting secure server (wss) on {}:{}", config.host, config.port);
            warp::serve(routes)
                .tls()
                .cert_path(cert)
                .key_path(key)
                .run(addr)
                .await;
        }
        (Some(_), Some(_)) => {
            warn!(
                "TLS configured but unusable, falling back to ws on {}:{}",
                config.host, config.port
            );
            warp::serve(routes).run(addr).await;
        }
        _ => {
            info!("starting server (ws) on {}:{}", config.host, config.port);
            warp::serve(routes).run(addr).await;
        }
    }
}
