use std::sync::Arc;

use anyhow::{Context, Error};
use keystone::{
    config::load_config,
    domain::{port::SharedBackend, Dashboard},
    infra::{http::HttpBackend, web::router},
    session::Session,
};
use log::{info, warn};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Start Keystone - import, prepare and deploy your repositories");

    let config = load_config()?;
    info!("Loaded config {:?}", config);
    let backend: SharedBackend = Arc::new(HttpBackend::new(&config.api.base_url)?);

    let session = Session::new();
    match (&config.api.token, &config.api.username, &config.api.password) {
        (Some(token), _, _) => {
            session.resume(token.clone());
            if !session.verify(&*backend).await? {
                warn!("Stored credential rejected by backend, waiting for POST /login");
            }
        }
        (None, Some(username), Some(password)) => {
            session.login(&*backend, username, password).await?
        }
        _ => info!("No credential configured, waiting for POST /login"),
    }

    let dashboard = Arc::new(Dashboard::new(
        backend,
        session,
        config.dashboard.poll_interval(),
    ));
    if dashboard.session.is_authenticated() {
        dashboard.mount();
    }

    let listener = TcpListener::bind(&config.dashboard.listen)
        .await
        .with_context(|| format!("Can't listen on {}", config.dashboard.listen))?;
    info!("Dashboard listening on {}", config.dashboard.listen);
    axum::serve(listener, router(dashboard.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    dashboard.unmount().await;
    Ok(())
}
