pub(crate) mod auth;
mod handlers;
mod router;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info};

use crate::core::lifecycle::LifecycleComponent;
use crate::core::store::Store;

/// Admin HTTP API. It only reads tables and writes command-queue rows; the
/// bot process picks those up through the relay.
pub struct AdminServer {
    store: Store,
    host: String,
    port: u16,
    token: String,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Store,
    pub(crate) api_host: String,
    pub(crate) api_port: u16,
    pub(crate) admin_token: String,
}

impl AdminServer {
    pub fn new(store: Store, host: String, port: u16, token: String) -> Self {
        Self {
            store,
            host,
            port,
            token,
        }
    }
}

#[async_trait]
impl LifecycleComponent for AdminServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("Admin API initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let state = AppState {
            store: self.store.clone(),
            api_host: self.host.clone(),
            api_port: self.port,
            admin_token: self.token.clone(),
        };

        tokio::spawn(async move {
            let addr = format!("{}:{}", state.api_host, state.api_port);
            let app = router::build_api_router(state);

            match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => {
                    info!("Admin API running at http://{addr}");
                    if let Err(e) = axum::serve(listener, app).await {
                        error!("Admin API crashed: {}", e);
                    }
                }
                Err(e) => error!("Admin API could not bind {}: {}", addr, e),
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Admin API shutting down...");
        Ok(())
    }
}
