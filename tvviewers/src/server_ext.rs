//! Extension de `tvserver::Server` pour le moteur d'audiences
//!
//! `tvserver` ne connaît pas `tvviewers` : ce trait ajoute au serveur les
//! routes d'audiences et de programmes, et démarre les deux boucles
//! périodiques liées au jeton d'arrêt du serveur.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tvserver::ServerBuilder;
//! use tvviewers::{ViewersContext, ViewersExt};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut server = ServerBuilder::new_configured().build();
//! let ctx = Arc::new(ViewersContext::from_config(&tvconfig::get_config())?);
//! let loops = server.init_viewers(ctx).await?;
//!
//! server.start().await;
//! server.wait().await;
//! loops.join().await;
//! # Ok(())
//! # }
//! ```

use crate::api_rest::{create_router, ViewersApiDoc};
use crate::context::ViewersContext;
use crate::scheduler::{spawn_loops, SchedulerHandles};
use anyhow::Result;
use chrono::Local;
use std::sync::Arc;
use tracing::info;
use tvserver::Server;
use utoipa::OpenApi;

pub trait ViewersExt {
    /// Enregistre les routes et lance les boucles
    ///
    /// # Routes enregistrées
    ///
    /// - `GET /viewers`, `GET /subscribe` (SSE)
    /// - `POST /subscribe-webhook`, `POST /unsubscribe-webhook`
    /// - `GET /now-playing`, `GET /refresh`
    /// - `GET /health`, `GET /status`
    /// - `/swagger-ui/viewers` (documentation)
    async fn init_viewers(&mut self, ctx: Arc<ViewersContext>) -> Result<SchedulerHandles>;
}

impl ViewersExt for Server {
    async fn init_viewers(&mut self, ctx: Arc<ViewersContext>) -> Result<SchedulerHandles> {
        info!("Initializing viewer engine API...");

        // Projection initiale pour que /now-playing ne soit pas vide au démarrage
        if let Ok(programs) = ctx.refresh_programs(Local::now()).await {
            info!(count = programs.len(), "initial now-playing projection loaded");
        }

        self.add_router("/", create_router(ctx.clone())).await;
        self.add_swagger(ViewersApiDoc::openapi(), "viewers").await;

        let handles = spawn_loops(ctx, self.shutdown_token());
        info!("Viewer engine started");
        Ok(handles)
    }
}
