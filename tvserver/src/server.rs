//! # Module Server - API de haut niveau pour Axum
//!
//! Ce module fournit une abstraction simple pour créer le serveur HTTP de
//! TVPulse, en cachant la configuration d'Axum et du routage.
//!
//! ## Fonctionnalités
//!
//! - **Routes JSON simples** : endpoints API avec `add_route()`
//! - **Handlers avec état** : SSE, dumps, etc. avec `add_handler_with_state()`
//! - **Documentation API** : OpenAPI/Swagger avec `add_openapi()`
//! - **Arrêt gracieux** : Ctrl+C annule le jeton d'arrêt partagé

use crate::logs::{LogsApiDoc, create_logs_router, init_logging, log_dump, log_sse};
use axum::handler::Handler;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{signal, sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tvconfig::get_config;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Info serveur sérialisable
#[derive(Clone, Serialize, utoipa::ToSchema)]
pub struct ServerInfo {
    pub name: String,
    pub base_url: String,
    pub http_port: u16,
}

/// Serveur principal
pub struct Server {
    name: String,
    base_url: String,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    join_handle: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Server {
    /// Crée une nouvelle instance de serveur
    ///
    /// # Arguments
    ///
    /// * `name` - Nom du serveur (pour les logs)
    /// * `base_url` - Hôte public (ex: "localhost")
    /// * `http_port` - Port HTTP à écouter
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            join_handle: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn new_configured() -> Self {
        let config = get_config();
        Self::new("TVPulse", config.get_base_url(), config.get_http_port())
    }

    /// Jeton annulé à l'arrêt du serveur (Ctrl+C ou `shutdown()`)
    ///
    /// Les tâches de fond (boucles de tick, rafraîchissement) s'y abonnent
    /// pour s'arrêter avec le serveur.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ajoute une route JSON dynamique
    ///
    /// Crée un endpoint GET qui retourne du JSON. La closure fournie sera
    /// appelée à chaque requête.
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// # use tvserver::Server;
    /// # #[tokio::main]
    /// # async fn main() {
    /// # let mut server = Server::new("Test", "localhost", 3000);
    /// server.add_route("/info", || async {
    ///     serde_json::json!({"version": "1.0.0"})
    /// }).await;
    /// # }
    /// ```
    pub async fn add_route<F, Fut, T>(&mut self, path: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = move || {
            let f = f.clone();
            async move { Json(f().await) }
        };

        self.mount(path, Router::new().route("/", get(handler))).await;
    }

    /// Ajoute un handler GET avec état
    pub async fn add_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S> + Clone + 'static,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new().route("/", get(handler)).with_state(state);
        self.mount(path, route).await;
    }

    async fn mount(&mut self, path: &str, route: Router) {
        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).merge(route)
        } else {
            std::mem::take(&mut *r).nest(path, route)
        };
    }

    /// Ajoute un sous-router au serveur
    ///
    /// - Si `path` est "/", merge directement au router principal
    /// - Sinon, nest le router sous le chemin donné
    pub async fn add_router(&mut self, path: &str, sub_router: Router) {
        let mut r = self.router.write().await;

        *r = if path == "/" {
            std::mem::take(&mut *r).merge(sub_router)
        } else {
            let normalized = format!("/{}", path.trim_start_matches('/'));
            std::mem::take(&mut *r).nest(&normalized, sub_router)
        };
    }

    /// Ajoute une API documentée avec OpenAPI et Swagger UI
    ///
    /// - `/api/{name}/...` : routes de l'API
    /// - `/swagger-ui/{name}` : documentation interactive
    /// - `/api-docs/{name}.json` : spécification OpenAPI
    pub async fn add_openapi(
        &mut self,
        api_router: Router,
        openapi: utoipa::openapi::OpenApi,
        name: &str,
    ) {
        let base_path = format!("/api/{}", name);
        let nested_router = Router::new().nest(&base_path, api_router);

        self.add_router("/", nested_router).await;
        self.add_swagger(openapi, name).await;
    }

    /// Publie uniquement la documentation OpenAPI d'une API déjà montée
    ///
    /// Pour les routes servies hors de `/api/{name}` (ex: `/viewers`).
    pub async fn add_swagger(&mut self, openapi: utoipa::openapi::OpenApi, name: &str) {
        let swagger_path = format!("/swagger-ui/{}", name);
        let swagger_path_static: &'static str = Box::leak(swagger_path.into_boxed_str());

        let openapi_json_path = format!("/api-docs/{}.json", name);
        let openapi_json_path_static: &'static str = Box::leak(openapi_json_path.into_boxed_str());

        let swagger = SwaggerUi::new(swagger_path_static).url(openapi_json_path_static, openapi);

        let mut r = self.router.write().await;
        *r = std::mem::take(&mut *r).merge(swagger);
    }

    /// Copie du router courant (utile pour les tests `oneshot`)
    pub async fn router(&self) -> Router {
        self.router.read().await.clone()
    }

    /// Démarre le serveur HTTP
    ///
    /// Lance le serveur sur le port configuré et met en place la gestion
    /// de Ctrl+C pour un arrêt gracieux.
    pub async fn start(&mut self) {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.http_port));
        info!(
            "Server {} running at http://{}:{}",
            self.name, self.base_url, self.http_port
        );

        let router = self.router.read().await.clone();
        let shutdown = self.shutdown.clone();
        let server_task = tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(%addr, "Failed to bind HTTP listener: {}", e);
                    shutdown.cancel();
                    return;
                }
            };
            let graceful = shutdown.clone();
            if let Err(e) = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move { graceful.cancelled().await })
                .await
            {
                error!("HTTP server error: {}", e);
            }
            shutdown.cancel();
        });

        let shutdown = self.shutdown.clone();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                res = signal::ctrl_c() => {
                    if let Err(e) = res {
                        error!("Failed to listen for Ctrl+C: {}", e);
                        return;
                    }
                    info!("Ctrl+C reçu, arrêt gracieux");
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        self.join_handle = Some(tokio::spawn(async move {
            let _ = tokio::join!(server_task, signal_task);
        }));
    }

    /// Demande l'arrêt du serveur et des tâches abonnées au jeton
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Attend la fin du serveur
    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }

    /// Récupère les infos du serveur
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            http_port: self.http_port,
        }
    }

    /// Initialise le système de logging et enregistre les routes de logs
    ///
    /// Configure tracing avec SSE (et la console selon la configuration),
    /// puis enregistre `/log-sse`, `/log-dump` et l'API `/api/logs/log_setup`.
    pub async fn init_logging(&mut self) {
        let log_state = init_logging();

        self.add_handler_with_state("/log-sse", log_sse, log_state.clone())
            .await;
        self.add_handler_with_state("/log-dump", log_dump, log_state.clone())
            .await;
        self.add_openapi(
            create_logs_router(log_state),
            LogsApiDoc::openapi(),
            "logs",
        )
        .await;
    }
}

/// Builder pattern
pub struct ServerBuilder {
    name: String,
    base_url: String,
    http_port: u16,
}

impl ServerBuilder {
    /// Crée un nouveau builder
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
        }
    }

    pub fn new_configured() -> Self {
        let config = get_config();
        Self {
            name: "TVPulse".to_string(),
            base_url: config.get_base_url(),
            http_port: config.get_http_port(),
        }
    }

    /// Construit le serveur
    pub fn build(self) -> Server {
        Server::new(self.name, self.base_url, self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_add_route_serves_json() {
        let mut server = ServerBuilder::new("Test", "localhost", 0).build();
        server
            .add_route("/info", || async { serde_json::json!({"version": "1.0.0"}) })
            .await;

        let response = server
            .router()
            .await
            .oneshot(Request::builder().uri("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["version"], "1.0.0");
    }

    #[tokio::test]
    async fn test_root_route_is_merged() {
        let mut server = Server::new("Test", "localhost", 0);
        server.add_route("/", || async { "hello" }).await;

        let response = server
            .router()
            .await
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stateful_handler_is_nested() {
        let mut server = Server::new("Test", "localhost", 0);
        let state = crate::logs::LogState::detached(8);
        server
            .add_handler_with_state("/log-dump", log_dump, state)
            .await;

        let response = server
            .router()
            .await
            .oneshot(Request::builder().uri("/log-dump").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_token() {
        let server = Server::new("Test", "localhost", 0);
        let token = server.shutdown_token();
        assert!(!token.is_cancelled());
        server.shutdown();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_info() {
        let server = ServerBuilder::new("Test", "example.org", 8080).build();
        let info = server.info();
        assert_eq!(info.name, "Test");
        assert_eq!(info.base_url, "example.org");
        assert_eq!(info.http_port, 8080);
    }
}
