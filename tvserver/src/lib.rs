//! # tvserver - Serveur web haut niveau basé sur Axum
//!
//! Cette crate fournit une abstraction simple pour exposer les API HTTP de
//! TVPulse (audiences, programmes en cours, santé).
//!
//! ## Fonctionnalités
//!
//! - **API de haut niveau** : routes JSON, handlers avec état, sous-routers
//! - **Server-Sent Events (SSE)** : logs en temps réel via `/log-sse`
//! - **Documentation OpenAPI** : Swagger UI par API
//! - **Arrêt gracieux** : Ctrl+C annule un `CancellationToken` partagé
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use tvserver::ServerBuilder;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = ServerBuilder::new_configured().build();
//!     server.init_logging().await;
//!
//!     server.add_route("/info", || async {
//!         serde_json::json!({"status": "ok"})
//!     }).await;
//!
//!     server.start().await;
//!     server.wait().await;
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LogState, SseLayer, log_dump, log_sse};
pub use server::{Server, ServerBuilder, ServerInfo};
