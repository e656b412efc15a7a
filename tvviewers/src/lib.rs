//! # tvviewers - Moteur d'audiences en direct
//!
//! Génère pour chaque chaîne un nombre de téléspectateurs synthétique,
//! lissé et borné, et le diffuse à de nombreux abonnés :
//!
//! - **Générateur** ([`ViewerGenerator`]) : facteur horaire, popularité du
//!   programme en cours, lissage exponentiel, limitation de variation par tick
//! - **Registre** ([`SubscriberRegistry`]) : flux SSE (files bornées) et webhooks
//! - **Diffusion** : non bloquante, un abonné lent est retiré sans gêner les autres
//! - **Boucles** ([`scheduler`]) : tick d'audiences et rafraîchissement des programmes
//!
//! Les routes HTTP sont ajoutées à un [`tvserver::Server`] via [`ViewersExt`].

pub mod api_rest;
pub mod config;
pub mod context;
pub mod error;
pub mod generator;
pub mod registry;
pub mod scheduler;
pub mod server_ext;
pub mod snapshot;
pub mod sse;

pub use api_rest::{create_router, ViewersApiDoc};
pub use config::{ConfigError, HourBand, ViewersConfig};
pub use context::{NowPlayingCell, ViewersContext};
pub use error::{Error, RegistryError, Result};
pub use generator::{ChannelViewerState, ViewerGenerator};
pub use registry::{
    BroadcastReport, Delivery, StreamSubscription, Subscriber, SubscriberRegistry,
};
pub use scheduler::{spawn_loops, SchedulerHandles};
pub use server_ext::ViewersExt;
pub use snapshot::{ChannelViewers, LatestSnapshot, SnapshotMessage, ViewersSnapshot};
