//! `/subscribe`: Server-Sent Events stream of viewer snapshots.
//!
//! The first event is the latest snapshot, then one event per tick. Each
//! event's `data:` is the JSON array `[{"channel": ..., "viewers": "..."}]`.
//! When keepalive is enabled a `: ping` comment is sent after that many
//! seconds of silence.

use crate::context::ViewersContext;
use axum::{
    extract::State,
    http::header,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::debug;

/// Subscribe to the live viewer stream
#[utoipa::path(
    get,
    path = "/subscribe",
    responses(
        (status = 200, description = "text/event-stream of viewer snapshots", content_type = "text/event-stream")
    ),
    tag = "viewers"
)]
pub async fn subscribe_sse(State(ctx): State<Arc<ViewersContext>>) -> impl IntoResponse {
    let (mut subscription, initial) = ctx.subscribe_stream();
    let keepalive = ctx.config().keepalive();
    debug!(id = subscription.id(), seq = initial.seq(), "SSE client connected");

    let stream = async_stream::stream! {
        let mut last_seq = initial.seq();
        yield Ok::<_, Infallible>(Event::default().data(initial.body()));

        loop {
            let next = match keepalive {
                Some(period) => match timeout(period, subscription.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        yield Ok(Event::default().comment("ping"));
                        continue;
                    }
                },
                None => subscription.recv().await,
            };

            // None: retiré par le broadcaster (file pleine)
            let Some(message) = next else { break };
            if message.seq <= last_seq {
                continue;
            }
            last_seq = message.seq;
            yield Ok(Event::default().data(&*message.body));
        }
    };

    (
        [(header::CACHE_CONTROL, "no-cache, no-transform")],
        Sse::new(stream),
    )
}
