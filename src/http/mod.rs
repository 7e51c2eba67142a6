//! Inbound surface: the shared inbox and per-account inboxes.

use anyhow::Result;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::activity_pub::dispatcher::{DispatchError, Dispatcher};
use crate::activity_pub::model::Envelope;

pub(crate) async fn serve(port: u16, dispatcher: Dispatcher) -> Result<()> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(target: "http", port, "listening");
    axum::serve(listener, router(dispatcher)).await?;
    Ok(())
}

fn router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/inbox", post(post_inbox))
        .route("/accounts/{name}/inbox", post(post_account_inbox))
        .with_state(dispatcher)
}

async fn post_inbox(State(dispatcher): State<Dispatcher>, body: Bytes) -> StatusCode {
    let envelope = match serde_json::from_slice::<Value>(&body)
        .map_err(anyhow::Error::from)
        .and_then(Envelope::try_from)
    {
        Ok(envelope) => envelope,
        Err(error) => {
            debug!(target: "http", %error, "rejected inbox body");
            return StatusCode::BAD_REQUEST;
        }
    };
    match dispatcher.dispatch(envelope).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(DispatchError::Malformed(error)) => {
            debug!(target: "http", %error, "rejected malformed activity");
            StatusCode::BAD_REQUEST
        }
        Err(error) => {
            warn!(target: "http", %error, "cannot apply inbound activity");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn post_account_inbox(
    State(dispatcher): State<Dispatcher>,
    Path(name): Path<String>,
    body: Bytes,
) -> StatusCode {
    debug!(target: "http", %name, "account inbox");
    post_inbox(State(dispatcher), body).await
}
