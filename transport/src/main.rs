//! Loopback demo: a session manager and a client sharing one in-process
//! runtime. Sends a ping, then streams a countdown.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use transport::{
    ChannelPrefix, ClientResponse, Reply, RequestHandler, Runtime, SenderInfo, SessionClient, SessionManager,
    TransportConfig, TransportError,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum DemoRequest {
    Ping,
    Countdown { from: u32 },
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum DemoResponse {
    Pong,
    Tick { remaining: u32 },
}

struct Demo;

#[async_trait]
impl RequestHandler for Demo {
    type Request = DemoRequest;
    type Response = DemoResponse;

    async fn handle(
        &self,
        request: DemoRequest,
        _cancel: CancellationToken,
    ) -> Result<Reply<DemoResponse>, TransportError> {
        match request {
            DemoRequest::Ping => Ok(Reply::Message(DemoResponse::Pong)),
            DemoRequest::Countdown { from } => Ok(Reply::stream(futures::stream::iter((0..from).rev()).then(
                |remaining| async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(DemoResponse::Tick { remaining })
                },
            ))),
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = TransportConfig::from_env();
    let prefix = ChannelPrefix::new(std::env::var("TRANSPORT_PREFIX").unwrap_or_else(|_| "demo".into()))
        .expect("invalid TRANSPORT_PREFIX");
    let runtime = Runtime::new("loopback");

    let manager = SessionManager::builder(prefix.clone(), Demo).config(config).build(&runtime);
    let listener = manager.listen(&runtime);

    let client = SessionClient::connect(&runtime, &prefix, SenderInfo::extension(runtime.id()), config)
        .expect("client connect failed");
    tracing::info!(client_id = %client.client_id(), "demo client connected");

    match client.request(&serde_json::json!({ "kind": "ping" })).await {
        Ok(ClientResponse::Message(reply)) => tracing::info!(%reply, "ping answered"),
        Ok(ClientResponse::Stream(_)) => tracing::warn!("ping answered with a stream"),
        Err(e) => tracing::error!(error = %e, "ping failed"),
    }

    match client.request(&serde_json::json!({ "kind": "countdown", "from": 5 })).await {
        Ok(ClientResponse::Stream(mut ticks)) => {
            while let Some(tick) = ticks.next().await {
                match tick {
                    Ok(tick) => tracing::info!(%tick, "tick"),
                    Err(e) => tracing::warn!(error = %e, "countdown failed"),
                }
            }
        }
        Ok(ClientResponse::Message(reply)) => tracing::warn!(%reply, "countdown answered without a stream"),
        Err(e) => tracing::error!(error = %e, "countdown failed"),
    }

    client.disconnect();
    manager.shutdown();
    let _ = listener.await;
    tracing::info!("demo finished");
}
