//! Network proxy: the single privileged chokepoint through which guest
//! content reaches host-side networking.
//!
//! Pre-registered on the host bridge under the reserved fetch channel. The
//! client is built once; each request runs on a spawned task and replies
//! with `{status, mimeType, text}`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::protocol::FETCH_CHANNEL;
use crate::registry::{HandlerRegistry, Responder};

/// Fallback body encoding when the response declares no character set.
const FALLBACK_CHARSET: &str = "ISO-8859-1";

pub(crate) fn register_proxy(registry: &mut HandlerRegistry) {
    let client = build_client();

    registry.register(
        FETCH_CHANNEL,
        Arc::new(move |data: Value, responder: Responder| {
            let Some(url) = data.get("url").and_then(Value::as_str) else {
                tracing::warn!("dropped fetch request with no url");
                return;
            };
            let url = match reqwest::Url::parse(url) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(error = %e, "dropped fetch request with invalid url");
                    return;
                }
            };

            let client = client.clone();
            tokio::spawn(async move {
                match perform(&client, url.clone()).await {
                    Ok(reply) => responder.send(reply),
                    // No error envelope exists; the request stays unanswered
                    // and its entry is reclaimed by the next reset.
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "fetch proxy request failed");
                    }
                }
            });
        }),
    );
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(format!("bridgelet/{}", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to create HTTP client")
}

async fn perform(client: &reqwest::Client, url: reqwest::Url) -> Result<Value, reqwest::Error> {
    let response = client.get(url).send().await?;

    let status = response.status().as_u16();
    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            let essence = value.split(';').next().unwrap_or(value);
            essence.trim().to_string()
        });

    // Decode with the response's declared charset, falling back to Latin-1.
    let text = response.text_with_charset(FALLBACK_CHARSET).await?;

    let mut reply = Map::new();
    reply.insert("status".to_string(), Value::from(status));
    if let Some(mime_type) = mime_type {
        reply.insert("mimeType".to_string(), Value::String(mime_type));
    }
    reply.insert("text".to_string(), Value::String(text));
    Ok(Value::Object(reply))
}
