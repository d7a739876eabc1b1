//! Guest-side bridge: runs inside the untrusted, isolated context.
//!
//! The guest exposes exactly one externally reachable entry point
//! ([`GuestEntryPoint`]) and keeps everything else (registries, pending
//! table, secret) unreachable from the surrounding content. Its own
//! diagnostics are tunneled to the host over the print channel, since the
//! guest context is assumed to have no console of its own.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

use crate::codec;
use crate::pending::{PendingResponses, ResponseCallback};
use crate::protocol::{
    self, Body, Control, Envelope, FETCH_CHANNEL, ReservedName, SecretToken, SendError,
};
use crate::registry::{EnvelopeSink, HandlerRegistry, Responder};

/// The raw post primitive: accepts one serializable value and delivers it
/// asynchronously, in order, to the peer's receive entry point. No return
/// value, no delivery confirmation.
pub trait MessagePoster: Send + Sync {
    fn post(&self, payload: Value);
}

struct GuestShared {
    secret: SecretToken,
    // Captured exactly once at construction. The surrounding content may
    // later shadow whatever binding originally reached the primitive;
    // nothing in the bridge re-resolves it.
    poster: Arc<dyn MessagePoster>,
    registry: Mutex<HandlerRegistry>,
    pending: Mutex<PendingResponses>,
}

impl EnvelopeSink for GuestShared {
    fn deliver(&self, envelope: Envelope) {
        self.poster.post(codec::encode(&envelope));
    }
}

impl GuestShared {
    /// Tunnel a diagnostic line to the host console.
    fn print(&self, message: String) {
        self.deliver(Envelope::control(
            &self.secret,
            Control::Print {
                data: Value::String(format!("[console] {message}")),
            },
        ));
    }

    fn post_request(&self, name: String, data: Value, on_response: ResponseCallback) {
        let id = self.pending.lock().unwrap().allocate(on_response);
        self.deliver(Envelope::request(&self.secret, name, id, data));
    }
}

fn dispatch(this: &Arc<GuestShared>, raw: Value) {
    let envelope = match codec::decode(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            this.print(format!("dropped malformed message: {e}"));
            return;
        }
    };

    if !this.secret.matches(&envelope.secret) {
        this.print("dropped message with bad secret".to_string());
        return;
    }

    match envelope.body {
        Body::Response { response_id, data } => {
            let callback = this.pending.lock().unwrap().resolve(response_id);
            match callback {
                Some(callback) => callback(data),
                None => this.print(format!("no pending response callback for id {response_id}")),
            }
        }
        // The host never sends control traffic toward the guest.
        Body::Control(control) => {
            this.print(format!("dropped unexpected control message: {control:?}"));
        }
        Body::Request { name, id, data } => {
            let handler = this.registry.lock().unwrap().lookup(&name);
            match handler {
                Some(handler) => {
                    let responder = Responder::new(
                        this.secret.clone(),
                        id,
                        Arc::clone(this) as Arc<dyn EnvelopeSink>,
                    );
                    handler(data, responder);
                }
                None => this.print(format!("no handler registered for {name:?}")),
            }
        }
    }
}

/// The single externally reachable entry point for host-to-guest traffic.
///
/// An opaque handle exposing exactly one operation. The registries, pending
/// table, and secret are not reachable through it, and every clone is the
/// same immutable capability: the crate's rendering of a frozen,
/// non-configurable receive function.
#[derive(Clone)]
pub struct GuestEntryPoint {
    inner: Arc<GuestShared>,
}

impl GuestEntryPoint {
    /// Receive one raw envelope from the host's evaluation mechanism.
    pub fn receive(&self, raw: Value) {
        dispatch(&self.inner, raw);
    }
}

/// Bridge half living inside the untrusted context.
#[derive(Clone)]
pub struct GuestBridge {
    inner: Arc<GuestShared>,
}

impl GuestBridge {
    /// Construct the guest half around the raw post primitive.
    ///
    /// The pairing token comes from the host bridge; the primitive is
    /// captured here, exactly once.
    pub fn new(secret: SecretToken, poster: Arc<dyn MessagePoster>) -> Self {
        Self {
            inner: Arc::new(GuestShared {
                secret,
                poster,
                registry: Mutex::new(HandlerRegistry::new()),
                pending: Mutex::new(PendingResponses::new()),
            }),
        }
    }

    pub fn entry_point(&self) -> GuestEntryPoint {
        GuestEntryPoint {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Register a handler for messages from the host. Overwrites any
    /// existing handler with the same name; reserved control names are
    /// refused.
    pub fn add_handler<F>(&self, name: impl Into<String>, handler: F) -> Result<(), ReservedName>
    where
        F: Fn(Value, Responder) + Send + Sync + 'static,
    {
        let name = name.into();
        if protocol::is_reserved(&name) {
            return Err(ReservedName(name));
        }
        self.inner
            .registry
            .lock()
            .unwrap()
            .register(name, Arc::new(handler));
        Ok(())
    }

    pub fn remove_handler(&self, name: &str) {
        self.inner.registry.lock().unwrap().unregister(name);
    }

    /// Post a request to the host.
    ///
    /// `on_response` fires exactly once, asynchronously, with the reply
    /// payload, unless a reset intervenes first, in which case it is never
    /// invoked.
    pub fn post_message<T, F>(
        &self,
        name: impl Into<String>,
        data: &T,
        on_response: F,
    ) -> Result<(), SendError>
    where
        T: Serialize,
        F: FnOnce(Value) + Send + 'static,
    {
        let name = name.into();
        if protocol::is_reserved(&name) {
            return Err(ReservedName(name).into());
        }
        self.inner
            .post_request(name, codec::to_payload(data)?, Box::new(on_response));
        Ok(())
    }

    /// Tunnel a console line to the host's diagnostics.
    pub fn print(&self, message: &str) {
        self.inner.print(message.to_string());
    }

    /// Wire this to the context's "became visible again" lifecycle event.
    ///
    /// Unconditionally signals the host to flush its pending table and
    /// flushes the local one: after a suspend/resume there is no way to tell
    /// which in-flight response callbacks are still meaningful, so all of
    /// them are stale.
    pub fn context_restored(&self) {
        self.inner
            .deliver(Envelope::control(&self.inner.secret, Control::Reset));
        self.inner.pending.lock().unwrap().reset_all();
    }

    /// Perform a cross-origin HTTP request through the host's network proxy.
    ///
    /// `complete` receives the proxied status, MIME type, and body text; the
    /// body is parsed into a JSON value when the MIME type says JSON (parse
    /// failure yields `Null` plus a tunneled diagnostic) and passed through
    /// as text otherwise.
    pub fn fetch<F>(&self, url: impl Into<String>, complete: F) -> Result<(), SendError>
    where
        F: FnOnce(FetchOutcome) + Send + 'static,
    {
        let url = url.into();
        let data = codec::to_payload(&serde_json::json!({ "url": url }))?;

        let inner = Arc::clone(&self.inner);
        self.inner.post_request(
            FETCH_CHANNEL.to_string(),
            data,
            Box::new(move |reply| {
                complete(parse_fetch_reply(&inner, reply));
            }),
        );
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }
}

/// Completed network-proxy exchange as seen by the guest.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub status: Option<u16>,
    pub mime_type: Option<String>,
    pub text: Option<String>,
    /// Parsed body: the JSON value when the MIME type says JSON (`Null` on
    /// parse failure), the raw text otherwise.
    pub data: Value,
}

fn parse_fetch_reply(shared: &GuestShared, reply: Value) -> FetchOutcome {
    let status = reply
        .get("status")
        .and_then(Value::as_u64)
        .map(|status| status as u16);
    let mime_type = reply
        .get("mimeType")
        .and_then(Value::as_str)
        .map(str::to_string);
    let text = reply
        .get("text")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut data = text.clone().map(Value::String).unwrap_or(Value::Null);
    if let (Some(mime), Some(body)) = (mime_type.as_deref(), text.as_deref())
        && mime.contains("json")
    {
        data = match serde_json::from_str(body) {
            Ok(parsed) => parsed,
            Err(_) => {
                shared.print(format!("could not parse response body as {mime}"));
                Value::Null
            }
        };
    }

    FetchOutcome {
        status,
        mime_type,
        text,
        data,
    }
}
