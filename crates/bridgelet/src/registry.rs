//! Handler registry and the one-shot reply capability handed to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::codec;
use crate::protocol::{Envelope, SecretToken};

/// Outbound edge of a bridge peer. Both halves post envelopes through this,
/// whatever their underlying primitive (raw channel post on the guest,
/// evaluation in the guest context on the host).
pub(crate) trait EnvelopeSink: Send + Sync {
    fn deliver(&self, envelope: Envelope);
}

/// One-shot reply capability bound to a single inbound request id.
///
/// `send` consumes the responder, making exactly-once a property of the
/// type: a handler cannot reply twice, and a handler that never replies
/// orphans the request (the sender reclaims its entry on the next reset).
/// Handlers are free to move the responder into spawned work and answer
/// later.
pub struct Responder {
    secret: SecretToken,
    response_id: u64,
    sink: Arc<dyn EnvelopeSink>,
}

impl Responder {
    pub(crate) fn new(secret: SecretToken, response_id: u64, sink: Arc<dyn EnvelopeSink>) -> Self {
        Self {
            secret,
            response_id,
            sink,
        }
    }

    /// Post the reply envelope back through the raw primitive.
    ///
    /// An unrepresentable payload is reported to local diagnostics and the
    /// reply is dropped whole; nothing is ever partially sent.
    pub fn send<T: Serialize>(self, data: T) {
        let data = match codec::to_payload(&data) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, response_id = self.response_id, "dropping response");
                return;
            }
        };

        self.sink
            .deliver(Envelope::response(&self.secret, self.response_id, data));
    }
}

/// Message handler: invoked with the request payload and a one-shot reply
/// capability.
pub type Handler = Arc<dyn Fn(Value, Responder) + Send + Sync + 'static>;

/// Per-peer map from logical message name to its handler.
///
/// Names are unique; re-registration overwrites silently. Entries live for
/// the lifetime of the owning bridge and none survives its teardown.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Handler) {
        self.handlers.insert(name.into(), handler);
    }

    /// No-op when absent.
    pub fn unregister(&mut self, name: &str) {
        self.handlers.remove(name);
    }

    pub fn lookup(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::protocol::Body;

    #[derive(Default)]
    struct CaptureSink {
        envelopes: Mutex<Vec<Envelope>>,
    }

    impl EnvelopeSink for CaptureSink {
        fn deliver(&self, envelope: Envelope) {
            self.envelopes.lock().unwrap().push(envelope);
        }
    }

    fn responder(sink: &Arc<CaptureSink>, secret: &SecretToken, id: u64) -> Responder {
        Responder::new(secret.clone(), id, Arc::clone(sink) as Arc<dyn EnvelopeSink>)
    }

    #[test]
    fn registration_overwrites_silently() {
        let mut registry = HandlerRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        {
            let first = first.clone();
            registry.register(
                "Echo",
                Arc::new(move |_, _| {
                    first.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        {
            let second = second.clone();
            registry.register(
                "Echo",
                Arc::new(move |_, _| {
                    second.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        let sink = Arc::new(CaptureSink::default());
        let secret = SecretToken::generate();
        let handler = registry.lookup("Echo").expect("registered");
        handler(json!(null), responder(&sink, &secret, 0));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_is_a_noop_when_absent() {
        let mut registry = HandlerRegistry::new();
        registry.unregister("ghost");

        registry.register("Echo", Arc::new(|_, _| {}));
        registry.unregister("Echo");
        assert!(registry.lookup("Echo").is_none());
    }

    #[test]
    fn responder_posts_a_response_envelope() {
        let sink = Arc::new(CaptureSink::default());
        let secret = SecretToken::generate();

        responder(&sink, &secret, 7).send(json!({"ok": true}));

        let envelopes = sink.envelopes.lock().unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].secret, secret.expose());
        assert_eq!(
            envelopes[0].body,
            Body::Response {
                response_id: 7,
                data: json!({"ok": true})
            }
        );
    }

    #[test]
    fn responder_drops_unrepresentable_payloads_whole() {
        let sink = Arc::new(CaptureSink::default());
        let secret = SecretToken::generate();

        let mut bad = BTreeMap::new();
        bad.insert(vec![1u8], 1);
        responder(&sink, &secret, 7).send(bad);

        assert!(sink.envelopes.lock().unwrap().is_empty());
    }
}
