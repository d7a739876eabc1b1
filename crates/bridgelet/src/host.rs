//! Host-side bridge: the trusted peer.
//!
//! Three responsibilities beyond the symmetric dispatch core: reserved
//! control names intercepted before generic dispatch, the pre-registered
//! network proxy, and composition of the injected guest runtime.
//!
//! The host expects to live inside a tokio runtime; the network proxy
//! spawns its fetches onto it.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

use crate::codec;
use crate::compositor::{self, ContentScript, InjectedUnit, ScriptId, ScriptRegistrar, UnitId};
use crate::fetch;
use crate::pending::PendingResponses;
use crate::protocol::{self, Body, Control, Envelope, ReservedName, SecretToken, SendError};
use crate::registry::{EnvelopeSink, HandlerRegistry, Responder};

/// Evaluates a source string inside the guest context.
///
/// The host has no native post-into-guest primitive distinct from the raw
/// channel; all host-to-guest traffic crosses this seam as a formatted
/// invocation of the guest's frozen entry point.
pub trait GuestEvaluator: Send + Sync {
    fn evaluate(&self, source: &str);
}

/// Invocation target for host-to-guest delivery: the guest runtime's frozen
/// entry point.
pub const GUEST_ENTRY_INVOCATION: &str = "__bridge__.receive";

const DEFAULT_PENDING_LIMIT: usize = 1024;

pub struct HostBridgeConfig {
    runtime_source: String,
    isolated_context: bool,
    pending_limit: usize,
}

impl HostBridgeConfig {
    pub fn new(runtime_source: impl Into<String>) -> Self {
        Self {
            runtime_source: runtime_source.into(),
            isolated_context: true,
            pending_limit: DEFAULT_PENDING_LIMIT,
        }
    }

    /// When false, the composed wrapper exports the guest API handle to the
    /// surrounding page scope. Default true.
    pub fn with_isolated_context(mut self, isolated: bool) -> Self {
        self.isolated_context = isolated;
        self
    }

    /// Cap on the host's pending-response table; the oldest entry is evicted
    /// once the cap is reached. Default 1024; a limit of 0 is clamped to 1.
    pub fn with_pending_limit(mut self, limit: usize) -> Self {
        self.pending_limit = limit;
        self
    }
}

struct HostShared {
    secret: SecretToken,
    evaluator: Arc<dyn GuestEvaluator>,
    registrar: Arc<dyn ScriptRegistrar>,
    runtime_source: String,
    isolated_context: bool,
    registry: Mutex<HandlerRegistry>,
    pending: Mutex<PendingResponses>,
    scripts: Mutex<Vec<(ScriptId, ContentScript)>>,
    injected_unit: Mutex<Option<UnitId>>,
}

impl EnvelopeSink for HostShared {
    fn deliver(&self, envelope: Envelope) {
        let raw = codec::encode(&envelope);
        match serde_json::to_string(&raw) {
            Ok(json) => self
                .evaluator
                .evaluate(&format!("{GUEST_ENTRY_INVOCATION}({json})")),
            Err(e) => {
                tracing::error!(error = %e, "dropping message that failed to serialize");
            }
        }
    }
}

fn dispatch(this: &Arc<HostShared>, raw: Value) {
    let envelope = match codec::decode(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "dropped malformed message");
            return;
        }
    };

    if !this.secret.matches(&envelope.secret) {
        tracing::warn!("dropped message with bad secret");
        return;
    }

    match envelope.body {
        // Reserved control traffic never reaches generic handlers.
        Body::Control(Control::Print { data }) => {
            let line = match data {
                Value::String(line) => line,
                other => other.to_string(),
            };
            tracing::info!(target: "bridgelet::guest", "{line}");
        }
        Body::Control(Control::Reset) => {
            this.pending.lock().unwrap().reset_all();
        }
        Body::Response { response_id, data } => {
            let callback = this.pending.lock().unwrap().resolve(response_id);
            match callback {
                Some(callback) => callback(data),
                None => tracing::warn!(response_id, "no pending response callback for id"),
            }
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
                None => tracing::warn!(name = %name, "no handler registered for message"),
            }
        }
    }
}

/// Bridge half living in the trusted context.
#[derive(Clone)]
pub struct HostBridge {
    inner: Arc<HostShared>,
}

impl HostBridge {
    /// Construct the host half: generates the instance secret, pre-registers
    /// the network proxy, and composes the initial injected unit so the
    /// guest runtime (and the secret) are installed before any user script
    /// is added.
    pub fn new(
        config: HostBridgeConfig,
        evaluator: Arc<dyn GuestEvaluator>,
        registrar: Arc<dyn ScriptRegistrar>,
    ) -> Self {
        let mut registry = HandlerRegistry::new();
        fetch::register_proxy(&mut registry);

        let bridge = Self {
            inner: Arc::new(HostShared {
                secret: SecretToken::generate(),
                evaluator,
                registrar,
                runtime_source: config.runtime_source,
                isolated_context: config.isolated_context,
                registry: Mutex::new(registry),
                pending: Mutex::new(PendingResponses::bounded(config.pending_limit)),
                scripts: Mutex::new(Vec::new()),
                injected_unit: Mutex::new(None),
            }),
        };

        bridge.recompose();
        bridge
    }

    /// Opaque pairing capability for constructing the guest half of this
    /// bridge. The token value itself stays unreadable outside the crate.
    pub fn secret_token(&self) -> SecretToken {
        self.inner.secret.clone()
    }

    /// Host receive entry point, invoked by the raw channel's delivery
    /// mechanism with one raw object per call.
    pub fn receive(&self, raw: Value) {
        dispatch(&self.inner, raw);
    }

    /// Register a handler for messages from the guest. Overwrites any
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

    /// Post a request to the guest.
    ///
    /// The envelope is serialized whole and evaluated as an invocation of
    /// the guest's frozen entry point; an unrepresentable payload fails here
    /// before anything is transmitted. `on_response` fires exactly once,
    /// asynchronously, unless a reset intervenes first.
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
        let data = codec::to_payload(data)?;

        let id = self
            .inner
            .pending
            .lock()
            .unwrap()
            .allocate(Box::new(on_response));
        self.inner
            .deliver(Envelope::request(&self.inner.secret, name, id, data));
        Ok(())
    }

    /// Register a content script and synchronously recompose the injected
    /// unit before returning.
    pub fn add_user_script(&self, script: ContentScript) -> ScriptId {
        let id = ScriptId::new();
        self.inner.scripts.lock().unwrap().push((id, script));
        self.recompose();
        id
    }

    /// Remove a previously registered script. Returns false (and recomposes
    /// nothing) when the id is unknown.
    pub fn remove_user_script(&self, id: ScriptId) -> bool {
        let removed = {
            let mut scripts = self.inner.scripts.lock().unwrap();
            let before = scripts.len();
            scripts.retain(|(existing, _)| *existing != id);
            scripts.len() != before
        };
        if removed {
            self.recompose();
        }
        removed
    }

    fn recompose(&self) {
        let source = {
            let scripts = self.inner.scripts.lock().unwrap();
            compositor::compose(
                &self.inner.runtime_source,
                &scripts,
                &self.inner.secret,
                self.inner.isolated_context,
            )
        };
        let new_unit = InjectedUnit::new(source);
        let new_id = new_unit.id;

        let installed = self.inner.registrar.installed();
        let updated = {
            let mut previous = self.inner.injected_unit.lock().unwrap();
            let updated = compositor::swap_unit(installed, *previous, new_unit);
            *previous = Some(new_id);
            updated
        };
        self.inner.registrar.replace_all(updated);
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }
}
