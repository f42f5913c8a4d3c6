// ============================================
// File: crates/gatesplice-proxy/src/dispatch/dispatcher.rs
// ============================================
//! # Dispatcher
//!
//! ## Creation Reason
//! The heart of the proxy: runs every relayed message through the merged
//! hook chain, tracks the mutation/suppression flags, detects the protocol
//! version in-band, queues hooks registered before the version is known,
//! and turns module-synthesized messages into outbound frames.
//!
//! ## Message Pipeline
//! ```text
//! handle(data, incoming, fake)
//!   │
//!   ├─ 1. read opcode from data[2..4]
//!   ├─ 2. C_CHECK_VERSION + version unknown? → detect, drain queued hooks
//!   ├─ 3. merged hook sequence for (Any, opcode); none → forward as-is
//!   ├─ 4. snapshot copy; modified = silenced = false
//!   ├─ 5. per hook: filter check → raw or parsed invocation
//!   │      raw:    Replace/Silence/Unsilence/Pass (in-place edits detected
//!   │              against the snapshot)
//!   │      parsed: parse → callback → Commit (re-serialize, un-silence) /
//!   │              Silence / Pass; parse failure forwards the *current*
//!   │              buffer and aborts the chain
//!   └─ 6. Silenced iff the final silenced flag is set
//! ```
//!
//! ## Error Policy
//! User-callback errors and codec errors never escape `handle`: they are
//! logged (codec failures with the message name and a hex dump) and the
//! pipeline degrades exactly as §"Message Pipeline" describes. Only the
//! connection layer sees fatal errors, and only from framing/cipher code.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The merged hook sequence is snapshotted before user code runs; hooks
//!   added or removed by a callback take effect from the next message
//! - `handle` holds no lock while callbacks run; callbacks may freely
//!   register, unregister, load and inject
//! - Synthesized messages never re-enter `handle` recursively; they queue
//!   and are drained by `flush_injections` after the current call returns
//!
//! ## Last Modified
//! v0.1.0 - Initial dispatcher

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use gatesplice_common::{Direction, Opcode};
use gatesplice_core::protocol::{normalize_name, DefVersion, Event, ProtocolCodec};

use crate::dispatch::hooks::{
    HandleState, Hook, HookCallback, HookContext, HookHandle, HookSpec, RawVerdict,
};
use crate::dispatch::registry::{HookKey, HookRegistry};
use crate::dispatch::EventVerdict;
use crate::error::{ProxyError, Result};
use crate::modules::{ModuleApi, ModuleHost, ModuleLoader};

// ============================================
// DispatchSettings
// ============================================

/// Dispatcher tuning knobs, sourced from configuration.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Opcode of the in-band version announcement under the earliest
    /// protocol tables. Versioned constant; 19900 for current builds.
    pub check_version_opcode: u16,
    /// Message name of the version announcement.
    pub check_version_name: String,
    /// Warn when a parsed hook leaves its definition version implied.
    pub warn_implied_version: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            check_version_opcode: 19900,
            check_version_name: "C_CHECK_VERSION".to_string(),
            warn_implied_version: true,
        }
    }
}

impl DispatchSettings {
    /// Applies the `NO_WARN_IMPLIED_VERSION` environment override.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if std::env::var_os("NO_WARN_IMPLIED_VERSION").is_some() {
            self.warn_implied_version = false;
        }
        self
    }
}

// ============================================
// Dispatch I/O types
// ============================================

/// Result of running one message through the hook chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Forward these bytes to the peer.
    Forward(Vec<u8>),
    /// Drop the message; a hook silenced it and nothing un-silenced it.
    Silenced,
}

impl DispatchOutcome {
    /// Returns `true` for the silenced outcome.
    #[must_use]
    pub const fn is_silenced(&self) -> bool {
        matches!(self, Self::Silenced)
    }
}

/// A message a module wants sent.
#[derive(Debug, Clone)]
pub enum InjectPayload {
    /// Pre-framed bytes, sent verbatim without traversing the hook chain.
    Raw(Vec<u8>),
    /// A named event, serialized through the codec and run through the
    /// hook chain with `fake = true` before sending.
    Named {
        /// Message name (loose spelling accepted).
        name: String,
        /// Definition version to serialize against.
        version: DefVersion,
        /// The event payload.
        event: Event,
    },
}

impl InjectPayload {
    /// A named payload serialized against the latest definition.
    #[must_use]
    pub fn named(name: impl Into<String>, event: Event) -> Self {
        Self::Named {
            name: name.into(),
            version: DefVersion::Latest,
            event,
        }
    }
}

/// A frame ready for encryption and transmission, produced by
/// [`Dispatcher::flush_injections`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Which peer the frame goes to.
    pub direction: Direction,
    /// The plaintext frame.
    pub bytes: Vec<u8>,
}

// ============================================
// Queued hooks
// ============================================

struct QueuedHook {
    slot: u64,
    spec: HookSpec,
    module: Option<String>,
    state: Arc<Mutex<HandleState>>,
}

#[derive(Default)]
struct HookQueue {
    next_slot: u64,
    entries: Vec<QueuedHook>,
}

// ============================================
// Dispatcher
// ============================================

/// Per-connection message dispatcher.
///
/// Owns the hook registry and the module host; one instance exists per
/// proxied connection and nothing is shared across connections.
pub struct Dispatcher {
    codec: Arc<dyn ProtocolCodec>,
    settings: DispatchSettings,
    /// 0 = unknown (handshake pending).
    protocol_version: AtomicU32,
    registry: RwLock<HookRegistry>,
    queued: Mutex<HookQueue>,
    host: ModuleHost,
    injections: Mutex<VecDeque<(Direction, InjectPayload)>>,
    wakeup: Mutex<Option<mpsc::UnboundedSender<()>>>,
}

impl Dispatcher {
    /// Creates a dispatcher over a codec.
    #[must_use]
    pub fn new(codec: Arc<dyn ProtocolCodec>, settings: DispatchSettings) -> Self {
        Self {
            codec,
            settings,
            protocol_version: AtomicU32::new(0),
            registry: RwLock::new(HookRegistry::new()),
            queued: Mutex::new(HookQueue::default()),
            host: ModuleHost::new(),
            injections: Mutex::new(VecDeque::new()),
            wakeup: Mutex::new(None),
        }
    }

    /// The negotiated protocol version, 0 while unknown.
    #[must_use]
    pub fn protocol_version(&self) -> u32 {
        self.protocol_version.load(Ordering::SeqCst)
    }

    /// Number of live hooks in the registry (sentinel included).
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Number of hooks queued awaiting the protocol version.
    #[must_use]
    pub fn pending_hook_count(&self) -> usize {
        self.queued.lock().entries.len()
    }

    /// Returns `true` if a module with this name is loaded.
    #[must_use]
    pub fn has_module(&self, name: &str) -> bool {
        self.host.contains(name)
    }

    // ========================================
    // Connection attachment
    // ========================================

    /// Attaches the connection's injection wakeup channel.
    pub fn attach(&self, wakeup: mpsc::UnboundedSender<()>) {
        *self.wakeup.lock() = Some(wakeup);
    }

    /// Detaches from the connection; further wakeups are dropped.
    pub fn detach(&self) {
        *self.wakeup.lock() = None;
    }

    // ========================================
    // Registration
    // ========================================

    /// Registers a hook.
    ///
    /// While the protocol version is unknown the registration is queued;
    /// the returned handle is stable across materialization.
    ///
    /// # Errors
    /// Wildcard registrations pinning an exact definition version are
    /// rejected.
    pub fn hook(&self, spec: HookSpec) -> Result<HookHandle> {
        self.hook_tagged(spec, None)
    }

    pub(crate) fn hook_tagged(
        &self,
        spec: HookSpec,
        module: Option<String>,
    ) -> Result<HookHandle> {
        Self::validate_spec(&spec)?;

        if self.protocol_version() == 0 {
            let mut queue = self.queued.lock();
            let slot = queue.next_slot;
            queue.next_slot += 1;
            let handle = HookHandle::pending(slot);
            debug!(name = %spec.name, slot, "hook queued until protocol version is known");
            queue.entries.push(QueuedHook {
                slot,
                spec,
                module,
                state: handle.state.clone(),
            });
            return Ok(handle);
        }

        let hook = self.materialize(spec, module);
        self.registry.write().add(hook.clone());
        Ok(HookHandle::live(hook))
    }

    /// Removes a registration. Idempotent; works on queued and live hooks.
    pub fn unhook(&self, handle: &HookHandle) {
        let mut state = handle.state.lock();
        match &*state {
            HandleState::Pending(slot) => {
                let slot = *slot;
                self.queued.lock().entries.retain(|e| e.slot != slot);
                *state = HandleState::Released;
            }
            HandleState::Live(hook) => {
                let hook = hook.clone();
                self.registry.write().remove(&hook);
                *state = HandleState::Released;
            }
            HandleState::Released => {}
        }
    }

    fn validate_spec(spec: &HookSpec) -> Result<()> {
        if spec.name == "*" {
            if let Some(DefVersion::Exact(v)) = spec.version {
                return Err(ProxyError::registration(format!(
                    "wildcard hooks cannot pin definition version {v}"
                )));
            }
        }
        Ok(())
    }

    /// Turns a spec into a registry-ready hook under the current protocol
    /// version. Name resolution failures park the hook under the unknown
    /// sentinel; it stays addressable for unhook/unload but never fires.
    fn materialize(&self, spec: HookSpec, module: Option<String>) -> Arc<Hook> {
        let (key, name) = if spec.name == "*" {
            (HookKey::Any, "*".to_string())
        } else {
            let canonical = normalize_name(&spec.name);
            match self
                .codec
                .name_to_code(self.protocol_version(), &canonical)
            {
                Some(code) => (HookKey::Code(code), canonical),
                None => {
                    error!(
                        name = %canonical,
                        module = module.as_deref().unwrap_or("-"),
                        "message name not in protocol maps; hook parked as unknown"
                    );
                    (HookKey::Unknown, canonical)
                }
            }
        };

        let definition = match (&spec.callback, spec.version) {
            (HookCallback::Raw(_), _) => DefVersion::Raw,
            (HookCallback::Event(_), Some(DefVersion::Raw)) => {
                warn!(name = %name, "raw definition on a parsed hook; using latest");
                DefVersion::Latest
            }
            (HookCallback::Event(_), Some(version)) => version,
            (HookCallback::Event(_), None) => {
                if self.settings.warn_implied_version {
                    warn!(
                        name = %name,
                        "definition version left implied; pin one or set NO_WARN_IMPLIED_VERSION"
                    );
                }
                DefVersion::Latest
            }
        };

        if let DefVersion::Exact(pinned) = definition {
            if let Some(latest) = self.codec.latest_definition(&name) {
                if pinned < latest {
                    warn!(
                        name = %name,
                        pinned,
                        latest,
                        "hook pins an outdated definition version"
                    );
                }
            }
        }

        Arc::new(Hook {
            key,
            name,
            filter: spec.filter,
            order: spec.order,
            definition,
            module,
            callback: spec.callback,
        })
    }

    // ========================================
    // Protocol version
    // ========================================

    /// Stores the negotiated protocol version and materializes queued
    /// hooks in registration order. Version 0 ("unknown") is a no-op
    /// beyond logging.
    pub fn set_protocol_version(&self, version: u32) {
        if version == 0 {
            info!("protocol version 0 means unknown; ignoring");
            return;
        }

        let previous = self.protocol_version.swap(version, Ordering::SeqCst);
        if previous != 0 && previous != version {
            warn!(previous, version, "protocol version changed mid-connection");
        }

        if self.codec.has_protocol_version(version) {
            info!(version, "protocol version set");
        } else {
            error!(
                version,
                "codec has no maps for this protocol version; hook names will not resolve"
            );
        }

        self.drain_queued();
    }

    fn drain_queued(&self) {
        let entries = std::mem::take(&mut self.queued.lock().entries);
        if entries.is_empty() {
            return;
        }
        debug!(count = entries.len(), "materializing queued hooks");

        for entry in entries {
            let hook = self.materialize(entry.spec, entry.module);
            self.registry.write().add(hook.clone());
            *entry.state.lock() = HandleState::Live(hook);
        }
    }

    /// Parses the in-band version announcement under the earliest known
    /// tables and adopts `version[0].value`.
    fn detect_protocol_version(&self, data: &[u8]) {
        let Some(base) = self.codec.earliest_protocol_version() else {
            warn!("codec has no protocol tables; cannot detect version");
            return;
        };
        let name = self.settings.check_version_name.as_str();
        let definition = self
            .codec
            .earliest_definition(name)
            .map_or(DefVersion::Latest, DefVersion::Exact);
        let code = u16::from_le_bytes([data[2], data[3]]);

        let event = match self.codec.parse(base, code, definition, data) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "version announcement did not parse under the base tables");
                return;
            }
        };

        let entry = event.get("version").and_then(|v| v.get(0));
        let index = entry.and_then(|e| e.get("index")).and_then(Event::as_u64);
        let value = entry.and_then(|e| e.get("value")).and_then(Event::as_u64);

        match (index, value) {
            (Some(0), Some(value)) => {
                let Ok(version) = u32::try_from(value) else {
                    warn!(value, "announced protocol version overflows u32");
                    return;
                };
                debug!(version, "protocol version detected in-band");
                self.set_protocol_version(version);
            }
            _ => warn!("version announcement lacks an index-0 entry"),
        }
    }

    // ========================================
    // Message handling
    // ========================================

    /// Runs one framed message through the hook chain.
    ///
    /// `incoming` marks server→client traffic; `fake` marks synthesized
    /// messages. Never fails: all codec and user-code errors are logged
    /// and degrade per the module contract.
    #[must_use]
    pub fn handle(&self, mut data: Vec<u8>, incoming: bool, fake: bool) -> DispatchOutcome {
        let Some(code) = Opcode::from_frame(&data) else {
            warn!(len = data.len(), "frame below header size reached dispatch");
            return DispatchOutcome::Forward(data);
        };

        if code.value() == self.settings.check_version_opcode && self.protocol_version() == 0 {
            self.detect_protocol_version(&data);
        }

        let hooks = self.registry.read().merged(code);
        if hooks.is_empty() {
            return DispatchOutcome::Forward(data);
        }

        trace!(code = %code, hooks = hooks.len(), incoming, fake, "dispatching");

        let copy = data.clone();
        let mut modified = false;
        let mut silenced = false;

        for hook in &hooks {
            let ctx = HookContext {
                code,
                incoming,
                fake,
                modified,
                silenced,
            };
            if !hook.filter.accepts(&ctx) {
                continue;
            }

            match &hook.callback {
                HookCallback::Raw(callback) => match callback(&ctx, &mut data) {
                    Ok(RawVerdict::Replace(buffer)) => {
                        if buffer != data {
                            modified = true;
                        }
                        data = buffer;
                    }
                    Ok(RawVerdict::Silence) => silenced = true,
                    Ok(RawVerdict::Unsilence) => silenced = false,
                    Ok(RawVerdict::Pass) => {
                        if !modified && data != copy {
                            modified = true;
                        }
                    }
                    Err(e) => {
                        error!(
                            hook = %hook.name,
                            module = hook.module.as_deref().unwrap_or("-"),
                            error = %e,
                            "raw hook failed; continuing"
                        );
                    }
                },
                HookCallback::Event(callback) => {
                    let version = self.protocol_version();
                    let mut event = match self.codec.parse(
                        version,
                        code.value(),
                        hook.definition,
                        &data,
                    ) {
                        Ok(event) => event,
                        Err(e) => {
                            // The chain stops here and the current buffer is
                            // forwarded, raw mutations included.
                            error!(
                                hook = %hook.name,
                                module = hook.module.as_deref().unwrap_or("-"),
                                payload = %hex::encode(&data),
                                error = %e,
                                "parse failed in handle(); forwarding current bytes"
                            );
                            return DispatchOutcome::Forward(data);
                        }
                    };

                    match callback(&ctx, &mut event) {
                        Ok(EventVerdict::Commit) => {
                            silenced = false;
                            match self.codec.write(
                                version,
                                code.value(),
                                hook.definition,
                                &event,
                            ) {
                                Ok(frame) => {
                                    data = frame;
                                    modified = true;
                                }
                                Err(e) => {
                                    error!(
                                        hook = %hook.name,
                                        module = hook.module.as_deref().unwrap_or("-"),
                                        payload = %hex::encode(&data),
                                        error = %e,
                                        "write failed in handle(); keeping previous bytes"
                                    );
                                }
                            }
                        }
                        Ok(EventVerdict::Silence) => silenced = true,
                        Ok(EventVerdict::Pass) => {}
                        Err(e) => {
                            error!(
                                hook = %hook.name,
                                module = hook.module.as_deref().unwrap_or("-"),
                                error = %e,
                                "parsed hook failed; continuing"
                            );
                        }
                    }
                }
            }
        }

        if silenced {
            DispatchOutcome::Silenced
        } else {
            DispatchOutcome::Forward(data)
        }
    }

    // ========================================
    // Outbound synthesis
    // ========================================

    /// Queues a synthesized message for the connection to send.
    ///
    /// Processing happens after the in-flight `handle` returns: named
    /// payloads traverse the hook chain with `fake = true` inside
    /// [`Self::flush_injections`], raw payloads go out verbatim.
    pub fn inject(&self, direction: Direction, payload: InjectPayload) {
        self.injections.lock().push_back((direction, payload));
        if let Some(wakeup) = &*self.wakeup.lock() {
            let _ = wakeup.send(());
        }
    }

    /// Drains pending injections into ready-to-send frames, running named
    /// payloads through the hook chain. Hooks firing here may inject
    /// again; the loop runs until the queue is empty.
    pub fn flush_injections(&self) -> Vec<OutboundFrame> {
        let mut out = Vec::new();

        loop {
            let Some((direction, payload)) = self.injections.lock().pop_front() else {
                break;
            };

            match payload {
                InjectPayload::Raw(bytes) => out.push(OutboundFrame { direction, bytes }),
                InjectPayload::Named {
                    name,
                    version,
                    event,
                } => match self.serialize_named(&name, version, &event) {
                    Ok(frame) => match self.handle(frame, direction.is_incoming(), true) {
                        DispatchOutcome::Forward(bytes) => {
                            out.push(OutboundFrame { direction, bytes });
                        }
                        DispatchOutcome::Silenced => {
                            trace!(name = %name, %direction, "synthesized message silenced");
                        }
                    },
                    Err(e) => {
                        error!(name = %name, %direction, error = %e, "failed to synthesize message");
                    }
                },
            }
        }

        out
    }

    fn serialize_named(
        &self,
        name: &str,
        version: DefVersion,
        event: &Event,
    ) -> Result<Vec<u8>> {
        let protocol_version = self.protocol_version();
        if protocol_version == 0 {
            return Err(ProxyError::inject(
                "protocol version is not known yet; cannot resolve the name",
            ));
        }
        if version.is_raw() {
            return Err(ProxyError::inject(
                "raw definition cannot be serialized; pass raw bytes instead",
            ));
        }

        let canonical = normalize_name(name);
        let code = self
            .codec
            .name_to_code(protocol_version, &canonical)
            .ok_or_else(|| {
                ProxyError::inject(format!("name '{canonical}' not in protocol maps"))
            })?;

        Ok(self.codec.write(protocol_version, code, version, event)?)
    }

    // ========================================
    // Module lifecycle
    // ========================================

    /// Loads a module through a loader, handing it a wrapper pre-tagged
    /// with its name. Loading a loaded module keeps the existing instance.
    ///
    /// # Errors
    /// Constructor failures are logged and leave no record.
    pub fn load_module(self: &Arc<Self>, name: &str, loader: &dyn ModuleLoader) -> Result<()> {
        if self.host.contains(name) {
            debug!(module = name, "module already loaded");
            return Ok(());
        }

        let api = ModuleApi::new(Arc::downgrade(self), name.to_string());
        match loader.construct(name, api) {
            Ok(instance) => {
                self.host.insert(name.to_string(), instance);
                info!(module = name, "module loaded");
                Ok(())
            }
            Err(e) => {
                error!(module = name, error = %e, "module constructor failed");
                Err(ProxyError::module_load(name, e.to_string()))
            }
        }
    }

    /// Unloads a module: revokes its hooks (live and queued), runs its
    /// destructor, drops the record.
    ///
    /// # Returns
    /// `false` if no such module was loaded.
    pub fn unload_module(&self, name: &str) -> bool {
        let Some(mut instance) = self.host.take(name) else {
            debug!(module = name, "unload requested for module that is not loaded");
            return false;
        };

        let revoked = self.registry.write().remove_module(name);

        let mut released = Vec::new();
        self.queued.lock().entries.retain(|entry| {
            if entry.module.as_deref() == Some(name) {
                released.push(entry.state.clone());
                false
            } else {
                true
            }
        });
        let released_count = released.len();
        for state in released {
            *state.lock() = HandleState::Released;
        }

        if let Err(e) = instance.on_unload() {
            error!(module = name, error = %e, "module destructor failed");
        }

        info!(
            module = name,
            revoked,
            queued = released_count,
            "module unloaded"
        );
        true
    }

    /// Unloads every module, then clears the registry, the hook queue and
    /// any pending injections. Called when the connection closes.
    pub fn reset(&self) {
        for name in self.host.names() {
            self.unload_module(&name);
        }

        self.registry.write().clear();

        let entries = std::mem::take(&mut self.queued.lock().entries);
        for entry in entries {
            *entry.state.lock() = HandleState::Released;
        }

        self.injections.lock().clear();
        debug!("dispatcher reset");
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("protocol_version", &self.protocol_version())
            .field("hooks", &self.hook_count())
            .field("pending_hooks", &self.pending_hook_count())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
