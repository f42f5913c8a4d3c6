// ============================================
// File: crates/gatesplice-proxy/src/modules.rs
// ============================================
//! # Module Host
//!
//! ## Creation Reason
//! User functionality plugs into the proxy as modules: constructed per
//! connection, handed a capability wrapper over the dispatcher, torn down
//! with the connection. This module defines the module contract, the host
//! table and the wrapper.
//!
//! ## Main Functionality
//! - `Module`: the trait user modules implement (`on_unload` destructor)
//! - `ModuleLoader`: resolves a module name to a constructor
//! - `StaticLoader`: loader over a fixed factory table
//! - `ModuleHost`: the per-dispatcher instance table
//! - `ModuleApi`: the wrapper handed to each module
//!
//! ## Lifecycle
//! ```text
//! load(name)   ──► loader.construct(name, wrapper) ──► recorded
//! unload(name) ──► hooks revoked (live + queued) ──► on_unload() ──► dropped
//! reset()      ──► unload every module ──► registry and queue cleared
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Hooks registered through the wrapper carry the module's *name*; the
//!   registry revokes by that name on unload, so a module must never
//!   register hooks for another module through its own wrapper
//! - The wrapper holds a `Weak` dispatcher reference; after the
//!   connection closes every wrapper call degrades to a logged no-op
//!
//! ## Last Modified
//! v0.1.0 - Initial module host

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use gatesplice_common::Direction;

use crate::dispatch::{Dispatcher, HookHandle, HookSpec, InjectPayload};
use crate::error::{ProxyError, Result};
use crate::dispatch::hooks::HookError;

// ============================================
// Module contract
// ============================================

/// A user module instance, alive from `load` to `unload`/`reset`.
pub trait Module: Send {
    /// Destructor hook, invoked exactly once at unload. Errors are logged
    /// and do not abort the unload.
    fn on_unload(&mut self) -> std::result::Result<(), HookError> {
        Ok(())
    }
}

/// Resolves module names to constructors.
pub trait ModuleLoader: Send + Sync {
    /// Constructs the module named `name`, handing it its wrapper.
    ///
    /// # Errors
    /// Constructor failures are logged by the host; no record is kept.
    fn construct(
        &self,
        name: &str,
        api: ModuleApi,
    ) -> std::result::Result<Box<dyn Module>, HookError>;
}

/// Factory closure stored by [`StaticLoader`].
pub type ModuleFactory =
    Box<dyn Fn(ModuleApi) -> std::result::Result<Box<dyn Module>, HookError> + Send + Sync>;

/// A loader over a fixed name→factory table.
#[derive(Default)]
pub struct StaticLoader {
    factories: HashMap<String, ModuleFactory>,
}

impl StaticLoader {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under a module name.
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(ModuleApi) -> std::result::Result<Box<dyn Module>, HookError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }
}

impl ModuleLoader for StaticLoader {
    fn construct(
        &self,
        name: &str,
        api: ModuleApi,
    ) -> std::result::Result<Box<dyn Module>, HookError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| format!("no module named '{name}'"))?;
        factory(api)
    }
}

// ============================================
// ModuleHost
// ============================================

/// The per-dispatcher module instance table.
pub(crate) struct ModuleHost {
    table: Mutex<HashMap<String, Box<dyn Module>>>,
}

impl ModuleHost {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.table.lock().contains_key(name)
    }

    pub(crate) fn insert(&self, name: String, instance: Box<dyn Module>) {
        self.table.lock().insert(name, instance);
    }

    pub(crate) fn take(&self, name: &str) -> Option<Box<dyn Module>> {
        self.table.lock().remove(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.table.lock().keys().cloned().collect()
    }
}

// ============================================
// ModuleApi
// ============================================

/// The capability wrapper handed to each module.
///
/// A thin view over the dispatcher: registrations made through it are
/// pre-tagged with the module's name so unload can revoke them, and
/// synthesized messages are attributed in the logs.
#[derive(Clone)]
pub struct ModuleApi {
    dispatcher: Weak<Dispatcher>,
    module: String,
}

impl ModuleApi {
    pub(crate) fn new(dispatcher: Weak<Dispatcher>, module: String) -> Self {
        Self { dispatcher, module }
    }

    /// The owning module's name.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module
    }

    fn dispatcher(&self) -> Result<Arc<Dispatcher>> {
        self.dispatcher.upgrade().ok_or(ProxyError::Detached)
    }

    /// Registers a hook owned by this module.
    ///
    /// # Errors
    /// Same rules as [`Dispatcher::hook`], plus `Detached` after the
    /// connection closed.
    pub fn hook(&self, spec: HookSpec) -> Result<HookHandle> {
        self.dispatcher()?
            .hook_tagged(spec, Some(self.module.clone()))
    }

    /// Removes a registration. No-op after the connection closed.
    pub fn unhook(&self, handle: &HookHandle) {
        match self.dispatcher() {
            Ok(dispatcher) => dispatcher.unhook(handle),
            Err(_) => warn!(module = %self.module, "unhook after connection close"),
        }
    }

    /// Loads another module on the same dispatcher.
    pub fn load(&self, name: &str, loader: &dyn ModuleLoader) -> Result<()> {
        self.dispatcher()?.load_module(name, loader)
    }

    /// Unloads a module on the same dispatcher.
    pub fn unload(&self, name: &str) -> Result<bool> {
        Ok(self.dispatcher()?.unload_module(name))
    }

    /// Queues a synthesized message toward the game client.
    pub fn to_client(&self, payload: InjectPayload) {
        self.send(Direction::ToClient, payload);
    }

    /// Queues a synthesized message toward the game server.
    pub fn to_server(&self, payload: InjectPayload) {
        self.send(Direction::ToServer, payload);
    }

    fn send(&self, direction: Direction, payload: InjectPayload) {
        match self.dispatcher() {
            Ok(dispatcher) => dispatcher.inject(direction, payload),
            Err(_) => warn!(
                module = %self.module,
                %direction,
                "synthesized message dropped after connection close"
            ),
        }
    }
}

impl std::fmt::Debug for ModuleApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleApi")
            .field("module", &self.module)
            .field("attached", &(self.dispatcher.strong_count() > 0))
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::dispatch::{DispatchSettings, EventVerdict, HookSpec, RawVerdict};
    use gatesplice_core::TableCodec;

    const TABLE: &str = r#"{
        "maps": {
            "100": { "C_TEST": 13330, "S_LOGIN": 10001 }
        },
        "messages": {
            "C_TEST":  { "1": [ { "name": "seq", "type": "u32" } ] },
            "S_LOGIN": { "1": [ { "name": "id",  "type": "u32" } ] }
        }
    }"#;

    fn dispatcher() -> Arc<Dispatcher> {
        let codec = Arc::new(TableCodec::from_json_str(TABLE).unwrap());
        let settings = DispatchSettings {
            warn_implied_version: false,
            ..DispatchSettings::default()
        };
        let d = Arc::new(Dispatcher::new(codec, settings));
        d.set_protocol_version(100);
        d
    }

    /// `C_TEST` frame: opcode 0x3412.
    fn test_frame() -> Vec<u8> {
        vec![0x08, 0x00, 0x12, 0x34, 0xaa, 0xbb, 0xcc, 0xdd]
    }

    /// A module that registers hooks on two messages and counts events.
    struct Counter {
        destructed: Arc<AtomicUsize>,
    }

    impl Module for Counter {
        fn on_unload(&mut self) -> std::result::Result<(), HookError> {
            self.destructed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counter_loader(
        fired: Arc<AtomicUsize>,
        destructed: Arc<AtomicUsize>,
    ) -> StaticLoader {
        StaticLoader::new().with("counter", move |api: ModuleApi| {
            let f1 = fired.clone();
            api.hook(HookSpec::raw("cTest", move |_ctx, _data| {
                f1.fetch_add(1, Ordering::SeqCst);
                Ok(RawVerdict::Pass)
            }))?;
            let f2 = fired.clone();
            api.hook(HookSpec::parsed("sLogin", move |_ctx, _event| {
                f2.fetch_add(1, Ordering::SeqCst);
                Ok(EventVerdict::Pass)
            }))?;
            Ok(Box::new(Counter {
                destructed: destructed.clone(),
            }) as Box<dyn Module>)
        })
    }

    #[test]
    fn test_load_registers_tagged_hooks() {
        let d = dispatcher();
        let fired = Arc::new(AtomicUsize::new(0));
        let destructed = Arc::new(AtomicUsize::new(0));

        d.load_module("counter", &counter_loader(fired.clone(), destructed.clone()))
            .unwrap();
        assert!(d.has_module("counter"));
        assert_eq!(d.hook_count(), 2);

        let _ = d.handle(test_frame(), false, false);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_double_load_keeps_existing_instance() {
        let d = dispatcher();
        let fired = Arc::new(AtomicUsize::new(0));
        let destructed = Arc::new(AtomicUsize::new(0));
        let loader = counter_loader(fired, destructed);

        d.load_module("counter", &loader).unwrap();
        d.load_module("counter", &loader).unwrap();
        // The second load did not construct again.
        assert_eq!(d.hook_count(), 2);
    }

    #[test]
    fn test_unload_revokes_hooks_and_runs_destructor_once() {
        let d = dispatcher();
        let fired = Arc::new(AtomicUsize::new(0));
        let destructed = Arc::new(AtomicUsize::new(0));

        d.load_module("counter", &counter_loader(fired.clone(), destructed.clone()))
            .unwrap();
        assert!(d.unload_module("counter"));

        assert!(!d.has_module("counter"));
        assert_eq!(d.hook_count(), 0);
        assert_eq!(destructed.load(Ordering::SeqCst), 1);

        // Matching messages no longer invoke anything.
        let frame = test_frame();
        let out = d.handle(frame.clone(), false, false);
        assert_eq!(out, crate::dispatch::DispatchOutcome::Forward(frame));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Unloading again reports absence and does not re-run the
        // destructor.
        assert!(!d.unload_module("counter"));
        assert_eq!(destructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unload_spares_other_modules() {
        let d = dispatcher();
        let fired_a = Arc::new(AtomicUsize::new(0));
        let fired_b = Arc::new(AtomicUsize::new(0));

        let loader = StaticLoader::new()
            .with("a", {
                let fired = fired_a.clone();
                move |api: ModuleApi| {
                    let fired = fired.clone();
                    api.hook(HookSpec::raw("cTest", move |_ctx, _data| {
                        fired.fetch_add(1, Ordering::SeqCst);
                        Ok(RawVerdict::Pass)
                    }))?;
                    Ok(Box::new(Counter {
                        destructed: Arc::new(AtomicUsize::new(0)),
                    }) as Box<dyn Module>)
                }
            })
            .with("b", {
                let fired = fired_b.clone();
                move |api: ModuleApi| {
                    let fired = fired.clone();
                    api.hook(HookSpec::raw("cTest", move |_ctx, _data| {
                        fired.fetch_add(1, Ordering::SeqCst);
                        Ok(RawVerdict::Pass)
                    }))?;
                    Ok(Box::new(Counter {
                        destructed: Arc::new(AtomicUsize::new(0)),
                    }) as Box<dyn Module>)
                }
            });

        d.load_module("a", &loader).unwrap();
        d.load_module("b", &loader).unwrap();
        d.unload_module("a");

        let _ = d.handle(test_frame(), false, false);
        assert_eq!(fired_a.load(Ordering::SeqCst), 0);
        assert_eq!(fired_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_constructor_failure_leaves_no_record() {
        let d = dispatcher();
        let loader =
            StaticLoader::new().with("broken", |_api| Err("constructor exploded".into()));

        assert!(d.load_module("broken", &loader).is_err());
        assert!(!d.has_module("broken"));
        assert_eq!(d.hook_count(), 0);
    }

    #[test]
    fn test_unknown_module_name() {
        let d = dispatcher();
        let loader = StaticLoader::new();
        assert!(d.load_module("ghost", &loader).is_err());
    }

    #[test]
    fn test_unload_revokes_queued_hooks() {
        let codec = Arc::new(TableCodec::from_json_str(TABLE).unwrap());
        let d = Arc::new(Dispatcher::new(
            codec,
            DispatchSettings {
                warn_implied_version: false,
                ..DispatchSettings::default()
            },
        ));
        let destructed = Arc::new(AtomicUsize::new(0));

        let loader = StaticLoader::new().with("early", {
            let destructed = destructed.clone();
            move |api: ModuleApi| {
                api.hook(HookSpec::raw("cTest", |_ctx, _data| Ok(RawVerdict::Pass)))?;
                Ok(Box::new(Counter {
                    destructed: destructed.clone(),
                }) as Box<dyn Module>)
            }
        });

        // Version unknown: the module's hook is queued, not live.
        d.load_module("early", &loader).unwrap();
        assert_eq!(d.pending_hook_count(), 1);
        assert_eq!(d.hook_count(), 0);

        d.unload_module("early");
        assert_eq!(d.pending_hook_count(), 0);

        // Materialization later must not resurrect it.
        d.set_protocol_version(100);
        assert_eq!(d.hook_count(), 0);
        assert_eq!(destructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_unloads_everything() {
        let d = dispatcher();
        let fired = Arc::new(AtomicUsize::new(0));
        let destructed = Arc::new(AtomicUsize::new(0));

        d.load_module("counter", &counter_loader(fired, destructed.clone()))
            .unwrap();
        // Plus a loose hook registered outside any module.
        d.hook(HookSpec::raw("cTest", |_ctx, _data| Ok(RawVerdict::Pass)))
            .unwrap();
        assert_eq!(d.hook_count(), 3);

        d.reset();

        assert!(!d.has_module("counter"));
        assert_eq!(d.hook_count(), 0);
        assert_eq!(d.pending_hook_count(), 0);
        assert_eq!(destructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wrapper_injects_through_dispatcher() {
        let d = dispatcher();

        let loader = StaticLoader::new().with("sender", |api: ModuleApi| {
            api.to_server(crate::dispatch::InjectPayload::Raw(vec![
                0x05, 0x00, 0x12, 0x34, 0x01,
            ]));
            Ok(Box::new(Counter {
                destructed: Arc::new(AtomicUsize::new(0)),
            }) as Box<dyn Module>)
        });

        d.load_module("sender", &loader).unwrap();
        let out = d.flush_injections();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].direction, gatesplice_common::Direction::ToServer);
    }

    #[test]
    fn test_wrapper_detached_after_drop() {
        let d = dispatcher();
        let api = ModuleApi::new(Arc::downgrade(&d), "late".to_string());
        drop(d);

        assert!(matches!(
            api.hook(HookSpec::raw("cTest", |_ctx, _data| Ok(RawVerdict::Pass))),
            Err(ProxyError::Detached)
        ));
        // Injection degrades to a logged no-op.
        api.to_client(crate::dispatch::InjectPayload::Raw(vec![0x04, 0, 0, 0]));
    }

    #[test]
    fn test_module_can_unhook_its_own_hook() {
        let d = dispatcher();
        let fired = Arc::new(AtomicUsize::new(0));

        let loader = StaticLoader::new().with("oneshot", {
            let fired = fired.clone();
            move |api: ModuleApi| {
                let fired = fired.clone();
                let handle = api.hook(HookSpec::raw("cTest", move |_ctx, _data| {
                    fired.fetch_add(1, Ordering::SeqCst);
                    Ok(RawVerdict::Pass)
                }))?;
                api.unhook(&handle);
                Ok(Box::new(Counter {
                    destructed: Arc::new(AtomicUsize::new(0)),
                }) as Box<dyn Module>)
            }
        });

        d.load_module("oneshot", &loader).unwrap();
        assert_eq!(d.hook_count(), 0);
        let _ = d.handle(test_frame(), false, false);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
