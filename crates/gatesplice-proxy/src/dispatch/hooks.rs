// ============================================
// File: crates/gatesplice-proxy/src/dispatch/hooks.rs
// ============================================
//! # Hook Types
//!
//! ## Creation Reason
//! Defines everything a hook registration consists of: the filter, the
//! callback shapes, the `HookSpec` builder modules construct, the live
//! `Hook` record the registry stores, and the stable `HookHandle` returned
//! to callers.
//!
//! ## Main Functionality
//! - `HookFilter`: tri-state predicates over a message's dispatch flags
//! - `HookContext`: read-only flag snapshot passed to every callback
//! - `RawVerdict` / `EventVerdict`: what a callback decided
//! - `HookSpec`: registration request (builder style)
//! - `Hook`: materialized registration; identity is by `Arc` pointer
//! - `HookHandle`: stable handle, valid before and after materialization
//!
//! ## Callback Contract
//! ```text
//! raw hook:    Fn(&HookContext, &mut Vec<u8>) -> Result<RawVerdict>
//! parsed hook: Fn(&HookContext, &mut Event)   -> Result<EventVerdict>
//! ```
//! Callbacks run synchronously inside `Dispatcher::handle` and must not
//! block. An `Err` return is logged with the hook's name and owning module
//! and the chain continues.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Two structurally identical hooks are distinct registrations; never
//!   compare hooks by content, only by `Arc::ptr_eq`
//! - A hook carries its owning module's *name*, never a pointer to the
//!   module, so unload can revoke without reference cycles
//!
//! ## Last Modified
//! v0.1.0 - Initial hook types

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use gatesplice_common::Opcode;
use gatesplice_core::protocol::{DefVersion, Event};

use crate::dispatch::registry::HookKey;

// ============================================
// Errors from user callbacks
// ============================================

/// Error type user callbacks may return; logged, never propagated.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for user callbacks.
pub type HookResult<T> = std::result::Result<T, HookError>;

// ============================================
// HookContext
// ============================================

/// Read-only snapshot of the dispatch flags at the moment a callback runs.
#[derive(Debug, Clone, Copy)]
pub struct HookContext {
    /// Opcode of the message being dispatched.
    pub code: Opcode,
    /// `true` for server→client traffic.
    pub incoming: bool,
    /// `true` for messages synthesized via `to_client`/`to_server`.
    pub fake: bool,
    /// `true` once a prior hook mutated the message.
    pub modified: bool,
    /// `true` while the message is currently suppressed.
    pub silenced: bool,
}

// ============================================
// HookFilter
// ============================================

/// Tri-state predicates deciding whether a hook sees a message.
///
/// `None` means "don't care"; `Some(v)` requires the corresponding dispatch
/// flag to equal `v` at the moment the hook would fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookFilter {
    /// Match on the `fake` flag. Default `Some(false)`: real traffic only.
    pub fake: Option<bool>,
    /// Match on the `incoming` flag. Default `None`.
    pub incoming: Option<bool>,
    /// Match on the running `modified` flag. Default `None`.
    pub modified: Option<bool>,
    /// Match on the running `silenced` flag. Default `Some(false)`.
    pub silenced: Option<bool>,
}

impl Default for HookFilter {
    fn default() -> Self {
        Self {
            fake: Some(false),
            incoming: None,
            modified: None,
            silenced: Some(false),
        }
    }
}

impl HookFilter {
    /// A filter that matches every message.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            fake: None,
            incoming: None,
            modified: None,
            silenced: None,
        }
    }

    /// Folds the deprecated `type` option (`"all"`/`"fake"`/`"real"`) into
    /// the `fake` predicate. Unknown strings leave the default untouched.
    #[must_use]
    pub fn with_legacy_type(mut self, kind: &str) -> Self {
        match kind {
            "all" => self.fake = None,
            "fake" => self.fake = Some(true),
            "real" => self.fake = Some(false),
            _ => {}
        }
        self
    }

    /// Returns `true` if the message's current flags satisfy the filter.
    #[must_use]
    pub fn accepts(&self, ctx: &HookContext) -> bool {
        fn check(want: Option<bool>, have: bool) -> bool {
            want.map_or(true, |w| w == have)
        }
        check(self.fake, ctx.fake)
            && check(self.incoming, ctx.incoming)
            && check(self.modified, ctx.modified)
            && check(self.silenced, ctx.silenced)
    }
}

// ============================================
// Verdicts
// ============================================

/// Outcome of a raw hook callback.
#[derive(Debug)]
pub enum RawVerdict {
    /// No explicit decision; in-place edits are detected by comparison
    /// with the dispatch snapshot.
    Pass,
    /// Replace the message with this buffer.
    Replace(Vec<u8>),
    /// Suppress the message (a later hook may still un-silence it).
    Silence,
    /// Explicitly clear a prior suppression.
    Unsilence,
}

/// Outcome of a parsed hook callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventVerdict {
    /// Event edits are discarded; the message is untouched.
    Pass,
    /// Re-serialize the (possibly edited) event, mark the message modified
    /// and clear any suppression.
    Commit,
    /// Suppress the message.
    Silence,
}

// ============================================
// Callbacks
// ============================================

/// Raw callback signature.
pub type RawHookFn = dyn Fn(&HookContext, &mut Vec<u8>) -> HookResult<RawVerdict> + Send + Sync;

/// Parsed callback signature.
pub type EventHookFn = dyn Fn(&HookContext, &mut Event) -> HookResult<EventVerdict> + Send + Sync;

/// The two callback shapes a hook can take.
pub enum HookCallback {
    /// Sees the opaque frame bytes.
    Raw(Box<RawHookFn>),
    /// Sees the parsed event.
    Event(Box<EventHookFn>),
}

impl HookCallback {
    /// Returns `true` for the raw shape.
    #[must_use]
    pub const fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }
}

impl fmt::Debug for HookCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(_) => write!(f, "HookCallback::Raw"),
            Self::Event(_) => write!(f, "HookCallback::Event"),
        }
    }
}

// ============================================
// HookSpec
// ============================================

/// A hook registration request.
///
/// # Example
/// ```ignore
/// let spec = HookSpec::parsed("sLogin", |_ctx, event| {
///     event["name"] = "renamed".into();
///     Ok(EventVerdict::Commit)
/// })
/// .version(DefVersion::Exact(2))
/// .order(-10);
/// dispatcher.hook(spec)?;
/// ```
#[derive(Debug)]
pub struct HookSpec {
    /// Message name as given by the caller (normalized at materialization).
    pub name: String,
    /// Requested definition version; `None` means "implied latest", which
    /// warns unless suppressed by configuration.
    pub version: Option<DefVersion>,
    /// Chain position; lower fires earlier. Default 0.
    pub order: i32,
    /// Dispatch-flag filter.
    pub filter: HookFilter,
    /// The callback.
    pub callback: HookCallback,
}

impl HookSpec {
    /// Creates a raw hook registration.
    pub fn raw<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&HookContext, &mut Vec<u8>) -> HookResult<RawVerdict> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            version: Some(DefVersion::Raw),
            order: 0,
            filter: HookFilter::default(),
            callback: HookCallback::Raw(Box::new(callback)),
        }
    }

    /// Creates a parsed hook registration with the implied latest version.
    pub fn parsed<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&HookContext, &mut Event) -> HookResult<EventVerdict> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            version: None,
            order: 0,
            filter: HookFilter::default(),
            callback: HookCallback::Event(Box::new(callback)),
        }
    }

    /// Pins the definition version.
    #[must_use]
    pub fn version(mut self, version: DefVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Pins the definition version from a loose string spelling
    /// (`"latest"`, `"*"`, `"raw"` or a decimal revision).
    #[must_use]
    pub fn version_lenient(self, version: &str) -> Self {
        self.version(DefVersion::parse_lenient(version))
    }

    /// Sets the chain position.
    #[must_use]
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Sets the dispatch-flag filter.
    #[must_use]
    pub fn filter(mut self, filter: HookFilter) -> Self {
        self.filter = filter;
        self
    }
}

// ============================================
// Hook
// ============================================

/// A materialized hook as stored by the registry.
///
/// Identity is the `Arc` allocation: the registry removes by pointer
/// equality, so two structurally equal hooks never alias.
#[derive(Debug)]
pub struct Hook {
    /// Registry key this hook lives under.
    pub key: HookKey,
    /// Canonical message name (`"*"` for globals, the normalized name
    /// otherwise, even when unresolved).
    pub name: String,
    /// Dispatch-flag filter.
    pub filter: HookFilter,
    /// Chain position.
    pub order: i32,
    /// Definition version events are parsed against; `Raw` for raw hooks.
    pub definition: DefVersion,
    /// Owning module, if registered through a module wrapper.
    pub module: Option<String>,
    /// The callback.
    pub callback: HookCallback,
}

// ============================================
// HookHandle
// ============================================

pub(crate) enum HandleState {
    /// Queued while the protocol version is unknown; the value is the
    /// queue slot.
    Pending(u64),
    /// Live in the registry.
    Live(Arc<Hook>),
    /// Unhooked (or revoked by module unload).
    Released,
}

/// Stable handle to a registration, valid from the `hook` call onward.
///
/// The handle outlives queueing: a hook registered before the protocol
/// version is known is materialized in place, and the same handle then
/// refers to the live registration. `unhook` through a released handle is
/// a no-op.
#[derive(Clone)]
pub struct HookHandle {
    pub(crate) state: Arc<Mutex<HandleState>>,
}

impl HookHandle {
    pub(crate) fn pending(slot: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(HandleState::Pending(slot))),
        }
    }

    pub(crate) fn live(hook: Arc<Hook>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HandleState::Live(hook))),
        }
    }

    /// Returns `true` while the registration is queued awaiting the
    /// protocol version.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(&*self.state.lock(), HandleState::Pending(_))
    }

    /// Returns `true` while the registration is live in the registry.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(&*self.state.lock(), HandleState::Live(_))
    }

    /// Returns `true` once unhooked or revoked.
    #[must_use]
    pub fn is_released(&self) -> bool {
        matches!(&*self.state.lock(), HandleState::Released)
    }
}

impl fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            HandleState::Pending(slot) => format!("pending({slot})"),
            HandleState::Live(hook) => format!("live({})", hook.name),
            HandleState::Released => "released".to_string(),
        };
        f.debug_struct("HookHandle").field("state", &state).finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(fake: bool, incoming: bool, modified: bool, silenced: bool) -> HookContext {
        HookContext {
            code: Opcode::new(1),
            incoming,
            fake,
            modified,
            silenced,
        }
    }

    #[test]
    fn test_default_filter() {
        let filter = HookFilter::default();

        // Real, unsilenced traffic passes regardless of direction/mutation.
        assert!(filter.accepts(&ctx(false, true, false, false)));
        assert!(filter.accepts(&ctx(false, false, true, false)));

        // Fake or silenced traffic is excluded by default.
        assert!(!filter.accepts(&ctx(true, false, false, false)));
        assert!(!filter.accepts(&ctx(false, false, false, true)));
    }

    #[test]
    fn test_any_filter() {
        let filter = HookFilter::any();
        assert!(filter.accepts(&ctx(true, true, true, true)));
        assert!(filter.accepts(&ctx(false, false, false, false)));
    }

    #[test]
    fn test_explicit_predicates() {
        let filter = HookFilter {
            incoming: Some(true),
            ..HookFilter::any()
        };
        assert!(filter.accepts(&ctx(true, true, false, true)));
        assert!(!filter.accepts(&ctx(false, false, false, false)));

        let filter = HookFilter {
            modified: Some(true),
            ..HookFilter::any()
        };
        assert!(filter.accepts(&ctx(false, false, true, false)));
        assert!(!filter.accepts(&ctx(false, false, false, false)));
    }

    #[test]
    fn test_legacy_type_folding() {
        assert_eq!(HookFilter::default().with_legacy_type("all").fake, None);
        assert_eq!(
            HookFilter::default().with_legacy_type("fake").fake,
            Some(true)
        );
        assert_eq!(
            HookFilter::default().with_legacy_type("real").fake,
            Some(false)
        );
        // Unknown strings keep the default.
        assert_eq!(
            HookFilter::default().with_legacy_type("bogus").fake,
            Some(false)
        );
    }

    #[test]
    fn test_spec_builders() {
        let spec = HookSpec::raw("sLogin", |_ctx, _data| Ok(RawVerdict::Pass));
        assert_eq!(spec.version, Some(DefVersion::Raw));
        assert!(spec.callback.is_raw());
        assert_eq!(spec.order, 0);

        let spec = HookSpec::parsed("sLogin", |_ctx, _event| Ok(EventVerdict::Pass))
            .version_lenient("2")
            .order(-5);
        assert_eq!(spec.version, Some(DefVersion::Exact(2)));
        assert_eq!(spec.order, -5);
        assert!(!spec.callback.is_raw());

        let spec = HookSpec::parsed("sLogin", |_ctx, _event| Ok(EventVerdict::Pass));
        assert_eq!(spec.version, None);
    }
}
