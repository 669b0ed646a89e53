//! Dispatch registry - routes admitted signals to subscribed handlers.
//!
//! Handlers are kept in a table indexed directly by signal code, in
//! registration order. A failing handler (an `Err` return or a panic) is
//! logged and skipped; the remaining handlers for the same signal still run
//! and the receive loop never sees the failure.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{trace, warn};

use crate::signal::{Signal, SignalCode};

/// Error returned by a handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by a handler.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Handler function for inbound signals, given the datagram's origin.
pub type Handler = Arc<dyn Fn(&Signal, SocketAddr) -> HandlerResult + Send + Sync>;

/// What happened to a routed signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Type-specific handlers ran; `failed` of them raised.
    Handled { invoked: usize, failed: usize },
    /// No type-specific handlers; the default handler ran.
    Defaulted { failed: bool },
    /// No handler at all; the signal was dropped.
    Dropped,
}

struct Table {
    by_code: [Vec<Handler>; 256],
    default: Option<Handler>,
}

/// Per-type handler table plus a single fallback handler.
pub struct DispatchRegistry {
    table: RwLock<Table>,
}

impl DispatchRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table {
                by_code: std::array::from_fn(|_| Vec::new()),
                default: None,
            }),
        }
    }

    /// Append a handler for a signal type.
    pub fn register<F>(&self, code: impl Into<SignalCode>, handler: F)
    where
        F: Fn(&Signal, SocketAddr) -> HandlerResult + Send + Sync + 'static,
    {
        let code = code.into();
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.by_code[code as usize].push(Arc::new(handler));
    }

    /// Set the handler used for types with no registered handlers.
    pub fn set_default<F>(&self, handler: F)
    where
        F: Fn(&Signal, SocketAddr) -> HandlerResult + Send + Sync + 'static,
    {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.default = Some(Arc::new(handler));
    }

    /// Remove all handlers for a type. Returns how many were removed.
    pub fn unregister(&self, code: impl Into<SignalCode>) -> usize {
        let code = code.into();
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut table.by_code[code as usize]).len()
    }

    /// Remove every handler, including the default.
    pub fn clear(&self) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        for handlers in table.by_code.iter_mut() {
            handlers.clear();
        }
        table.default = None;
    }

    /// Number of handlers registered for a type.
    pub fn handler_count(&self, code: impl Into<SignalCode>) -> usize {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.by_code[code.into() as usize].len()
    }

    /// Whether a default handler is set.
    pub fn has_default(&self) -> bool {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.default.is_some()
    }

    /// Route a signal to its handlers, or to the default handler.
    pub fn route(&self, signal: &Signal, origin: SocketAddr) -> RouteOutcome {
        // Snapshot under the lock, invoke outside it so handlers may
        // subscribe or unsubscribe without deadlocking.
        let (handlers, default) = {
            let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
            let handlers = table.by_code[signal.code as usize].clone();
            let default = if handlers.is_empty() {
                table.default.clone()
            } else {
                None
            };
            (handlers, default)
        };

        if !handlers.is_empty() {
            let invoked = handlers.len();
            let failed = handlers
                .iter()
                .filter(|handler| !invoke(handler, signal, origin))
                .count();
            return RouteOutcome::Handled { invoked, failed };
        }

        match default {
            Some(handler) => RouteOutcome::Defaulted {
                failed: !invoke(&handler, signal, origin),
            },
            None => {
                trace!("No handler for {} from {}, dropping", signal.name(), origin);
                RouteOutcome::Dropped
            }
        }
    }
}

impl Default for DispatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one handler in isolation. Returns false if it failed.
fn invoke(handler: &Handler, signal: &Signal, origin: SocketAddr) -> bool {
    match catch_unwind(AssertUnwindSafe(|| handler(signal, origin))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("Handler for {} from {} failed: {}", signal.name(), signal.sender, e);
            false
        }
        Err(panic) => {
            warn!(
                "Handler for {} from {} panicked: {}",
                signal.name(),
                signal.sender,
                panic_message(panic.as_ref())
            );
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
