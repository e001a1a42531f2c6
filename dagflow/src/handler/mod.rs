//! The step handler invocation contract.
//!
//! The core never performs a step's actual work; it resolves the step's
//! opaque `handler_ref` against a [`HandlerRegistry`] and invokes the
//! [`StepHandler`] with the resolved input values. A handler either
//! succeeds with an output map or fails with a message; silently
//! swallowing an error and proceeding is not expressible through this
//! contract.

use crate::core::PortValue;
use crate::errors::HandlerFailure;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// A single handler invocation: the step identity and its resolved inputs.
#[derive(Debug, Clone)]
pub struct HandlerCall {
    /// The step being executed.
    pub step: String,
    /// The opaque handler reference from the step definition.
    pub handler_ref: String,
    /// Declared input name to resolved value.
    pub inputs: HashMap<String, PortValue>,
    /// Per-step timeout, forwarded opaquely; the core does not interpret it.
    pub timeout_ms: Option<u64>,
}

/// The map of produced outputs returned by a successful handler.
pub type HandlerOutputs = HashMap<String, PortValue>;

/// The external implementation performing a step's work.
///
/// Implementations should be idempotent-safe to retry; the core retries
/// only when a [`crate::exec::RetryPolicy`] is configured and the
/// failure is marked retryable.
#[async_trait]
pub trait StepHandler: Send + Sync + Debug {
    /// Invokes the handler with the resolved inputs.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerFailure`] carrying the step identity and the
    /// handler's message verbatim.
    async fn invoke(&self, call: HandlerCall) -> Result<HandlerOutputs, HandlerFailure>;
}

/// Maps handler references to implementations.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under a reference, replacing any previous one.
    pub fn register(&mut self, handler_ref: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler_ref.into(), handler);
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with_handler(
        mut self,
        handler_ref: impl Into<String>,
        handler: Arc<dyn StepHandler>,
    ) -> Self {
        self.register(handler_ref, handler);
        self
    }

    /// Resolves a handler by reference.
    #[must_use]
    pub fn resolve(&self, handler_ref: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(handler_ref).cloned()
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A handler that succeeds with no outputs, regardless of inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHandler;

#[async_trait]
impl StepHandler for NoOpHandler {
    async fn invoke(&self, _call: HandlerCall) -> Result<HandlerOutputs, HandlerFailure> {
        Ok(HandlerOutputs::new())
    }
}
