//! Per-connection context and the interceptor pipeline that decorates it.
//!
//! The connection state machine builds a [`ConnectionContext`] when the
//! handshake completes and runs it through an [`InterceptorChain`]. The
//! result is handed, unchanged, to every `execute` call on that connection.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::protocol::Payload;

/// Data attached to one connection, opaque to the protocol core.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionContext {
    connection_id: String,
    init_payload: Option<Payload>,
    attributes: Map<String, Value>,
}

impl ConnectionContext {
    /// Empty context for a connection.
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            init_payload: None,
            attributes: Map::new(),
        }
    }

    /// Attach the `connection_init` payload.
    #[must_use]
    pub fn with_init_payload(mut self, payload: Option<Payload>) -> Self {
        self.init_payload = payload;
        self
    }

    /// Set an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.attributes.insert(key.into(), value);
        self
    }

    /// Owning connection.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Payload of the client's `connection_init`, if any.
    pub fn init_payload(&self) -> Option<&Payload> {
        self.init_payload.as_ref()
    }

    /// Look up an attribute.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// All attributes.
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Set an attribute, returning the previous value.
    pub fn insert_attribute(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.attributes.insert(key.into(), value)
    }
}

/// A pure transformation of the connection context.
pub trait ContextInterceptor: Send + Sync {
    /// Return the decorated context.
    fn intercept(&self, context: ConnectionContext) -> ConnectionContext;
}

impl<F> ContextInterceptor for F
where
    F: Fn(ConnectionContext) -> ConnectionContext + Send + Sync,
{
    fn intercept(&self, context: ConnectionContext) -> ConnectionContext {
        self(context)
    }
}

/// Ordered list of interceptors, applied first to last.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn ContextInterceptor>>,
}

impl InterceptorChain {
    /// Empty chain (identity).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor.
    #[must_use]
    pub fn with(mut self, interceptor: impl ContextInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Append a shared interceptor.
    pub fn push(&mut self, interceptor: Arc<dyn ContextInterceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Number of interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run the context through every interceptor in order.
    pub fn apply(&self, context: ConnectionContext) -> ConnectionContext {
        self.interceptors
            .iter()
            .fold(context, |ctx, interceptor| interceptor.intercept(ctx))
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

/// Copies every field of the `connection_init` payload into the attributes,
/// overwriting existing keys.
#[derive(Clone, Copy, Debug, Default)]
pub struct InitPayloadAttributes;

impl ContextInterceptor for InitPayloadAttributes {
    fn intercept(&self, mut context: ConnectionContext) -> ConnectionContext {
        if let Some(payload) = context.init_payload.clone() {
            for (key, value) in payload {
                let _ = context.attributes.insert(key, value);
            }
        }
        context
    }
}

/// Sets a fixed set of attributes on every connection.
#[derive(Clone, Debug, Default)]
pub struct StaticAttributes {
    attributes: Map<String, Value>,
}

impl StaticAttributes {
    /// No attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.attributes.insert(key.into(), value);
        self
    }
}

impl ContextInterceptor for StaticAttributes {
    fn intercept(&self, mut context: ConnectionContext) -> ConnectionContext {
        for (key, value) in &self.attributes {
            let _ = context.attributes.insert(key.clone(), value.clone());
        }
        context
    }
}
