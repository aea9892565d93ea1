//! The server-side request pipeline: records shared by the unary and
//! streaming processors, and the transport adapter that drives them.

pub(crate) mod streaming;
pub mod transport;
pub(crate) mod unary;

use std::sync::Arc;

use bytes::Bytes;

use crate::content_type::Negotiation;
use crate::metadata::Metadata;
use crate::method::MethodName;

/// Read-only per-call state handed to handlers that declare a second
/// argument.
#[derive(Clone, Debug)]
pub struct CallContext {
    metadata: Metadata,
    method: MethodName,
}

impl CallContext {
    pub(crate) fn new(metadata: Metadata, method: MethodName) -> CallContext {
        CallContext { metadata, method }
    }

    /// Inbound request metadata, normalized and with `*_bin` values decoded.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The method being invoked, under both of its names.
    pub fn method(&self) -> &MethodName {
        &self.method
    }
}

/// How the pipeline obtains a service instance for each call.
///
/// `PerCall` constructs a fresh instance per invocation so handlers never
/// share mutable state; `Shared` hands every call the same instance and
/// leaves thread safety to the service.
pub enum ServiceProvider<S> {
    Shared(Arc<S>),
    PerCall(Box<dyn Fn() -> S + Send + Sync>),
}

impl<S> ServiceProvider<S> {
    pub fn shared(service: S) -> ServiceProvider<S> {
        ServiceProvider::Shared(Arc::new(service))
    }

    pub fn per_call(construct: impl Fn() -> S + Send + Sync + 'static) -> ServiceProvider<S> {
        ServiceProvider::PerCall(Box::new(construct))
    }

    pub(crate) fn instance(&self) -> Arc<S> {
        match self {
            ServiceProvider::Shared(service) => Arc::clone(service),
            ServiceProvider::PerCall(construct) => Arc::new(construct()),
        }
    }
}

impl<S> std::fmt::Debug for ServiceProvider<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceProvider::Shared(_) => f.write_str("ServiceProvider::Shared"),
            ServiceProvider::PerCall(_) => f.write_str("ServiceProvider::PerCall"),
        }
    }
}

/// One validated inbound RPC, scoped to a single request.
///
/// The body has had the text transform undone but is not yet deframed.
#[derive(Debug)]
pub(crate) struct RpcRequest {
    pub(crate) method: MethodName,
    pub(crate) negotiation: Negotiation,
    pub(crate) body: Bytes,
    pub(crate) metadata: Metadata,
}

impl RpcRequest {
    pub(crate) fn call_context(&self) -> CallContext {
        CallContext::new(self.metadata.clone(), self.method.clone())
    }
}

/// Deframe a request body and extract its unique payload frame.
pub(crate) fn single_payload(body: Bytes) -> Result<Bytes, crate::codec::ParseError> {
    use crate::codec::ParseError;

    let frames = crate::frame::decode_all(body)?;
    let mut payloads = frames.into_iter().filter(|f| !f.is_trailer());

    match (payloads.next(), payloads.next()) {
        (Some(frame), None) => Ok(frame.into_body()),
        (None, _) => Err(ParseError::new("request contains no payload frame")),
        (Some(_), Some(_)) => Err(ParseError::new(
            "request contains more than one payload frame",
        )),
    }
}
