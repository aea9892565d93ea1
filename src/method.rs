//! Method descriptors: the per-service table that pairs a protocol-facing
//! method name with its typed invocation glue, plus the name resolver that
//! bridges PascalCase descriptor keys and snake_case handler keys.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;

use crate::codec::{decode_message, encode_message, ParseError, PayloadFormat, WebMessage};
use crate::server::CallContext;
use crate::status::Status;

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A lazy, single-consumer sequence of serialized response messages.
pub type MessageStream = Pin<Box<dyn futures_core::Stream<Item = Result<Bytes, Status>> + Send>>;

/// Whether a method produces one response message or a stream of them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RpcKind {
    Unary,
    ServerStreaming,
}

/// The two names of one method.
///
/// The descriptor key is the name as it appears in URL paths (PascalCase by
/// convention) and is preserved verbatim from the request; the handler key is
/// its snake_case transform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodName {
    descriptor: String,
    handler: String,
}

impl MethodName {
    /// Resolve a raw URL path segment into both naming conventions.
    pub fn resolve(raw: &str) -> MethodName {
        MethodName {
            descriptor: raw.to_owned(),
            handler: pascal_to_snake(raw),
        }
    }

    /// The original PascalCase descriptor-lookup key.
    pub fn descriptor_key(&self) -> &str {
        &self.descriptor
    }

    /// The snake_case handler key.
    pub fn handler_key(&self) -> &str {
        &self.handler
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor)
    }
}

/// snake_case → PascalCase: split on `_`, capitalize each word, concatenate.
pub fn snake_to_pascal(name: &str) -> String {
    name.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// PascalCase → snake_case: insert `_` before each uppercase letter except at
/// position 0, then lowercase.
///
/// Consecutive uppercase letters do not round-trip: `XMLDump` becomes
/// `x_m_l_dump`, which converts back to `XMLDump` only letter by letter.
pub fn pascal_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len());

    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}

pub(crate) type UnaryReply = Result<Bytes, Status>;

type UnaryFn<S> = Box<
    dyn Fn(Arc<S>, Bytes, PayloadFormat, PayloadFormat, CallContext) -> BoxFuture<Result<UnaryReply, ParseError>>
        + Send
        + Sync,
>;

type StreamingFn<S> = Box<
    dyn Fn(
            Arc<S>,
            Bytes,
            PayloadFormat,
            PayloadFormat,
            CallContext,
        ) -> BoxFuture<Result<Result<MessageStream, Status>, ParseError>>
        + Send
        + Sync,
>;

pub(crate) enum MethodHandler<S> {
    Unary(UnaryFn<S>),
    ServerStreaming(StreamingFn<S>),
}

struct MethodEntry<S> {
    name: &'static str,
    handler: MethodHandler<S>,
}

/// The descriptor table of one service: every method the protocol can reach,
/// registered under its PascalCase name with typed decode/invoke/encode glue.
///
/// A handler declares one argument (the request message) or two (request plus
/// [`CallContext`]); the arity is fixed by which registrar is used, once, at
/// registration.
pub struct ServiceDescriptor<S> {
    name: &'static str,
    methods: Vec<MethodEntry<S>>,
}

impl<S: Send + Sync + 'static> ServiceDescriptor<S> {
    pub fn new(name: &'static str) -> ServiceDescriptor<S> {
        ServiceDescriptor {
            name,
            methods: Vec::new(),
        }
    }

    /// The full service name, e.g. `example.Echo`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a unary method whose handler takes the request message only.
    pub fn unary<Req, Resp, F, Fut>(self, name: &'static str, handler: F) -> Self
    where
        Req: WebMessage,
        Resp: WebMessage,
        F: Fn(Arc<S>, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        self.unary_with_call(name, move |service, request, _call| handler(service, request))
    }

    /// Register a unary method whose handler also receives the call context.
    pub fn unary_with_call<Req, Resp, F, Fut>(mut self, name: &'static str, handler: F) -> Self
    where
        Req: WebMessage,
        Resp: WebMessage,
        F: Fn(Arc<S>, Req, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let erased: UnaryFn<S> = Box::new(move |service, payload, req_format, resp_format, call| {
            match decode_message::<Req>(&payload, req_format) {
                Ok(request) => {
                    let fut = handler(service, request, call);
                    Box::pin(async move {
                        Ok(match fut.await {
                            Ok(response) => encode_message(&response, resp_format),
                            Err(status) => Err(status),
                        })
                    })
                }
                Err(err) => Box::pin(std::future::ready(Err(err))),
            }
        });

        self.methods.push(MethodEntry {
            name,
            handler: MethodHandler::Unary(erased),
        });
        self
    }

    /// Register a server-streaming method whose handler takes the request
    /// message only.
    pub fn server_streaming<Req, Resp, F, Fut, St>(self, name: &'static str, handler: F) -> Self
    where
        Req: WebMessage,
        Resp: WebMessage,
        F: Fn(Arc<S>, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<St, Status>> + Send + 'static,
        St: futures_core::Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        self.server_streaming_with_call(name, move |service, request, _call| {
            handler(service, request)
        })
    }

    /// Register a server-streaming method whose handler also receives the
    /// call context.
    pub fn server_streaming_with_call<Req, Resp, F, Fut, St>(
        mut self,
        name: &'static str,
        handler: F,
    ) -> Self
    where
        Req: WebMessage,
        Resp: WebMessage,
        F: Fn(Arc<S>, Req, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<St, Status>> + Send + 'static,
        St: futures_core::Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        let erased: StreamingFn<S> =
            Box::new(move |service, payload, req_format, resp_format, call| {
                match decode_message::<Req>(&payload, req_format) {
                    Ok(request) => {
                        let fut = handler(service, request, call);
                        Box::pin(async move {
                            Ok(match fut.await {
                                Ok(stream) => {
                                    let serialized = stream.map(move |item| {
                                        item.and_then(|message| {
                                            encode_message(&message, resp_format)
                                        })
                                    });
                                    Ok(Box::pin(serialized) as MessageStream)
                                }
                                Err(status) => Err(status),
                            })
                        })
                    }
                    Err(err) => Box::pin(std::future::ready(Err(err))),
                }
            });

        self.methods.push(MethodEntry {
            name,
            handler: MethodHandler::ServerStreaming(erased),
        });
        self
    }

    /// Look up a method, tolerating naming-convention drift: the key is tried
    /// verbatim, then PascalCase→snake_case, then snake_case→PascalCase.
    ///
    /// The drift tolerance is a compatibility wart, not a feature: this crate
    /// fixes PascalCase as the registration convention, and the extra forms
    /// only cover services registered against the other convention.
    pub(crate) fn find(&self, method: &str) -> Option<&MethodHandler<S>> {
        let entry = self
            .methods
            .iter()
            .find(|m| m.name == method)
            .or_else(|| {
                let snake = pascal_to_snake(method);
                self.methods.iter().find(|m| m.name == snake)
            })
            .or_else(|| {
                let pascal = snake_to_pascal(method);
                self.methods.iter().find(|m| m.name == pascal)
            });

        entry.map(|m| &m.handler)
    }

    /// Decide whether a method is unary or server-streaming from its
    /// descriptor entry.
    ///
    /// A method with no matching descriptor is treated as unary, for
    /// compatibility with services whose descriptor metadata is absent; the
    /// unary processor then reports the missing handler in-band.
    pub fn kind_of(&self, method: &str) -> RpcKind {
        match self.find(method) {
            Some(MethodHandler::ServerStreaming(_)) => RpcKind::ServerStreaming,
            Some(MethodHandler::Unary(_)) | None => RpcKind::Unary,
        }
    }
}

impl<S> fmt::Debug for ServiceDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("methods", &self.methods.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_to_pascal_words() {
        assert_eq!(snake_to_pascal("say_hello"), "SayHello");
        assert_eq!(snake_to_pascal("a"), "A");
        assert_eq!(snake_to_pascal("already"), "Already");
    }

    #[test]
    fn pascal_to_snake_words() {
        assert_eq!(pascal_to_snake("SayHello"), "say_hello");
        assert_eq!(pascal_to_snake("A"), "a");
        assert_eq!(pascal_to_snake("lower"), "lower");
    }

    #[test]
    fn snake_pascal_idempotence() {
        for s in ["say_hello", "get", "list_all_things"] {
            assert_eq!(pascal_to_snake(&snake_to_pascal(s)), s);
        }

        // Holds for PascalCase without consecutive uppercase letters.
        for p in ["SayHello", "Get", "ListAllThings"] {
            assert_eq!(snake_to_pascal(&pascal_to_snake(p)), p);
        }
    }

    #[test]
    fn consecutive_uppercase_does_not_round_trip() {
        assert_eq!(pascal_to_snake("XMLDump"), "x_m_l_dump");
        assert_eq!(snake_to_pascal("x_m_l_dump"), "XMLDump");
    }

    #[test]
    fn method_name_keeps_original_key() {
        let name = MethodName::resolve("SayHello");
        assert_eq!(name.descriptor_key(), "SayHello");
        assert_eq!(name.handler_key(), "say_hello");

        let already_snake = MethodName::resolve("say_hello");
        assert_eq!(already_snake.descriptor_key(), "say_hello");
        assert_eq!(already_snake.handler_key(), "say_hello");
    }

    #[test]
    fn kind_detection_with_drift() {
        use crate::testing::Ping;

        let descriptor: ServiceDescriptor<()> = ServiceDescriptor::new("test.Test")
            .unary("SayHello", |_svc, req: Ping| async move { Ok(req) })
            .server_streaming("watch_events", |_svc, _req: Ping| async move {
                Ok(futures_util::stream::empty::<Result<Ping, Status>>())
            });

        // Verbatim, pascal→snake, snake→pascal.
        assert_eq!(descriptor.kind_of("SayHello"), RpcKind::Unary);
        assert_eq!(descriptor.kind_of("say_hello"), RpcKind::Unary);
        assert_eq!(descriptor.kind_of("watch_events"), RpcKind::ServerStreaming);
        assert_eq!(descriptor.kind_of("WatchEvents"), RpcKind::ServerStreaming);

        // Unknown methods fall back to unary.
        assert_eq!(descriptor.kind_of("Nope"), RpcKind::Unary);
    }
}
