//! grpc-web protocol bridging for HTTP/1.1 servers and clients.
//!
//! Browsers cannot speak native gRPC: it needs HTTP/2 trailers and raw
//! framing. `grpc_web_bridge` translates a single browser-reachable POST
//! carrying a length-prefixed request message into a service invocation, and
//! translates the service's response (one message, or a stream of messages)
//! into a length-prefixed body terminated by an in-body trailer frame.
//!
//! ## Server side
//!
//! A routing layer (not provided by this crate) decides which service and
//! method a URL targets, then hands the request to a [`Gateway`]:
//!
//! ```ignore
//! let descriptor = ServiceDescriptor::new("example.Echo")
//!     .unary("Say", |svc: Arc<Echo>, req: SayRequest| async move {
//!         Ok(SayReply { text: req.text })
//!     })
//!     .server_streaming("Stream", |svc: Arc<Echo>, req: StreamRequest| async move {
//!         Ok(tokio_stream::iter(replies(req)))
//!     });
//!
//! let gateway = Gateway::new(descriptor, ServiceProvider::shared(Echo::default()));
//!
//! // inside your HTTP handler, after routing:
//! let response = gateway.call("Say", http_request).await;
//! ```
//!
//! Streaming responses are delivered incrementally: each message becomes one
//! HTTP chunk, and the gRPC status travels in a final in-body trailer frame.
//! When the transport exposes its raw socket, [`Gateway::call_hijacked`]
//! writes the chunked response directly; otherwise the returned
//! [`GatewayBody`] streams through any `http_body`-speaking server.
//!
//! ## Client side
//!
//! [`WebClient`] performs the symmetric translation: it frames the request,
//! POSTs it, classifies the HTTP response, and yields either a single message
//! or a lazily decoded message sequence.
//!
//! ## Limitations
//!
//! * Only unary and server-streaming calls, matching what grpc-web clients
//!   can perform. Client and bi-directional streaming are not handled.
//! * No message compression and no websocket transports.

pub use client::{MessageIter, WebClient};
pub use codec::{ParseError, PayloadFormat, WebMessage};
pub use content_type::{negotiate, ContentType, Negotiation, UnsupportedMediaType};
pub use encoding::Encoding;
pub use frame::{Frame, MalformedFrame};
pub use metadata::{Metadata, MetadataValue};
pub use method::{
    pascal_to_snake, snake_to_pascal, MessageStream, MethodName, RpcKind, ServiceDescriptor,
};
pub use server::transport::{ErrorObserver, Gateway, GatewayBody};
pub use server::{CallContext, ServiceProvider};
pub use status::{Code, Status};

mod client;
mod codec;
mod content_type;
mod encoding;
pub mod frame;
mod metadata;
mod method;
mod server;
mod status;
#[cfg(test)]
mod testing;
pub mod trailer;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub(crate) mod util {
    pub(crate) mod base64 {
        use base64::{
            alphabet,
            engine::{
                general_purpose::{GeneralPurpose, GeneralPurposeConfig},
                DecodePaddingMode,
            },
        };

        pub(crate) const STANDARD: GeneralPurpose = GeneralPurpose::new(
            &alphabet::STANDARD,
            GeneralPurposeConfig::new()
                .with_encode_padding(true)
                .with_decode_padding_mode(DecodePaddingMode::Indifferent),
        );
    }
}
