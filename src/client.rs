//! The client executor: the symmetric path from an invocation to a POST and
//! back through deframing to messages.

use std::marker::PhantomData;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, Request, Uri};
use tracing::trace;

use crate::codec::{decode_message, encode_message, PayloadFormat, WebMessage};
use crate::content_type::GRPC_WEB_PROTO;
use crate::encoding::Encoding;
use crate::frame::{self, Frame};
use crate::metadata::Metadata;
use crate::status::{Code, Status};
use crate::trailer;

/// A grpc-web client for one endpoint.
///
/// Requests go out as `application/grpc-web+proto`; responses are buffered,
/// deframed, and checked against the in-body trailer before any message is
/// handed back.
#[derive(Debug, Clone)]
pub struct WebClient {
    http: hyper::Client<hyper::client::HttpConnector>,
    origin: Uri,
}

impl WebClient {
    /// A client for the given origin, e.g. `http://127.0.0.1:8080`.
    pub fn new(origin: Uri) -> WebClient {
        WebClient {
            http: hyper::Client::new(),
            origin,
        }
    }

    /// Perform a unary call and return the single response message.
    pub async fn unary<Req, Resp>(
        &self,
        path: &str,
        request: &Req,
        metadata: &Metadata,
    ) -> Result<Resp, Status>
    where
        Req: WebMessage,
        Resp: WebMessage,
    {
        let mut payloads = self.execute(path, request, metadata).await?.into_iter();

        match (payloads.next(), payloads.next()) {
            (Some(bytes), None) => decode_message(&bytes, PayloadFormat::Proto)
                .map_err(|err| Status::internal(err.to_string())),
            (None, _) => Err(Status::internal("response contains no message")),
            (Some(_), Some(_)) => Err(Status::internal(
                "unary response contains more than one message",
            )),
        }
    }

    /// Perform a server-streaming call.
    ///
    /// The response is buffered, so a trailer-reported failure surfaces here
    /// rather than mid-iteration; the returned sequence decodes each message
    /// lazily, in frame order.
    pub async fn server_streaming<Req, Resp>(
        &self,
        path: &str,
        request: &Req,
        metadata: &Metadata,
    ) -> Result<MessageIter<Resp>, Status>
    where
        Req: WebMessage,
        Resp: WebMessage,
    {
        let payloads = self.execute(path, request, metadata).await?;

        Ok(MessageIter {
            frames: payloads.into_iter(),
            _marker: PhantomData,
        })
    }

    /// POST one framed message and return the response payload frames, after
    /// the trailer has been inspected.
    async fn execute<Req: WebMessage>(
        &self,
        path: &str,
        request: &Req,
        metadata: &Metadata,
    ) -> Result<Vec<Bytes>, Status> {
        let message = encode_message(request, PayloadFormat::Proto)?;
        let body = Frame::payload(message).encode();

        let uri = self.request_uri(path)?;
        trace!(%uri, "grpc-web call");

        let mut req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, GRPC_WEB_PROTO)
            .header(ACCEPT, GRPC_WEB_PROTO)
            .header(trailer::GRPC_WEB_MARKER, "1")
            .body(hyper::Body::from(body))
            .map_err(|err| Status::internal(format!("failed building request: {}", err)))?;
        metadata.append_to_headers(req.headers_mut());

        let response = self
            .http
            .request(req)
            .await
            .map_err(|err| Status::unavailable(format!("transport failure: {}", err)))?;

        let http_status = response.status();
        if !http_status.is_success() {
            return Err(Status::from_http(http_status));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_owned();

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|err| Status::unavailable(format!("transport failure: {}", err)))?;

        let body = Encoding::for_content_type(&content_type)
            .decode(body)
            .map_err(|err| Status::internal(err.to_string()))?;

        let mut payloads = Vec::new();
        let mut trailer_status = None;

        for frame in frame::decode_all(body).map_err(|err| Status::internal(err.to_string()))? {
            if frame.is_trailer() {
                trailer_status = Some(trailer::parse(frame.body()));
            } else {
                payloads.push(frame.into_body());
            }
        }

        let status =
            trailer_status.ok_or_else(|| Status::internal("response contains no trailer frame"))?;

        if status.code() != Code::Ok {
            let metadata = trailer::decode_bin_values(status.metadata());
            return Err(Status::new(status.code(), status.message()).with_metadata(metadata));
        }

        Ok(payloads)
    }

    fn request_uri(&self, path: &str) -> Result<Uri, Status> {
        let scheme = self
            .origin
            .scheme()
            .cloned()
            .ok_or_else(|| Status::invalid_argument("endpoint origin has no scheme"))?;
        let authority = self
            .origin
            .authority()
            .cloned()
            .ok_or_else(|| Status::invalid_argument("endpoint origin has no authority"))?;

        Uri::builder()
            .scheme(scheme)
            .authority(authority)
            .path_and_query(path)
            .build()
            .map_err(|err| Status::invalid_argument(format!("invalid rpc path: {}", err)))
    }
}

/// Lazily decoded response messages of a server-streaming call.
pub struct MessageIter<T> {
    frames: std::vec::IntoIter<Bytes>,
    _marker: PhantomData<T>,
}

impl<T: WebMessage> Iterator for MessageIter<T> {
    type Item = Result<T, Status>;

    fn next(&mut self) -> Option<Self::Item> {
        self.frames.next().map(|bytes| {
            decode_message(&bytes, PayloadFormat::Proto)
                .map_err(|err| Status::internal(err.to_string()))
        })
    }
}

impl<T> std::fmt::Debug for MessageIter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageIter")
            .field("remaining", &self.frames.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_iter_decodes_lazily() {
        use crate::testing::Ping;
        use prost::Message as _;

        let good = Ping {
            seq: 7,
            note: "x".to_owned(),
        };
        // An empty buffer decodes to the default message; a truncated field
        // (0x08 opens a varint and then the buffer ends) does not.
        let mut iter: MessageIter<Ping> = MessageIter {
            frames: vec![
                Bytes::new(),
                Bytes::from_static(b"\x08"),
                Bytes::from(good.encode_to_vec()),
            ]
            .into_iter(),
            _marker: PhantomData,
        };

        assert_eq!(iter.next().unwrap().unwrap(), Ping::default());
        let err = iter.next().unwrap().unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        // A bad element does not end the sequence.
        assert_eq!(iter.next().unwrap().unwrap(), good);
        assert!(iter.next().is_none());
    }

    #[test]
    fn request_uri_joins_origin_and_path() {
        let client = WebClient::new("http://127.0.0.1:9000".parse().unwrap());
        let uri = client.request_uri("/test.Test/Say").unwrap();

        assert_eq!(uri.to_string(), "http://127.0.0.1:9000/test.Test/Say");
    }

    #[test]
    fn request_uri_requires_full_origin() {
        let client = WebClient::new("/just-a-path".parse().unwrap());
        let err = client.request_uri("/test.Test/Say").unwrap_err();

        assert_eq!(err.code(), Code::InvalidArgument);
    }
}
