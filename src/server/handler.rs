//! WebSocket connection handler
//!
//! Upgrades a single TCP connection and runs its read-reply loop until the
//! channel fails.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::ORIGIN, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::debug;

use super::protocol::{Message, ProtocolError, CANNED_COMPLETION};
use crate::config::OriginPolicy;

/// Path accepting the upgrade handshake
pub const WS_PATH: &str = "/ws";

/// Failure on an established channel
///
/// The variants only shape the log line. Every one of them ends the connection.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection closed by peer")]
    Closed,

    #[error("failed to read frame: {0}")]
    Read(#[source] tungstenite::Error),

    #[error("malformed message: {0}")]
    Codec(#[from] ProtocolError),

    #[error("failed to write message: {0}")]
    Write(#[source] tungstenite::Error),
}

/// Reason a connection ended
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to upgrade connection: {0}")]
    Upgrade(#[source] tungstenite::Error),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Handles WebSocket connections
///
/// Cheap to clone; every connection task gets its own copy. The only shared
/// piece is the immutable origin policy.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHandler {
    origin_policy: Arc<OriginPolicy>,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(origin_policy: OriginPolicy) -> Self {
        Self {
            origin_policy: Arc::new(origin_policy),
        }
    }

    /// Build the reply for a decoded message, if it gets one
    ///
    /// Completion requests always receive the canned completion regardless of
    /// their content. Every other type is ignored.
    pub fn respond(&self, message: &Message) -> Option<Message> {
        message
            .is_completion()
            .then(|| Message::completion(CANNED_COMPLETION))
    }

    /// Upgrade `stream` and serve it until the channel fails
    ///
    /// There is no clean exit: the loop only stops on an error, which is
    /// returned so the caller can log it. The socket is closed on every path.
    pub async fn handle(&self, stream: TcpStream, peer_addr: SocketAddr) -> ConnectionError {
        let ws_stream = match accept_hdr_async(stream, |request: &Request, response: Response| {
            self.check_handshake(request)?;
            Ok(response)
        })
        .await
        {
            Ok(ws_stream) => ws_stream,
            Err(e) => return ConnectionError::Upgrade(e),
        };
        debug!("Connection from {} upgraded", peer_addr);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let error = self
            .message_loop(&mut ws_sender, &mut ws_receiver, peer_addr)
            .await;

        // Best effort; the peer may already be gone
        let _ = ws_sender.close().await;
        debug!("Connection from {} closed", peer_addr);

        error.into()
    }

    /// Validate the upgrade request path and origin
    fn check_handshake(&self, request: &Request) -> Result<(), ErrorResponse> {
        if request.uri().path() != WS_PATH {
            return Err(reject(StatusCode::NOT_FOUND, "Not Found"));
        }

        // A header that is not valid UTF-8 can never match an allowed origin
        let origin = request
            .headers()
            .get(ORIGIN)
            .map(|value| value.to_str().unwrap_or_default());
        if !self.origin_policy.allows(origin) {
            return Err(reject(StatusCode::FORBIDDEN, "Origin not allowed"));
        }

        Ok(())
    }

    async fn message_loop<S, R>(
        &self,
        sender: &mut S,
        receiver: &mut R,
        peer_addr: SocketAddr,
    ) -> ChannelError
    where
        S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
        R: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
    {
        loop {
            if let Err(e) = self.exchange(sender, receiver, peer_addr).await {
                return e;
            }
        }
    }

    /// Read one message and send its reply, if any
    async fn exchange<S, R>(
        &self,
        sender: &mut S,
        receiver: &mut R,
        peer_addr: SocketAddr,
    ) -> Result<(), ChannelError>
    where
        S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
        R: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
    {
        let message = read_message(receiver).await?;

        match self.respond(&message) {
            Some(reply) => {
                let json = reply.to_json()?;
                sender
                    .send(WsMessage::Text(json))
                    .await
                    .map_err(ChannelError::Write)?;
            }
            None => {
                debug!(
                    "Ignoring message of type {:?} ({} bytes) from {}",
                    message.kind(),
                    message.content().len(),
                    peer_addr
                );
            }
        }

        Ok(())
    }
}

/// Wait for the next data frame and decode it
///
/// Control frames are skipped; tungstenite queues pong replies by itself.
async fn read_message<R>(receiver: &mut R) -> Result<Message, ChannelError>
where
    R: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    loop {
        match receiver.next().await {
            Some(Ok(WsMessage::Text(text))) => return Ok(Message::from_json(&text)?),
            Some(Ok(WsMessage::Binary(data))) => return Ok(Message::from_slice(&data)?),
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => continue,
            Some(Ok(WsMessage::Close(_))) | None => return Err(ChannelError::Closed),
            Some(Err(e)) => return Err(ChannelError::Read(e)),
        }
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{future, sink, stream};

    fn request(path: &str, origin: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(path);
        if let Some(origin) = origin {
            builder = builder.header(ORIGIN, origin);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_respond_to_completion() {
        let handler = ConnectionHandler::default();
        let long = "x".repeat(100_000);
        for content in ["hello", "", "日本語のテキスト", long.as_str()] {
            let reply = handler.respond(&Message::completion(content)).unwrap();
            assert_eq!(reply, Message::completion("xxx"));
        }
    }

    #[test]
    fn test_ignore_other_types() {
        let handler = ConnectionHandler::default();
        assert!(handler.respond(&Message::new("ping", "")).is_none());
        assert!(handler.respond(&Message::new("", "hello")).is_none());
        assert!(handler.respond(&Message::new("COMPLETION", "hello")).is_none());
    }

    #[test]
    fn test_handshake_path() {
        let handler = ConnectionHandler::default();
        assert!(handler.check_handshake(&request("/ws", None)).is_ok());
        assert!(handler.check_handshake(&request("/ws?client=editor", None)).is_ok());

        let rejected = handler.check_handshake(&request("/", None)).unwrap_err();
        assert_eq!(rejected.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_handshake_default_accepts_any_origin() {
        let handler = ConnectionHandler::default();
        assert_eq!(*handler.origin_policy, OriginPolicy::AllowAll);
        assert!(handler
            .check_handshake(&request("/ws", Some("http://anywhere.example")))
            .is_ok());
    }

    #[test]
    fn test_handshake_origin_allow_list() {
        let handler =
            ConnectionHandler::new(OriginPolicy::from_origins(["http://localhost:5173"]));

        assert!(handler
            .check_handshake(&request("/ws", Some("http://localhost:5173")))
            .is_ok());
        assert!(handler.check_handshake(&request("/ws", None)).is_ok());

        let rejected = handler
            .check_handshake(&request("/ws", Some("http://evil.example")))
            .unwrap_err();
        assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_read_message_skips_control_frames() {
        let mut frames = stream::iter(vec![
            Ok(WsMessage::Ping(vec![1])),
            Ok(WsMessage::Pong(vec![])),
            Ok(WsMessage::Text(r#"{"type":"completion","content":"a"}"#.to_string())),
        ]);
        let message = read_message(&mut frames).await.unwrap();
        assert_eq!(message, Message::completion("a"));
    }

    #[tokio::test]
    async fn test_read_message_errors() {
        let mut closed = stream::iter(vec![Ok(WsMessage::Close(None))]);
        assert!(matches!(
            read_message(&mut closed).await,
            Err(ChannelError::Closed)
        ));

        let mut ended = stream::iter(Vec::<Result<WsMessage, tungstenite::Error>>::new());
        assert!(matches!(
            read_message(&mut ended).await,
            Err(ChannelError::Closed)
        ));

        let mut malformed = stream::iter(vec![Ok(WsMessage::Text("{oops".to_string()))]);
        assert!(matches!(
            read_message(&mut malformed).await,
            Err(ChannelError::Codec(_))
        ));

        let mut broken = stream::iter(vec![Err(tungstenite::Error::ConnectionClosed)]);
        assert!(matches!(
            read_message(&mut broken).await,
            Err(ChannelError::Read(_))
        ));
    }

    #[tokio::test]
    async fn test_message_loop_replies_until_failure() {
        let handler = ConnectionHandler::default();
        let peer_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let mut frames = stream::iter(vec![
            Ok(WsMessage::Text(r#"{"type":"completion","content":"hello"}"#.to_string())),
            Ok(WsMessage::Text(r#"{"type":"ping","content":""}"#.to_string())),
            Ok(WsMessage::Binary(br#"{"type":"completion"}"#.to_vec())),
            Ok(WsMessage::Text("garbage".to_string())),
            Ok(WsMessage::Text(r#"{"type":"completion","content":"late"}"#.to_string())),
        ]);
        let mut sent: Vec<WsMessage> = Vec::new();
        let mut sink = sink::unfold((), |(), frame: WsMessage| {
            sent.push(frame);
            future::ready(Ok::<_, tungstenite::Error>(()))
        });

        let error = handler
            .message_loop(&mut sink, &mut frames, peer_addr)
            .await;
        drop(sink);

        assert!(matches!(error, ChannelError::Codec(_)));
        let expected = WsMessage::Text(r#"{"type":"completion","content":"xxx"}"#.to_string());
        assert_eq!(sent, vec![expected.clone(), expected]);
    }
}
