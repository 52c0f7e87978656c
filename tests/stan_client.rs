//! End-to-end wire scenarios against a scripted in-process server.
//!
//! Each test accepts one TCP connection, walks the exact frame
//! sequence the client is expected to produce, and answers with
//! hand-built server frames. Assertions live on both sides: the server
//! task returns what it observed, the client side checks the resulting
//! state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use prost::Message as _;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use natstream::proto::{
    ConnectRequest, ConnectResponse, MsgProto, PubAck, PubMsg, SubscriptionRequest,
    SubscriptionResponse,
};
use natstream::{Client, Config, Subscription, SubscriptionOptions};

/// Line-and-payload reader over the accepted socket.
struct WireServer {
    socket: TcpStream,
    buf: Vec<u8>,
}

impl WireServer {
    async fn accept(listener: TcpListener) -> Self {
        let (socket, _) = listener.accept().await.unwrap();
        Self {
            socket,
            buf: Vec::new(),
        }
    }

    async fn read_line(&mut self) -> String {
        loop {
            if let Some(at) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = String::from_utf8(self.buf[..at].to_vec()).unwrap();
                self.buf.drain(..at + 2);
                return line;
            }
            self.fill().await;
        }
    }

    /// Read a payload of known length plus its terminator.
    async fn read_payload(&mut self, length: usize) -> Vec<u8> {
        while self.buf.len() < length + 2 {
            self.fill().await;
        }
        let payload = self.buf[..length].to_vec();
        assert_eq!(&self.buf[length..length + 2], b"\r\n");
        self.buf.drain(..length + 2);
        payload
    }

    async fn fill(&mut self) {
        let mut chunk = [0u8; 4096];
        let n = self.socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed the connection mid-script");
        self.buf.extend_from_slice(&chunk[..n]);
    }

    async fn write(&mut self, bytes: &[u8]) {
        self.socket.write_all(bytes).await.unwrap();
    }

    /// Deliver a `MSG` frame to the client.
    async fn write_msg(&mut self, subject: &str, sid: &str, payload: &[u8]) {
        let header = format!("MSG {subject} {sid} {}\r\n", payload.len());
        let mut frame = header.into_bytes();
        frame.extend_from_slice(payload);
        frame.extend_from_slice(b"\r\n");
        self.write(&frame).await;
    }

    async fn write_msg_with_reply(&mut self, subject: &str, sid: &str, reply: &str, payload: &[u8]) {
        let header = format!("MSG {subject} {sid} {reply} {}\r\n", payload.len());
        let mut frame = header.into_bytes();
        frame.extend_from_slice(payload);
        frame.extend_from_slice(b"\r\n");
        self.write(&frame).await;
    }
}

fn parse_sub(line: &str) -> (String, String) {
    let fields: Vec<&str> = line.split_whitespace().collect();
    assert_eq!(fields[0], "SUB", "expected SUB, got: {line}");
    (fields[1].to_string(), fields[2].to_string())
}

/// `PUB <subject> [reply-to] <nbytes>` → (subject, reply, nbytes).
fn parse_pub(line: &str) -> (String, Option<String>, usize) {
    let fields: Vec<&str> = line.split_whitespace().collect();
    assert_eq!(fields[0], "PUB", "expected PUB, got: {line}");
    match fields.len() {
        3 => (fields[1].to_string(), None, fields[2].parse().unwrap()),
        4 => (
            fields[1].to_string(),
            Some(fields[2].to_string()),
            fields[3].parse().unwrap(),
        ),
        _ => panic!("malformed PUB: {line}"),
    }
}

fn test_config(address: &str) -> Config {
    Config {
        dsn: format!("nats://{address}"),
        client_id: "client-1".to_string(),
        cluster_id: "test-cluster".to_string(),
        connection_timeout: 5,
        write_timeout: 5,
        ..Default::default()
    }
}

fn connect_response() -> ConnectResponse {
    ConnectResponse {
        pub_prefix: "_STAN.pub".to_string(),
        sub_requests: "_STAN.sub".to_string(),
        unsub_requests: "_STAN.unsub".to_string(),
        close_requests: "_STAN.close".to_string(),
        sub_close_requests: "_STAN.subclose".to_string(),
        error: String::new(),
    }
}

/// Walk the raw NATS handshake and STAN discovery from the server
/// side. Returns the heartbeat inbox/sid pair.
async fn serve_handshake(server: &mut WireServer) -> (String, String) {
    server
        .write(b"INFO {\"server_id\":\"test\",\"max_payload\":1048576}\r\n")
        .await;

    let connect = server.read_line().await;
    assert!(connect.starts_with("CONNECT "), "first frame: {connect}");
    assert_eq!(server.read_line().await, "PING");
    server.write(b"PONG\r\n").await;

    let (heartbeat_inbox, heartbeat_sid) = parse_sub(&server.read_line().await);

    let (response_inbox, response_sid) = parse_sub(&server.read_line().await);
    assert_eq!(server.read_line().await, format!("UNSUB {response_sid} 1"));

    let (subject, reply, length) = parse_pub(&server.read_line().await);
    assert_eq!(subject, "_STAN.discover.test-cluster");
    assert_eq!(reply.as_deref(), Some(response_inbox.as_str()));
    let request = ConnectRequest::decode(server.read_payload(length).await.as_slice()).unwrap();
    assert_eq!(request.client_id, "client-1");
    assert_eq!(request.heartbeat_inbox, heartbeat_inbox);

    server
        .write_msg(
            &response_inbox,
            &response_sid,
            &connect_response().encode_to_vec(),
        )
        .await;

    (heartbeat_inbox, heartbeat_sid)
}

#[tokio::test]
async fn test_connect_handshake_reaches_ready() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let mut server = WireServer::accept(listener).await;
        serve_handshake(&mut server).await;
        server
    });

    let mut client = Client::new(test_config(&address));
    client.connect().await.unwrap();

    assert!(client.is_connected());
    let session = client.session().unwrap();
    assert_eq!(session.pub_prefix, "_STAN.pub");
    assert_eq!(session.sub_requests, "_STAN.sub");
    assert_eq!(session.close_requests, "_STAN.close");

    server.await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_is_answered_on_its_reply_inbox() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let mut server = WireServer::accept(listener).await;
        let (heartbeat_inbox, heartbeat_sid) = serve_handshake(&mut server).await;

        server
            .write_msg_with_reply(&heartbeat_inbox, &heartbeat_sid, "_INBOX.hb.reply", b"")
            .await;

        // The reply is an empty publish to the declared inbox.
        let (subject, reply, length) = parse_pub(&server.read_line().await);
        assert_eq!(subject, "_INBOX.hb.reply");
        assert_eq!(reply, None);
        assert_eq!(length, 0);
        server.read_payload(0).await;
    });

    let mut client = Client::new(test_config(&address));
    client.connect().await.unwrap();
    client.run(Some(1)).await.unwrap();

    server.await.unwrap();
}

#[tokio::test]
async fn test_subscribe_with_message_limit_unsubscribes_and_counts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let mut server = WireServer::accept(listener).await;
        serve_handshake(&mut server).await;

        let (delivery_inbox, sid) = parse_sub(&server.read_line().await);
        // The wire-level auto-unsubscribe for the message limit.
        assert_eq!(server.read_line().await, format!("UNSUB {sid} 1"));

        let (response_inbox, response_sid) = parse_sub(&server.read_line().await);
        assert_eq!(server.read_line().await, format!("UNSUB {response_sid} 1"));

        let (subject, _reply, length) = parse_pub(&server.read_line().await);
        assert_eq!(subject, "_STAN.sub");
        let request =
            SubscriptionRequest::decode(server.read_payload(length).await.as_slice()).unwrap();
        assert_eq!(request.subject, "orders.created");
        assert_eq!(request.inbox, delivery_inbox);
        assert_eq!(request.max_in_flight, 1024);

        let response = SubscriptionResponse {
            ack_inbox: "_STAN.acksub.1".to_string(),
            error: String::new(),
        };
        server
            .write_msg(&response_inbox, &response_sid, &response.encode_to_vec())
            .await;

        let delivery = MsgProto {
            sequence: 1,
            subject: "orders.created".to_string(),
            data: br#"{"id":"1"}"#.to_vec(),
            ..Default::default()
        };
        server
            .write_msg(&delivery_inbox, &sid, &delivery.encode_to_vec())
            .await;

        // Acknowledgment for the delivery.
        let (ack_subject, _, ack_length) = parse_pub(&server.read_line().await);
        assert_eq!(ack_subject, "_STAN.acksub.1");
        let ack =
            natstream::proto::Ack::decode(server.read_payload(ack_length).await.as_slice()).unwrap();
        assert_eq!(ack.subject, "orders.created");
        assert_eq!(ack.sequence, 1);

        // Limit reached: the STAN unsubscribe exchange, with no second
        // raw UNSUB for the delivery sid.
        let (_unsub_response_inbox, unsub_response_sid) = parse_sub(&server.read_line().await);
        assert_eq!(
            server.read_line().await,
            format!("UNSUB {unsub_response_sid} 1")
        );
        let (unsub_subject, _, unsub_length) = parse_pub(&server.read_line().await);
        assert_eq!(unsub_subject, "_STAN.unsub");
        server.read_payload(unsub_length).await;

        sid
    });

    let mut client = Client::new(test_config(&address));
    client.connect().await.unwrap();

    let deliveries = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&deliveries);
    let subscription = Subscription::new(
        "orders.created",
        SubscriptionOptions {
            message_limit: Some(1),
            ..Default::default()
        },
    );

    let sid = client
        .subscribe(
            subscription,
            Box::new(move |message| {
                assert_eq!(message.data, br#"{"id":"1"}"#);
                assert_eq!(message.sequence, 1);
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await
        .unwrap();

    assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    let subscription = client.subscription(&sid).unwrap();
    assert_eq!(subscription.received(), 1);
    assert_eq!(subscription.processed(), 1);
    assert_eq!(subscription.ack_inbox(), Some("_STAN.acksub.1"));

    assert_eq!(server.await.unwrap(), sid);
}

#[tokio::test]
async fn test_publish_frames_and_guid() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let mut server = WireServer::accept(listener).await;
        serve_handshake(&mut server).await;

        let (acks_inbox, acks_sid) = parse_sub(&server.read_line().await);
        assert!(acks_inbox.starts_with("_STAN.acks."), "got: {acks_inbox}");

        let (response_inbox, response_sid) = parse_sub(&server.read_line().await);
        assert_eq!(server.read_line().await, format!("UNSUB {response_sid} 1"));

        let (subject, reply, length) = parse_pub(&server.read_line().await);
        assert_eq!(subject, "_STAN.pub.orders.created");
        assert_eq!(reply.as_deref(), Some(response_inbox.as_str()));

        let message = PubMsg::decode(server.read_payload(length).await.as_slice()).unwrap();
        assert_eq!(message.client_id, "client-1");
        assert_eq!(message.subject, "orders.created");
        assert_eq!(message.data, br#"{"id":"1"}"#);

        let ack = PubAck {
            guid: message.guid.clone(),
            error: String::new(),
        };
        server
            .write_msg(&response_inbox, &response_sid, &ack.encode_to_vec())
            .await;

        // Cleanup of the out-of-band ack stream.
        assert_eq!(server.read_line().await, format!("UNSUB {acks_sid}"));

        message.guid
    });

    let mut client = Client::new(test_config(&address));
    client.connect().await.unwrap();

    let guid = client.publish("orders.created", br#"{"id":"1"}"#).await.unwrap();
    assert_eq!(guid.len(), 16);
    assert!(guid.chars().all(|c| c.is_ascii_hexdigit()));

    assert_eq!(server.await.unwrap(), guid);
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent_on_the_wire() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let mut server = WireServer::accept(listener).await;
        serve_handshake(&mut server).await;

        // Subscribe exchange, no message limit.
        let (_delivery_inbox, sid) = parse_sub(&server.read_line().await);
        let (response_inbox, response_sid) = parse_sub(&server.read_line().await);
        assert_eq!(server.read_line().await, format!("UNSUB {response_sid} 1"));
        let (_, _, length) = parse_pub(&server.read_line().await);
        server.read_payload(length).await;
        let response = SubscriptionResponse {
            ack_inbox: "_STAN.acksub.2".to_string(),
            error: String::new(),
        };
        server
            .write_msg(&response_inbox, &response_sid, &response.encode_to_vec())
            .await;

        // First unsubscribe: exactly one raw UNSUB for the sid.
        assert_eq!(server.read_line().await, format!("UNSUB {sid}"));
        let (_unsub_inbox, unsub_response_sid) = parse_sub(&server.read_line().await);
        assert_eq!(
            server.read_line().await,
            format!("UNSUB {unsub_response_sid} 1")
        );
        let (unsub_subject, unsub_reply, unsub_length) = parse_pub(&server.read_line().await);
        assert_eq!(unsub_subject, "_STAN.unsub");
        server.read_payload(unsub_length).await;
        server
            .write_msg(unsub_reply.as_deref().unwrap(), &unsub_response_sid, b"")
            .await;

        // The second unsubscribe call must produce nothing: the next
        // frame on the wire is the session close exchange.
        let (_close_inbox, close_response_sid) = parse_sub(&server.read_line().await);
        assert_eq!(
            server.read_line().await,
            format!("UNSUB {close_response_sid} 1")
        );
        let (close_subject, close_reply, close_length) = parse_pub(&server.read_line().await);
        assert_eq!(close_subject, "_STAN.close");
        server.read_payload(close_length).await;
        server
            .write_msg(close_reply.as_deref().unwrap(), &close_response_sid, b"")
            .await;
    });

    let mut client = Client::new(test_config(&address));
    client.connect().await.unwrap();

    let subscription = Subscription::new(
        "orders.created",
        SubscriptionOptions {
            timeout: 1,
            ..Default::default()
        },
    );
    let sid = client
        .subscribe(subscription, Box::new(|_message| Ok(())))
        .await
        .unwrap();

    client.unsubscribe(&sid).await.unwrap();
    // Second call is a guarded no-op.
    client.unsubscribe(&sid).await.unwrap();
    assert!(client.subscription(&sid).is_err());

    client.close().await.unwrap();
    assert!(!client.is_connected());

    server.await.unwrap();
}

#[tokio::test]
async fn test_server_error_ends_the_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let mut server = WireServer::accept(listener).await;
        serve_handshake(&mut server).await;
        server
            .write(b"-ERR 'Unknown Protocol Operation'\r\n")
            .await;
    });

    let mut client = Client::new(test_config(&address));
    client.connect().await.unwrap();

    let err = client.run(Some(2)).await.unwrap_err();
    assert!(matches!(err, natstream::Error::Nats(_)));
    assert!(!client.is_connected());

    server.await.unwrap();
}

#[tokio::test]
async fn test_connect_times_out_without_pong() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let mut server = WireServer::accept(listener).await;
        // Swallow CONNECT and PING, never answer.
        server.read_line().await;
        server.read_line().await;
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    });

    let mut config = test_config(&address);
    config.connection_timeout = 1;
    let mut client = Client::new(config);

    let err = client.connect().await.unwrap_err();
    assert!(err.is_connection_error());
    assert!(!client.is_connected());

    server.await.unwrap();
}
