//! STAN control payloads.
//!
//! Binary protobuf messages exchanged with the streaming server. Field
//! numbers are part of the wire contract and must not be changed; the
//! structures themselves are treated as opaque records by the rest of
//! the crate, built by small per-operation constructors in the
//! subscriber/publisher modules.

/// Delivery-replay policy for a new subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum StartPosition {
    /// Deliver only messages published after the subscription starts.
    NewOnly = 0,
    /// Redeliver from the last received message.
    LastReceived = 1,
    /// Deliver from a point in time, given as a delta from now.
    TimeDeltaStart = 2,
    /// Deliver starting at an explicit sequence number.
    SequenceStart = 3,
    /// Deliver from the first available message.
    First = 4,
}

/// First request of the STAN handshake, published to the cluster
/// discovery subject.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectRequest {
    #[prost(string, tag = "1")]
    pub client_id: String,
    #[prost(string, tag = "2")]
    pub heartbeat_inbox: String,
}

/// Server reply to [`ConnectRequest`]; carries the per-session subjects
/// every later control operation is addressed to.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectResponse {
    #[prost(string, tag = "1")]
    pub pub_prefix: String,
    #[prost(string, tag = "2")]
    pub sub_requests: String,
    #[prost(string, tag = "3")]
    pub unsub_requests: String,
    #[prost(string, tag = "4")]
    pub close_requests: String,
    #[prost(string, tag = "5")]
    pub error: String,
    #[prost(string, tag = "10")]
    pub sub_close_requests: String,
}

/// Subscription registration request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscriptionRequest {
    #[prost(string, tag = "1")]
    pub client_id: String,
    #[prost(string, tag = "2")]
    pub subject: String,
    #[prost(string, tag = "3")]
    pub q_group: String,
    #[prost(string, tag = "4")]
    pub inbox: String,
    #[prost(int32, tag = "5")]
    pub max_in_flight: i32,
    #[prost(int32, tag = "6")]
    pub ack_wait_in_secs: i32,
    #[prost(string, tag = "7")]
    pub durable_name: String,
    #[prost(enumeration = "StartPosition", tag = "10")]
    pub start_position: i32,
    #[prost(uint64, tag = "11")]
    pub start_sequence: u64,
    #[prost(int64, tag = "12")]
    pub start_time_delta: i64,
}

/// Server reply to [`SubscriptionRequest`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscriptionResponse {
    #[prost(string, tag = "2")]
    pub ack_inbox: String,
    #[prost(string, tag = "3")]
    pub error: String,
}

/// Removes a subscription, or closes it while preserving durable state.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnsubscribeRequest {
    #[prost(string, tag = "1")]
    pub client_id: String,
    #[prost(string, tag = "2")]
    pub subject: String,
    #[prost(string, tag = "3")]
    pub inbox: String,
    #[prost(string, tag = "4")]
    pub durable_name: String,
}

/// Closes the STAN session.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloseRequest {
    #[prost(string, tag = "1")]
    pub client_id: String,
}

/// Server reply to [`CloseRequest`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloseResponse {
    #[prost(string, tag = "1")]
    pub error: String,
}

/// Published application message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PubMsg {
    #[prost(string, tag = "1")]
    pub client_id: String,
    #[prost(string, tag = "2")]
    pub guid: String,
    #[prost(string, tag = "3")]
    pub subject: String,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}

/// Acknowledgment of a [`PubMsg`], correlated by guid.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PubAck {
    #[prost(string, tag = "1")]
    pub guid: String,
    #[prost(string, tag = "2")]
    pub error: String,
}

/// Delivered message envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgProto {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(string, tag = "2")]
    pub subject: String,
    #[prost(string, tag = "3")]
    pub reply: String,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
    #[prost(int64, tag = "5")]
    pub timestamp: i64,
    #[prost(bool, tag = "6")]
    pub redelivered: bool,
    #[prost(uint32, tag = "10")]
    pub crc32: u32,
}

/// Client acknowledgment of a delivered message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ack {
    #[prost(string, tag = "1")]
    pub subject: String,
    #[prost(uint64, tag = "2")]
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_connect_request_round_trip() {
        let request = ConnectRequest {
            client_id: "client-1".to_string(),
            heartbeat_inbox: "_INBOX.abc".to_string(),
        };

        let bytes = request.encode_to_vec();
        assert!(!bytes.is_empty());

        let decoded = ConnectRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_ack_known_encoding() {
        let ack = Ack {
            subject: "orders".to_string(),
            sequence: 7,
        };

        // field 1 (len-delimited) "orders", field 2 (varint) 7
        let expected = [0x0a, 0x06, b'o', b'r', b'd', b'e', b'r', b's', 0x10, 0x07];
        assert_eq!(ack.encode_to_vec(), expected);
    }

    #[test]
    fn test_subscription_request_defaults_encode_empty_optionals() {
        let request = SubscriptionRequest {
            client_id: "c".to_string(),
            subject: "s".to_string(),
            inbox: "i".to_string(),
            max_in_flight: 1024,
            ack_wait_in_secs: 30,
            start_position: StartPosition::NewOnly as i32,
            ..Default::default()
        };

        let decoded = SubscriptionRequest::decode(request.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.q_group, "");
        assert_eq!(decoded.durable_name, "");
        assert_eq!(decoded.start_sequence, 0);
        assert_eq!(decoded.start_position, StartPosition::NewOnly as i32);
    }

    #[test]
    fn test_msg_proto_binary_payload() {
        let msg = MsgProto {
            sequence: 42,
            subject: "orders.created".to_string(),
            data: vec![0x00, 0x0d, 0x0a, 0xff],
            ..Default::default()
        };

        let decoded = MsgProto::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.data, vec![0x00, 0x0d, 0x0a, 0xff]);
        assert!(!decoded.redelivered);
    }
}
