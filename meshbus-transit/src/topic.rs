//! Topic naming and the fixed core subscription set.
//!
//! Topics are `MBUS.<COMMAND>` for broadcast delivery or
//! `MBUS.<COMMAND>.<nodeID>` for a single node. The transit layer
//! binds a closed set of topics once, at startup; there is no wildcard
//! matching.

use crate::packet::PacketType;
use std::fmt;

/// Prefix shared by every transit topic.
pub const TOPIC_PREFIX: &str = "MBUS";

/// A transporter-level channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    /// Command carried on the topic
    pub kind: PacketType,
    /// Receiving node, `None` for broadcast
    pub node: Option<String>,
}

impl Topic {
    pub fn new(kind: PacketType, node: Option<String>) -> Self {
        Self { kind, node }
    }

    /// Broadcast topic for a command.
    pub fn broadcast(kind: PacketType) -> Self {
        Self { kind, node: None }
    }

    /// Topic scoped to a single node.
    pub fn targeted(kind: PacketType, node: impl Into<String>) -> Self {
        Self {
            kind,
            node: Some(node.into()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{TOPIC_PREFIX}.{}.{node}", self.kind),
            None => write!(f, "{TOPIC_PREFIX}.{}", self.kind),
        }
    }
}

/// The topic set every node binds at startup, in declaration order.
///
/// EVENT, REQUEST, RESPONSE and PONG only ever arrive addressed to us;
/// DISCOVER, INFO and PING come both broadcast and targeted;
/// DISCONNECT and HEARTBEAT are broadcast only.
pub fn core_subscriptions(node_id: &str) -> Vec<Topic> {
    vec![
        Topic::targeted(PacketType::Event, node_id),
        Topic::targeted(PacketType::Request, node_id),
        Topic::targeted(PacketType::Response, node_id),
        Topic::broadcast(PacketType::Discover),
        Topic::targeted(PacketType::Discover, node_id),
        Topic::broadcast(PacketType::Info),
        Topic::targeted(PacketType::Info, node_id),
        Topic::broadcast(PacketType::Disconnect),
        Topic::broadcast(PacketType::Heartbeat),
        Topic::broadcast(PacketType::Ping),
        Topic::targeted(PacketType::Ping, node_id),
        Topic::targeted(PacketType::Pong, node_id),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_broadcast_and_targeted_names() {
        assert_eq!(
            Topic::broadcast(PacketType::Heartbeat).to_string(),
            "MBUS.HEARTBEAT"
        );
        assert_eq!(
            Topic::targeted(PacketType::Request, "node-1").to_string(),
            "MBUS.REQUEST.node-1"
        );
    }

    #[test]
    fn core_set_has_twelve_topics() {
        let topics = core_subscriptions("node-1");
        assert_eq!(topics.len(), 12);

        let names: Vec<String> = topics.iter().map(ToString::to_string).collect();
        assert_eq!(names[0], "MBUS.EVENT.node-1");
        assert!(names.contains(&"MBUS.DISCOVER".to_owned()));
        assert!(names.contains(&"MBUS.DISCOVER.node-1".to_owned()));
        assert!(names.contains(&"MBUS.PONG.node-1".to_owned()));
        // broadcast-only commands
        assert!(!names.contains(&"MBUS.DISCONNECT.node-1".to_owned()));
        assert!(!names.contains(&"MBUS.HEARTBEAT.node-1".to_owned()));
    }

    #[test]
    fn response_topic_is_scoped_to_self() {
        let topics = core_subscriptions("alpha");
        let responses: Vec<&Topic> = topics
            .iter()
            .filter(|t| t.kind == PacketType::Response)
            .collect();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].node.as_deref(), Some("alpha"));
    }
}
