//! Leadership leases, replica roles, and change-feed cursors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single well-known key of the leadership row.
pub const LEADERSHIP_LOCK_ID: &str = "aggregator-leader";

/// What a replica currently is. A replica is exactly one of these at any
/// instant; transitions are broadcast so the round timer and the follower
/// synchronizer can swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaRole {
    Leader,
    Follower,
}

impl ReplicaRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaRole::Leader => "leader",
            ReplicaRole::Follower => "follower",
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, ReplicaRole::Leader)
    }
}

/// A timed leadership grant in the shared database. All timestamps come
/// from the database clock, never the replica clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadershipLease {
    pub lock_id: String,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Durable change-feed position of one replica. The position is the last
/// block number whose record list was fully applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeCursor {
    pub stream_id: String,
    pub position: u64,
    pub updated_at: DateTime<Utc>,
}

/// The stream identifier a replica resumes the block-records feed under.
pub fn feed_stream_id(server_id: &str) -> String {
    format!("blockRecords_{server_id}")
}
