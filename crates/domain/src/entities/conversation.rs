//! 私信会话：按规范顺序保存的一对用户

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    /// 较小的用户ID
    pub user1_id: UserId,
    /// 较大的用户ID
    pub user2_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(a: UserId, b: UserId, now: DateTime<Utc>) -> Self {
        let (user1_id, user2_id) = Self::canonical_pair(a, b);
        Self {
            id: ConversationId::generate(),
            user1_id,
            user2_id,
            created_at: now,
        }
    }

    /// 无论参数顺序如何，同一对用户得到同一个键
    pub fn canonical_pair(a: UserId, b: UserId) -> (UserId, UserId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    pub fn other_participant(&self, user_id: UserId) -> Option<UserId> {
        if self.user1_id == user_id {
            Some(self.user2_id)
        } else if self.user2_id == user_id {
            Some(self.user1_id)
        } else {
            None
        }
    }
}
