//! 消息反应
//!
//! 同一 `(消息, 用户, 表情)` 只存在一条；重复提交同一反应即取消。
//! 对外的聚合视图每次都从完整的反应集合重新计算。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::UserId;

/// 单条反应记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub message_id: Uuid,
    pub user_id: UserId,
    pub username: String,
    pub emoji: String,
}

/// 按表情聚合后的视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    /// 相对于本次操作者
    pub mine: bool,
    pub users: Vec<String>,
    pub user_ids: Vec<UserId>,
}

/// 按表情首次出现的顺序聚合
pub fn aggregate_reactions(reactions: &[Reaction], viewer: UserId) -> Vec<ReactionSummary> {
    let mut summaries: Vec<ReactionSummary> = Vec::new();
    for reaction in reactions {
        let index = match summaries.iter().position(|s| s.emoji == reaction.emoji) {
            Some(index) => index,
            None => {
                summaries.push(ReactionSummary {
                    emoji: reaction.emoji.clone(),
                    count: 0,
                    mine: false,
                    users: Vec::new(),
                    user_ids: Vec::new(),
                });
                summaries.len() - 1
            }
        };
        let entry = &mut summaries[index];
        entry.count += 1;
        entry.users.push(reaction.username.clone());
        entry.user_ids.push(reaction.user_id);
        if reaction.user_id == viewer {
            entry.mine = true;
        }
    }
    summaries
}

/// 单条消息上的反应集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionSet {
    reactions: Vec<Reaction>,
}

impl ReactionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 切换反应，返回 true 表示新增，false 表示取消
    pub fn toggle(&mut self, message_id: Uuid, user_id: UserId, username: &str, emoji: &str) -> bool {
        if let Some(index) = self
            .reactions
            .iter()
            .position(|r| r.user_id == user_id && r.emoji == emoji)
        {
            self.reactions.remove(index);
            return false;
        }
        self.reactions.push(Reaction {
            message_id,
            user_id,
            username: username.to_owned(),
            emoji: emoji.to_owned(),
        });
        true
    }

    pub fn as_slice(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn aggregate(&self, viewer: UserId) -> Vec<ReactionSummary> {
        aggregate_reactions(&self.reactions, viewer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggling_twice_restores_the_aggregate() {
        let message_id = Uuid::new_v4();
        let alice = UserId::generate();
        let bob = UserId::generate();

        let mut set = ReactionSet::new();
        set.toggle(message_id, bob, "bob", "👍");
        let before = set.aggregate(alice);

        assert!(set.toggle(message_id, alice, "alice", "👍"));
        assert!(!set.toggle(message_id, alice, "alice", "👍"));
        assert_eq!(set.aggregate(alice), before);
    }

    #[test]
    fn aggregate_groups_by_emoji_and_marks_viewer() {
        let message_id = Uuid::new_v4();
        let alice = UserId::generate();
        let bob = UserId::generate();

        let mut set = ReactionSet::new();
        set.toggle(message_id, alice, "alice", "👍");
        set.toggle(message_id, bob, "bob", "👍");
        set.toggle(message_id, bob, "bob", "😮");

        let view = set.aggregate(alice);
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].emoji, "👍");
        assert_eq!(view[0].count, 2);
        assert!(view[0].mine);
        assert_eq!(view[0].users, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(view[1].emoji, "😮");
        assert!(!view[1].mine);
    }

    #[test]
    fn distinct_emojis_from_one_user_coexist() {
        let message_id = Uuid::new_v4();
        let alice = UserId::generate();
        let mut set = ReactionSet::new();
        assert!(set.toggle(message_id, alice, "alice", "👍"));
        assert!(set.toggle(message_id, alice, "alice", "❤️"));
        assert_eq!(set.as_slice().len(), 2);
    }
}
