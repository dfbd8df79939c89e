//! 私信实体
//!
//! 私信有两个单向状态：撤回是终态；送达/已读只会沿
//! `未设置 -> 已送达 -> 已读` 前进，不会回退。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::business_rules::{DM_EDIT_LIMIT, REVOKED_PLACEHOLDER};
use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ConversationId, DirectMessageId, UserId};

/// 持久化的私信
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: DirectMessageId,
    pub conversation_id: ConversationId,
    pub from_id: UserId,
    pub to_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub edit_count: u32,
    pub revoked: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl DirectMessage {
    pub fn new(
        conversation_id: ConversationId,
        from_id: UserId,
        to_id: UserId,
        text: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DirectMessageId::generate(),
            conversation_id,
            from_id,
            to_id,
            text,
            created_at: now,
            edited_at: None,
            edit_count: 0,
            revoked: false,
            delivered_at: None,
            read_at: None,
        }
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.from_id == user_id || self.to_id == user_id
    }

    /// 检查 `actor` 是否可以编辑，不修改状态
    pub fn ensure_editable_by(&self, actor: UserId) -> DomainResult<()> {
        if self.from_id != actor {
            return Err(DomainError::permission_denied("只有发送者可以编辑私信"));
        }
        if self.revoked {
            return Err(DomainError::business_rule_violation("已撤回的私信不能编辑"));
        }
        if self.edit_count >= DM_EDIT_LIMIT {
            return Err(DomainError::business_rule_violation(format!(
                "私信最多只能编辑{DM_EDIT_LIMIT}次"
            )));
        }
        Ok(())
    }

    /// 检查 `actor` 是否可以撤回，不修改状态
    pub fn ensure_revocable_by(&self, actor: UserId) -> DomainResult<()> {
        if self.from_id != actor {
            return Err(DomainError::permission_denied("只有发送者可以撤回私信"));
        }
        if self.revoked {
            return Err(DomainError::business_rule_violation("私信已撤回"));
        }
        Ok(())
    }

    pub fn apply_edit(&mut self, text: String, now: DateTime<Utc>) -> DomainResult<()> {
        if self.revoked {
            return Err(DomainError::business_rule_violation("已撤回的私信不能编辑"));
        }
        if self.edit_count >= DM_EDIT_LIMIT {
            return Err(DomainError::business_rule_violation(format!(
                "私信最多只能编辑{DM_EDIT_LIMIT}次"
            )));
        }
        self.text = text;
        self.edit_count += 1;
        self.edited_at = Some(now);
        Ok(())
    }

    pub fn revoke(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.revoked {
            return Err(DomainError::business_rule_violation("私信已撤回"));
        }
        self.revoked = true;
        self.text = REVOKED_PLACEHOLDER.to_owned();
        self.edited_at = Some(now);
        Ok(())
    }

    /// 标记为已送达；已经送达过则返回 false
    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> bool {
        if self.delivered_at.is_some() {
            return false;
        }
        self.delivered_at = Some(now);
        true
    }

    /// 标记为已读；已读意味着已送达
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.read_at.is_some() {
            return false;
        }
        if self.delivered_at.is_none() {
            self.delivered_at = Some(now);
        }
        self.read_at = Some(now);
        true
    }
}
