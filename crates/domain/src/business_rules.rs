//! 业务规则验证
//!
//! 实时消息中心在持久化之前执行的全部校验规则。

use once_cell::sync::Lazy;
use regex::Regex;

use crate::entities::user::Role;
use crate::errors::{DomainError, DomainResult};
use crate::value_objects::UserId;

/// 聊天与私信文本的最大字符数
pub const MAX_TEXT_CHARS: usize = 2000;

/// 单个表情允许的最大字符数
pub const MAX_EMOJI_CHARS: usize = 8;

/// 允许使用的反应表情
pub const ALLOWED_EMOJIS: [&str; 6] = ["❤️", "😆", "👍", "😡", "😢", "😮"];

/// 私信最多可编辑的次数
pub const DM_EDIT_LIMIT: u32 = 3;

/// 撤回后替换的固定文本
pub const REVOKED_PLACEHOLDER: &str = "This message was revoked";

/// 客户端关联ID的最大长度
pub const MAX_CLIENT_ID_CHARS: usize = 64;

static MENTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]+)").expect("mention pattern is valid"));

/// 校验消息文本，返回去除首尾空白后的内容
pub fn validate_text(field: &str, text: &str) -> DomainResult<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation_error(field, "文本不能为空"));
    }
    if trimmed.chars().count() > MAX_TEXT_CHARS {
        return Err(DomainError::validation_error(
            field,
            format!("文本长度不能超过{MAX_TEXT_CHARS}个字符"),
        ));
    }
    Ok(trimmed.to_owned())
}

/// 校验反应表情，只接受白名单中的表情
pub fn validate_emoji(emoji: &str) -> DomainResult<String> {
    let cleaned = emoji.trim();
    if cleaned.is_empty()
        || cleaned.chars().count() > MAX_EMOJI_CHARS
        || !ALLOWED_EMOJIS.contains(&cleaned)
    {
        return Err(DomainError::validation_error("emoji", "不允许的表情"));
    }
    Ok(cleaned.to_owned())
}

/// 校验客户端关联ID
pub fn validate_client_id(client_id: Option<String>) -> DomainResult<Option<String>> {
    match client_id {
        Some(id) if id.chars().count() > MAX_CLIENT_ID_CHARS => Err(
            DomainError::validation_error("clientId", "客户端关联ID过长"),
        ),
        other => Ok(other),
    }
}

/// 提取文本中的 `@username`，按出现顺序去重
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for capture in MENTION_PATTERN.captures_iter(text) {
        let name = capture[1].to_owned();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// 作者本人或拥有提升角色的用户可以修改已有内容
pub fn can_modify(actor: UserId, actor_role: Role, author: UserId) -> bool {
    actor == author || actor_role.is_elevated()
}
