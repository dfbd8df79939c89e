use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use application::store::{MessageStore, StoreError, StoreResult};
use domain::{
    ChatMessage, ChatMessageId, Conversation, ConversationId, DirectMessage, DirectMessageId,
    DomainError, NewNotification, Notification, NotificationId, NotificationKind, Reaction, Role,
    UserId, UserProfile, DM_EDIT_LIMIT, REVOKED_PLACEHOLDER,
};

fn map_sqlx_err(err: sqlx::Error) -> StoreError {
    StoreError::backend(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> StoreError {
    StoreError::backend(message)
}

fn parse_role(raw: &str) -> StoreResult<Role> {
    raw.parse::<Role>()
        .map_err(|err| invalid_data(err.to_string()))
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    avatar_url: Option<String>,
    role: String,
}

impl TryFrom<UserRecord> for UserProfile {
    type Error = StoreError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(UserProfile {
            id: UserId::from(value.id),
            username: value.username,
            avatar_url: value.avatar_url,
            role: parse_role(&value.role)?,
        })
    }
}

/// 全局消息连同作者资料一起查询
#[derive(Debug, FromRow)]
struct ChatMessageRecord {
    id: Uuid,
    text: String,
    author_id: Uuid,
    edited: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    username: String,
    avatar_url: Option<String>,
    role: String,
}

impl TryFrom<ChatMessageRecord> for ChatMessage {
    type Error = StoreError;

    fn try_from(value: ChatMessageRecord) -> Result<Self, Self::Error> {
        let author = UserProfile {
            id: UserId::from(value.author_id),
            username: value.username,
            avatar_url: value.avatar_url,
            role: parse_role(&value.role)?,
        };
        Ok(ChatMessage {
            id: ChatMessageId::from(value.id),
            text: value.text,
            author_id: author.id,
            author,
            created_at: value.created_at,
            edited: value.edited,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct DirectMessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    from_id: Uuid,
    to_id: Uuid,
    text: String,
    created_at: DateTime<Utc>,
    edited_at: Option<DateTime<Utc>>,
    edit_count: i32,
    revoked: bool,
    delivered_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
}

impl TryFrom<DirectMessageRecord> for DirectMessage {
    type Error = StoreError;

    fn try_from(value: DirectMessageRecord) -> Result<Self, Self::Error> {
        let edit_count = u32::try_from(value.edit_count)
            .map_err(|_| invalid_data(format!("negative edit_count {}", value.edit_count)))?;
        Ok(DirectMessage {
            id: DirectMessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            from_id: UserId::from(value.from_id),
            to_id: UserId::from(value.to_id),
            text: value.text,
            created_at: value.created_at,
            edited_at: value.edited_at,
            edit_count,
            revoked: value.revoked,
            delivered_at: value.delivered_at,
            read_at: value.read_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    user1_id: Uuid,
    user2_id: Uuid,
    created_at: DateTime<Utc>,
}

impl From<ConversationRecord> for Conversation {
    fn from(value: ConversationRecord) -> Self {
        Conversation {
            id: ConversationId::from(value.id),
            user1_id: UserId::from(value.user1_id),
            user2_id: UserId::from(value.user2_id),
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ReactionRecord {
    message_id: Uuid,
    user_id: Uuid,
    username: String,
    emoji: String,
}

impl From<ReactionRecord> for Reaction {
    fn from(value: ReactionRecord) -> Self {
        Reaction {
            message_id: value.message_id,
            user_id: UserId::from(value.user_id),
            username: value.username,
            emoji: value.emoji,
        }
    }
}

#[derive(Debug, FromRow)]
struct NotificationRecord {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    title: String,
    body: String,
    link: Option<String>,
    read: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRecord> for Notification {
    type Error = StoreError;

    fn try_from(value: NotificationRecord) -> Result<Self, Self::Error> {
        let kind = match value.kind.as_str() {
            "dm" => NotificationKind::Dm,
            "mention" => NotificationKind::Mention,
            other => return Err(invalid_data(format!("unknown notification kind {other}"))),
        };
        Ok(Notification {
            id: NotificationId::from(value.id),
            user_id: UserId::from(value.user_id),
            kind,
            title: value.title,
            body: value.body,
            link: value.link,
            read: value.read,
            created_at: value.created_at,
        })
    }
}

const CHAT_MESSAGE_COLUMNS: &str = r#"
    m.id, m.text, m.author_id, m.edited, m.created_at, m.updated_at,
    u.username, u.avatar_url, u.role
"#;

const DIRECT_MESSAGE_COLUMNS: &str = r#"
    id, conversation_id, from_id, to_id, text, created_at, edited_at,
    edit_count, revoked, delivered_at, read_at
"#;

/// 表名只来自本模块的常量，不会拼接外部输入
#[derive(Debug, Clone, Copy)]
enum ReactionTable {
    Chat,
    Direct,
}

impl ReactionTable {
    fn reactions(self) -> &'static str {
        match self {
            ReactionTable::Chat => "chat_reactions",
            ReactionTable::Direct => "dm_reactions",
        }
    }

    fn messages(self) -> &'static str {
        match self {
            ReactionTable::Chat => "chat_messages",
            ReactionTable::Direct => "direct_messages",
        }
    }
}

/// PostgreSQL 实现的消息存储网关
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 新增或更新用户资料（用户由外部系统注册，这里主要供工具和测试使用）
    pub async fn upsert_user(&self, profile: &UserProfile) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, avatar_url, role)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET username = EXCLUDED.username,
                avatar_url = EXCLUDED.avatar_url,
                role = EXCLUDED.role
            "#,
        )
        .bind(Uuid::from(profile.id))
        .bind(&profile.username)
        .bind(profile.avatar_url.as_deref())
        .bind(profile.role.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn fetch_chat_message(&self, id: Uuid) -> StoreResult<Option<ChatMessage>> {
        let query = format!(
            "SELECT {CHAT_MESSAGE_COLUMNS} FROM chat_messages m \
             JOIN users u ON u.id = m.author_id WHERE m.id = $1"
        );
        let record = sqlx::query_as::<_, ChatMessageRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(ChatMessage::try_from).transpose()
    }

    async fn toggle_reaction(
        &self,
        table: ReactionTable,
        message_id: Uuid,
        user_id: UserId,
        emoji: &str,
    ) -> StoreResult<Vec<Reaction>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let exists_query = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1)", table.messages());
        let exists: bool = sqlx::query_scalar(&exists_query)
            .bind(message_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        if !exists {
            return Err(StoreError::NotFound(format!("message {message_id}")));
        }

        let delete_query = format!(
            "DELETE FROM {} WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
            table.reactions()
        );
        let removed = sqlx::query(&delete_query)
            .bind(message_id)
            .bind(Uuid::from(user_id))
            .bind(emoji)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .rows_affected();

        if removed == 0 {
            let insert_query = format!(
                "INSERT INTO {} (message_id, user_id, emoji) VALUES ($1, $2, $3) \
                 ON CONFLICT DO NOTHING",
                table.reactions()
            );
            sqlx::query(&insert_query)
                .bind(message_id)
                .bind(Uuid::from(user_id))
                .bind(emoji)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        }

        let select_query = format!(
            "SELECT r.message_id, r.user_id, u.username, r.emoji FROM {} r \
             JOIN users u ON u.id = r.user_id \
             WHERE r.message_id = $1 ORDER BY r.created_at, r.user_id",
            table.reactions()
        );
        let records = sqlx::query_as::<_, ReactionRecord>(&select_query)
            .bind(message_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(records.into_iter().map(Reaction::from).collect())
    }

    /// 找到或创建会话；并发创建时依赖唯一约束，失败方读取胜出方的行
    async fn conversation_for(
        tx: &mut Transaction<'_, Postgres>,
        a: UserId,
        b: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<ConversationId> {
        let (user1, user2) = Conversation::canonical_pair(a, b);
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user1_id, user2_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user1_id, user2_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(Uuid::from(user1))
        .bind(Uuid::from(user2))
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        let id: Uuid = sqlx::query_scalar(
            "SELECT id FROM conversations WHERE user1_id = $1 AND user2_id = $2",
        )
        .bind(Uuid::from(user1))
        .bind(Uuid::from(user2))
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;
        Ok(ConversationId::from(id))
    }

    /// 条件更新没有命中时区分“不存在”和“规则不允许”
    async fn explain_dm_miss(&self, id: DirectMessageId, rule: &str) -> StoreError {
        match self.find_direct_message(id).await {
            Ok(Some(_)) => StoreError::Rejected(DomainError::business_rule_violation(rule)),
            Ok(None) => StoreError::NotFound(format!("direct message {id}")),
            Err(err) => err,
        }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<UserProfile>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, avatar_url, role FROM users WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(UserProfile::try_from).transpose()
    }

    async fn find_user_role(&self, id: UserId) -> StoreResult<Option<Role>> {
        let role: Option<String> = sqlx::query_scalar("SELECT role FROM users WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        role.as_deref().map(parse_role).transpose()
    }

    async fn find_users_by_usernames(&self, usernames: &[String]) -> StoreResult<Vec<UserProfile>> {
        if usernames.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, avatar_url, role FROM users WHERE username = ANY($1)",
        )
        .bind(usernames)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(UserProfile::try_from).collect()
    }

    async fn touch_last_online(&self, id: UserId, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_online_at = $2 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn create_chat_message(&self, text: &str, author_id: UserId) -> StoreResult<ChatMessage> {
        let query = format!(
            r#"
            WITH inserted AS (
                INSERT INTO chat_messages (id, author_id, text, created_at)
                VALUES ($1, $2, $3, NOW())
                RETURNING *
            )
            SELECT {CHAT_MESSAGE_COLUMNS} FROM inserted m JOIN users u ON u.id = m.author_id
            "#
        );
        let record = sqlx::query_as::<_, ChatMessageRecord>(&query)
            .bind(Uuid::new_v4())
            .bind(Uuid::from(author_id))
            .bind(text)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| StoreError::NotFound(format!("user {author_id}")))?;
        ChatMessage::try_from(record)
    }

    async fn find_chat_message(&self, id: ChatMessageId) -> StoreResult<Option<ChatMessage>> {
        self.fetch_chat_message(id.into()).await
    }

    async fn update_chat_message(&self, id: ChatMessageId, text: &str) -> StoreResult<ChatMessage> {
        let query = format!(
            r#"
            WITH updated AS (
                UPDATE chat_messages SET text = $2, edited = TRUE, updated_at = NOW()
                WHERE id = $1
                RETURNING *
            )
            SELECT {CHAT_MESSAGE_COLUMNS} FROM updated m JOIN users u ON u.id = m.author_id
            "#
        );
        let record = sqlx::query_as::<_, ChatMessageRecord>(&query)
            .bind(Uuid::from(id))
            .bind(text)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| StoreError::NotFound(format!("message {id}")))?;
        ChatMessage::try_from(record)
    }

    async fn toggle_chat_reaction(
        &self,
        message_id: ChatMessageId,
        user_id: UserId,
        emoji: &str,
    ) -> StoreResult<Vec<Reaction>> {
        self.toggle_reaction(ReactionTable::Chat, message_id.into(), user_id, emoji)
            .await
    }

    async fn find_recent_global_messages(&self, limit: usize) -> StoreResult<Vec<ChatMessage>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let query = format!(
            r#"
            SELECT * FROM (
                SELECT {CHAT_MESSAGE_COLUMNS} FROM chat_messages m
                JOIN users u ON u.id = m.author_id
                ORDER BY m.created_at DESC, m.id DESC
                LIMIT $1
            ) recent
            ORDER BY created_at ASC, id ASC
            "#
        );
        let records = sqlx::query_as::<_, ChatMessageRecord>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        records.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn create_direct_message(
        &self,
        from_id: UserId,
        to_id: UserId,
        text: &str,
    ) -> StoreResult<DirectMessage> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let recipient_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                .bind(Uuid::from(to_id))
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        if !recipient_exists {
            return Err(StoreError::NotFound(format!("user {to_id}")));
        }

        let now = Utc::now();
        let conversation_id = Self::conversation_for(&mut tx, from_id, to_id, now).await?;
        let message = DirectMessage::new(conversation_id, from_id, to_id, text.to_owned(), now);

        let query = format!(
            "INSERT INTO direct_messages (id, conversation_id, from_id, to_id, text, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {DIRECT_MESSAGE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, DirectMessageRecord>(&query)
            .bind(Uuid::from(message.id))
            .bind(Uuid::from(conversation_id))
            .bind(Uuid::from(from_id))
            .bind(Uuid::from(to_id))
            .bind(&message.text)
            .bind(message.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        DirectMessage::try_from(record)
    }

    async fn find_direct_message(&self, id: DirectMessageId) -> StoreResult<Option<DirectMessage>> {
        let query = format!("SELECT {DIRECT_MESSAGE_COLUMNS} FROM direct_messages WHERE id = $1");
        let record = sqlx::query_as::<_, DirectMessageRecord>(&query)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(DirectMessage::try_from).transpose()
    }

    async fn update_direct_message(
        &self,
        id: DirectMessageId,
        text: &str,
    ) -> StoreResult<DirectMessage> {
        // 条件写入保证并发编辑也不会越过上限
        let query = format!(
            "UPDATE direct_messages \
             SET text = $2, edit_count = edit_count + 1, edited_at = NOW() \
             WHERE id = $1 AND NOT revoked AND edit_count < $3 \
             RETURNING {DIRECT_MESSAGE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, DirectMessageRecord>(&query)
            .bind(Uuid::from(id))
            .bind(text)
            .bind(i32::try_from(DM_EDIT_LIMIT).unwrap_or(i32::MAX))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        match record {
            Some(record) => DirectMessage::try_from(record),
            None => Err(self
                .explain_dm_miss(id, "direct message is revoked or out of edits")
                .await),
        }
    }

    async fn revoke_direct_message(&self, id: DirectMessageId) -> StoreResult<DirectMessage> {
        let query = format!(
            "UPDATE direct_messages \
             SET text = $2, revoked = TRUE, edited_at = NOW() \
             WHERE id = $1 AND NOT revoked \
             RETURNING {DIRECT_MESSAGE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, DirectMessageRecord>(&query)
            .bind(Uuid::from(id))
            .bind(REVOKED_PLACEHOLDER)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        match record {
            Some(record) => DirectMessage::try_from(record),
            None => Err(self.explain_dm_miss(id, "direct message already revoked").await),
        }
    }

    async fn toggle_dm_reaction(
        &self,
        message_id: DirectMessageId,
        user_id: UserId,
        emoji: &str,
    ) -> StoreResult<Vec<Reaction>> {
        self.toggle_reaction(ReactionTable::Direct, message_id.into(), user_id, emoji)
            .await
    }

    async fn find_conversation(&self, id: ConversationId) -> StoreResult<Option<Conversation>> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            "SELECT id, user1_id, user2_id, created_at FROM conversations WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(Conversation::from))
    }

    async fn mark_delivered(
        &self,
        conversation_id: ConversationId,
        recipient_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<DirectMessageId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE direct_messages SET delivered_at = $3
            WHERE conversation_id = $1 AND to_id = $2 AND delivered_at IS NULL
            RETURNING id
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(recipient_id))
        .bind(at)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(ids.into_iter().map(DirectMessageId::from).collect())
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<DirectMessageId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE direct_messages
            SET read_at = $3, delivered_at = COALESCE(delivered_at, $3)
            WHERE conversation_id = $1 AND to_id = $2 AND read_at IS NULL
            RETURNING id
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(reader_id))
        .bind(at)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(ids.into_iter().map(DirectMessageId::from).collect())
    }

    async fn create_notification(&self, notification: NewNotification) -> StoreResult<Notification> {
        let record = sqlx::query_as::<_, NotificationRecord>(
            r#"
            INSERT INTO notifications (id, user_id, kind, title, body, link, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING id, user_id, kind, title, body, link, read, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(Uuid::from(notification.user_id))
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(notification.link.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Notification::try_from(record)
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    tracing::info!(max_connections, "PostgreSQL 连接池已创建");
    Ok(pool)
}
