// SQLite-backed moderation store.
//
// Tables:
// - users, user_preferences, user_sessions, user_info_data, user_files: identity
// - forums, discussions, forum_posts, comments: reportable content
// - messages, message_deliveries, tag_instances: per-user data removed by redaction
// - spam_votes: one row per (voter, target), enforced by a unique index
// - spam_candidates: content queued for the external checker
//
// Timestamps are stored as unix seconds.

use crate::core::moderation::{
    AccountState, CandidateStore, Comment, ContentStore, Discussion, ExternalSpamCandidate, Forum,
    ForumKind, ForumPost, IdentityStore, ModerationError, NewSpamCandidate, NewVote,
    PostCountFilter, ProfileScrub, RedactionTransaction, ReportTarget, Role, TargetKind, User,
    UserContentCounts, Vote, VoteStore, Voter,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite, Transaction};
use std::path::Path;

const USER_COLUMNS: &str = "id, username, email, first_name, last_name, state, role, first_access, \
    description, url, icq, skype, yahoo, aim, msn, phone1, phone2, department, institution, city, picture";

const POST_COLUMNS: &str = "p.id, p.discussion_id, p.parent_id, p.user_id, p.subject, p.message, p.created";

fn storage(e: sqlx::Error) -> ModerationError {
    ModerationError::StorageError(e.to_string())
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

pub(crate) fn state_to_str(state: AccountState) -> &'static str {
    match state {
        AccountState::Active => "active",
        AccountState::Suspended => "suspended",
        AccountState::Deleted => "deleted",
    }
}

fn state_from_str(value: &str) -> AccountState {
    match value {
        "suspended" => AccountState::Suspended,
        "deleted" => AccountState::Deleted,
        _ => AccountState::Active,
    }
}

pub(crate) fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::Guest => "guest",
        Role::Ordinary => "ordinary",
        Role::Moderator => "moderator",
        Role::Admin => "admin",
    }
}

fn role_from_str(value: &str) -> Role {
    match value {
        "guest" => Role::Guest,
        "moderator" => Role::Moderator,
        "admin" => Role::Admin,
        _ => Role::Ordinary,
    }
}

pub(crate) fn forum_kind_to_str(kind: ForumKind) -> &'static str {
    match kind {
        ForumKind::General => "general",
        ForumKind::SingleDiscussion => "single",
    }
}

fn forum_kind_from_str(value: &str) -> ForumKind {
    match value {
        "single" => ForumKind::SingleDiscussion,
        _ => ForumKind::General,
    }
}

fn user_from_row(row: &SqliteRow) -> User {
    let state: String = row.get("state");
    let role: String = row.get("role");
    let first_access: Option<i64> = row.get("first_access");
    let id: i64 = row.get("id");
    let picture: i64 = row.get("picture");

    User {
        id: id as u64,
        username: row.get("username"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        state: state_from_str(&state),
        role: role_from_str(&role),
        first_access: first_access.map(from_ts),
        description: row.get("description"),
        url: row.get("url"),
        icq: row.get("icq"),
        skype: row.get("skype"),
        yahoo: row.get("yahoo"),
        aim: row.get("aim"),
        msn: row.get("msn"),
        phone1: row.get("phone1"),
        phone2: row.get("phone2"),
        department: row.get("department"),
        institution: row.get("institution"),
        city: row.get("city"),
        picture: picture as u64,
    }
}

fn post_from_row(row: &SqliteRow) -> ForumPost {
    let id: i64 = row.get("id");
    let discussion_id: i64 = row.get("discussion_id");
    let parent_id: Option<i64> = row.get("parent_id");
    let user_id: i64 = row.get("user_id");
    let created: i64 = row.get("created");

    ForumPost {
        id: id as u64,
        discussion_id: discussion_id as u64,
        parent_id: parent_id.map(|p| p as u64),
        user_id: user_id as u64,
        subject: row.get("subject"),
        message: row.get("message"),
        created: from_ts(created),
    }
}

/// Forum columns aliased as `forum_id`, `forum_name`, `forum_kind`.
fn forum_from_row(row: &SqliteRow) -> Forum {
    let id: i64 = row.get("forum_id");
    let kind: String = row.get("forum_kind");
    Forum {
        id: id as u64,
        name: row.get("forum_name"),
        kind: forum_kind_from_str(&kind),
    }
}

fn discussion_from_row(row: &SqliteRow) -> Discussion {
    let id: i64 = row.get("id");
    let forum_id: i64 = row.get("forum_id");
    let first_post_id: i64 = row.get("first_post_id");
    let user_id: i64 = row.get("user_id");
    Discussion {
        id: id as u64,
        forum_id: forum_id as u64,
        name: row.get("name"),
        first_post_id: first_post_id as u64,
        user_id: user_id as u64,
    }
}

fn vote_from_row(row: &SqliteRow) -> Option<Vote> {
    let kind: String = row.get("target_kind");
    let id: i64 = row.get("id");
    let target_id: i64 = row.get("target_id");
    let spammer_id: i64 = row.get("spammer_id");
    let voter_id: i64 = row.get("voter_id");
    let weighting: i64 = row.get("weighting");
    let created: i64 = row.get("created");

    Some(Vote {
        id: id as u64,
        target: ReportTarget::new(TargetKind::parse(&kind)?, target_id as u64),
        spammer_id: spammer_id as u64,
        voter: Voter::from_id(voter_id as u64),
        weighting: weighting as u32,
        created_at: from_ts(created),
    })
}

fn candidate_from_row(row: &SqliteRow) -> ExternalSpamCandidate {
    let id: i64 = row.get("id");
    let original_id: i64 = row.get("original_id");
    let created: i64 = row.get("created");
    ExternalSpamCandidate {
        id: id as u64,
        original_id: original_id as u64,
        is_spam: row.get("is_spam"),
        user_ip: row.get("user_ip"),
        user_agent: row.get("user_agent"),
        comment_author: row.get("comment_author"),
        comment_author_email: row.get("comment_author_email"),
        comment_content: row.get("comment_content"),
        created_at: from_ts(created),
    }
}

pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

impl SqliteModerationStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// A private in-memory database. The single connection must never be
    /// closed or the database goes with it.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL,
                email TEXT NOT NULL DEFAULT '',
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT 'active',
                role TEXT NOT NULL DEFAULT 'ordinary',
                first_access INTEGER,
                description TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL DEFAULT '',
                icq TEXT NOT NULL DEFAULT '',
                skype TEXT NOT NULL DEFAULT '',
                yahoo TEXT NOT NULL DEFAULT '',
                aim TEXT NOT NULL DEFAULT '',
                msn TEXT NOT NULL DEFAULT '',
                phone1 TEXT NOT NULL DEFAULT '',
                phone2 TEXT NOT NULL DEFAULT '',
                department TEXT NOT NULL DEFAULT '',
                institution TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                picture INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS user_preferences (
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (user_id, name)
            );
            CREATE TABLE IF NOT EXISTS user_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                sid TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS user_info_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                field_name TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS user_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                area TEXT NOT NULL,
                filename TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS forums (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'general'
            );
            CREATE TABLE IF NOT EXISTS discussions (
                id INTEGER PRIMARY KEY,
                forum_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                first_post_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS forum_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                discussion_id INTEGER NOT NULL,
                parent_id INTEGER,
                user_id INTEGER NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                message TEXT NOT NULL DEFAULT '',
                created INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_forum_posts_user ON forum_posts(user_id, created);
            CREATE INDEX IF NOT EXISTS idx_forum_posts_parent ON forum_posts(parent_id);
            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                component TEXT NOT NULL,
                item_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                created INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id_from INTEGER NOT NULL,
                user_id_to INTEGER NOT NULL,
                body TEXT NOT NULL,
                is_read BOOLEAN NOT NULL DEFAULT 0,
                created INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS message_deliveries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER NOT NULL,
                status TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tag_instances (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                tag_name TEXT NOT NULL,
                item_id INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS spam_votes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target_kind TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                spammer_id INTEGER NOT NULL,
                voter_id INTEGER NOT NULL,
                weighting INTEGER NOT NULL DEFAULT 0,
                created INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_spam_votes_voter_target
                ON spam_votes(voter_id, target_kind, target_id);
            CREATE INDEX IF NOT EXISTS idx_spam_votes_spammer ON spam_votes(spammer_id);
            CREATE TABLE IF NOT EXISTS spam_candidates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_id INTEGER NOT NULL,
                is_spam BOOLEAN NOT NULL,
                user_ip TEXT NOT NULL,
                user_agent TEXT NOT NULL,
                comment_author TEXT NOT NULL,
                comment_author_email TEXT NOT NULL,
                comment_content TEXT NOT NULL,
                created INTEGER NOT NULL,
                UNIQUE (original_id, is_spam)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count(&self, sql: &str, user_id: u64) -> Result<u64, ModerationError> {
        let row = sqlx::query(sql)
            .bind(user_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }
}

// ============================================================================
// IDENTITY
// ============================================================================

#[async_trait]
impl IdentityStore for SqliteModerationStore {
    async fn get_user(&self, user_id: u64) -> Result<Option<User>, ModerationError> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn list_moderators(&self) -> Result<Vec<User>, ModerationError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users WHERE role IN ('moderator', 'admin') AND state = 'active' ORDER BY id",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn users_first_accessed_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<User>, ModerationError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users WHERE state = 'active' AND first_access > ? ORDER BY id",
            USER_COLUMNS
        ))
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn get_preference(
        &self,
        user_id: u64,
        name: &str,
    ) -> Result<Option<String>, ModerationError> {
        let row = sqlx::query("SELECT value FROM user_preferences WHERE user_id = ? AND name = ?")
            .bind(user_id as i64)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn set_preference(
        &self,
        user_id: u64,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), ModerationError> {
        match value {
            Some(value) => {
                sqlx::query(
                    r#"
                    INSERT INTO user_preferences (user_id, name, value)
                    VALUES (?, ?, ?)
                    ON CONFLICT(user_id, name) DO UPDATE SET value = excluded.value
                    "#,
                )
                .bind(user_id as i64)
                .bind(name)
                .bind(value)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
            }
            None => {
                sqlx::query("DELETE FROM user_preferences WHERE user_id = ? AND name = ?")
                    .bind(user_id as i64)
                    .bind(name)
                    .execute(&self.pool)
                    .await
                    .map_err(storage)?;
            }
        }
        Ok(())
    }

    async fn suspend_user(&self, user_id: u64, description: &str) -> Result<(), ModerationError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let updated = sqlx::query("UPDATE users SET state = 'suspended', description = ? WHERE id = ?")
            .bind(description)
            .bind(user_id as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        if updated.rows_affected() == 0 {
            return Err(ModerationError::NotFound(format!("user {}", user_id)));
        }

        sqlx::query("DELETE FROM user_sessions WHERE user_id = ?")
            .bind(user_id as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)
    }
}

// ============================================================================
// CONTENT
// ============================================================================

#[async_trait]
impl ContentStore for SqliteModerationStore {
    async fn get_post(&self, post_id: u64) -> Result<Option<ForumPost>, ModerationError> {
        let row = sqlx::query(&format!("SELECT {} FROM forum_posts p WHERE p.id = ?", POST_COLUMNS))
            .bind(post_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.as_ref().map(post_from_row))
    }

    async fn get_discussion(
        &self,
        discussion_id: u64,
    ) -> Result<Option<Discussion>, ModerationError> {
        let row = sqlx::query(
            "SELECT id, forum_id, name, first_post_id, user_id FROM discussions WHERE id = ?",
        )
        .bind(discussion_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        Ok(row.as_ref().map(discussion_from_row))
    }

    async fn get_forum(&self, forum_id: u64) -> Result<Option<Forum>, ModerationError> {
        let row = sqlx::query(
            "SELECT id AS forum_id, name AS forum_name, kind AS forum_kind FROM forums WHERE id = ?",
        )
        .bind(forum_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        Ok(row.as_ref().map(forum_from_row))
    }

    async fn get_comment(&self, comment_id: u64) -> Result<Option<Comment>, ModerationError> {
        let row = sqlx::query(
            "SELECT id, user_id, component, item_id, content, created FROM comments WHERE id = ?",
        )
        .bind(comment_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row.map(|row| {
            let id: i64 = row.get("id");
            let user_id: i64 = row.get("user_id");
            let item_id: i64 = row.get("item_id");
            let created: i64 = row.get("created");
            Comment {
                id: id as u64,
                user_id: user_id as u64,
                component: row.get("component"),
                item_id: item_id as u64,
                content: row.get("content"),
                created: from_ts(created),
            }
        }))
    }

    async fn count_posts(
        &self,
        user_id: u64,
        filter: PostCountFilter,
    ) -> Result<u64, ModerationError> {
        let (sql, at) = match filter {
            PostCountFilter::All => ("SELECT COUNT(*) AS n FROM forum_posts WHERE user_id = ?", None),
            PostCountFilter::CreatedBefore(at) => (
                "SELECT COUNT(*) AS n FROM forum_posts WHERE user_id = ? AND created < ?",
                Some(at),
            ),
            PostCountFilter::CreatedAfter(at) => (
                "SELECT COUNT(*) AS n FROM forum_posts WHERE user_id = ? AND created > ?",
                Some(at),
            ),
        };

        let mut query = sqlx::query(sql).bind(user_id as i64);
        if let Some(at) = at {
            query = query.bind(at.timestamp());
        }
        let row = query.fetch_one(&self.pool).await.map_err(storage)?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn content_counts(&self, user_id: u64) -> Result<UserContentCounts, ModerationError> {
        Ok(UserContentCounts {
            unread_messages: self
                .count("SELECT COUNT(*) AS n FROM messages WHERE user_id_from = ? AND is_read = 0", user_id)
                .await?,
            read_messages: self
                .count("SELECT COUNT(*) AS n FROM messages WHERE user_id_from = ? AND is_read = 1", user_id)
                .await?,
            forum_posts: self
                .count("SELECT COUNT(*) AS n FROM forum_posts WHERE user_id = ?", user_id)
                .await?,
            comments: self
                .count("SELECT COUNT(*) AS n FROM comments WHERE user_id = ?", user_id)
                .await?,
            tags: self
                .count(
                    "SELECT COUNT(DISTINCT tag_name) AS n FROM tag_instances WHERE user_id = ?",
                    user_id,
                )
                .await?,
        })
    }

    async fn begin_redaction(&self) -> Result<Box<dyn RedactionTransaction>, ModerationError> {
        // IMMEDIATE takes the write lock up front; a second redaction waits
        // here instead of reading state the first is about to change.
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await.map_err(storage)?;
        Ok(Box::new(SqliteRedaction { tx: Some(tx) }))
    }
}

// ============================================================================
// REDACTION TRANSACTION
// ============================================================================

/// Dropping this without `commit` rolls everything back.
pub struct SqliteRedaction {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteRedaction {
    fn conn(&mut self) -> Result<&mut SqliteConnection, ModerationError> {
        self.tx.as_deref_mut().ok_or_else(|| {
            ModerationError::StorageError("redaction transaction already finished".to_string())
        })
    }

    async fn delete_by_user(&mut self, sql: &str, user_id: u64) -> Result<u64, ModerationError> {
        let result = sqlx::query(sql)
            .bind(user_id as i64)
            .execute(self.conn()?)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RedactionTransaction for SqliteRedaction {
    async fn lock_active_user(&mut self, user_id: u64) -> Result<bool, ModerationError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users WHERE id = ? AND state = 'active'")
            .bind(user_id as i64)
            .fetch_one(self.conn()?)
            .await
            .map_err(storage)?;
        Ok(row.get::<i64, _>("n") > 0)
    }

    async fn delete_comments_by(&mut self, user_id: u64) -> Result<u64, ModerationError> {
        self.delete_by_user("DELETE FROM comments WHERE user_id = ?", user_id)
            .await
    }

    async fn discussions_started_by(
        &mut self,
        user_id: u64,
    ) -> Result<Vec<(Discussion, Forum)>, ModerationError> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.forum_id, d.name, d.first_post_id, d.user_id,
                   f.name AS forum_name, f.kind AS forum_kind
            FROM discussions d
            JOIN forum_posts p ON p.id = d.first_post_id
            JOIN forums f ON f.id = d.forum_id
            WHERE p.user_id = ?
            ORDER BY d.id
            "#,
        )
        .bind(user_id as i64)
        .fetch_all(self.conn()?)
        .await
        .map_err(storage)?;

        Ok(rows
            .iter()
            .map(|row| (discussion_from_row(row), forum_from_row(row)))
            .collect())
    }

    async fn delete_discussion(&mut self, discussion_id: u64) -> Result<u64, ModerationError> {
        let posts = sqlx::query("DELETE FROM forum_posts WHERE discussion_id = ?")
            .bind(discussion_id as i64)
            .execute(self.conn()?)
            .await
            .map_err(storage)?;
        sqlx::query("DELETE FROM discussions WHERE id = ?")
            .bind(discussion_id as i64)
            .execute(self.conn()?)
            .await
            .map_err(storage)?;
        Ok(posts.rows_affected())
    }

    async fn posts_by(&mut self, user_id: u64) -> Result<Vec<(ForumPost, Forum)>, ModerationError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, f.id AS forum_id, f.name AS forum_name, f.kind AS forum_kind
            FROM forum_posts p
            JOIN discussions d ON d.id = p.discussion_id
            JOIN forums f ON f.id = d.forum_id
            WHERE p.user_id = ?
            ORDER BY p.id
            "#,
            POST_COLUMNS
        ))
        .bind(user_id as i64)
        .fetch_all(self.conn()?)
        .await
        .map_err(storage)?;

        Ok(rows
            .iter()
            .map(|row| (post_from_row(row), forum_from_row(row)))
            .collect())
    }

    async fn delete_post_tree(&mut self, post_id: u64) -> Result<u64, ModerationError> {
        let result = sqlx::query(
            r#"
            WITH RECURSIVE tree(id) AS (
                SELECT id FROM forum_posts WHERE id = ?
                UNION ALL
                SELECT p.id FROM forum_posts p JOIN tree t ON p.parent_id = t.id
            )
            DELETE FROM forum_posts WHERE id IN (SELECT id FROM tree)
            "#,
        )
        .bind(post_id as i64)
        .execute(self.conn()?)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn delete_messages_from(&mut self, user_id: u64) -> Result<u64, ModerationError> {
        self.delete_by_user(
            "DELETE FROM message_deliveries WHERE message_id IN (SELECT id FROM messages WHERE user_id_from = ?)",
            user_id,
        )
        .await?;
        self.delete_by_user("DELETE FROM messages WHERE user_id_from = ?", user_id)
            .await
    }

    async fn clear_tags(&mut self, user_id: u64) -> Result<u64, ModerationError> {
        self.delete_by_user("DELETE FROM tag_instances WHERE user_id = ?", user_id)
            .await
    }

    async fn scrub_user(
        &mut self,
        user_id: u64,
        scrub: &ProfileScrub,
    ) -> Result<(), ModerationError> {
        let updated = sqlx::query(
            r#"
            UPDATE users SET
                state = 'suspended', description = ?, city = ?,
                url = '', icq = '', skype = '', yahoo = '', aim = '', msn = '',
                phone1 = '', phone2 = '', department = '', institution = '', picture = 0
            WHERE id = ?
            "#,
        )
        .bind(&scrub.description)
        .bind(&scrub.city)
        .bind(user_id as i64)
        .execute(self.conn()?)
        .await
        .map_err(storage)?;
        if updated.rows_affected() == 0 {
            return Err(ModerationError::NotFound(format!("user {}", user_id)));
        }

        self.delete_by_user("DELETE FROM user_info_data WHERE user_id = ?", user_id)
            .await?;
        self.delete_by_user("DELETE FROM user_files WHERE user_id = ? AND area = 'icon'", user_id)
            .await?;
        Ok(())
    }

    async fn kill_sessions(&mut self, user_id: u64) -> Result<u64, ModerationError> {
        self.delete_by_user("DELETE FROM user_sessions WHERE user_id = ?", user_id)
            .await
    }

    async fn delete_votes_against(&mut self, user_id: u64) -> Result<u64, ModerationError> {
        self.delete_by_user("DELETE FROM spam_votes WHERE spammer_id = ?", user_id)
            .await
    }

    async fn commit(&mut self) -> Result<(), ModerationError> {
        match self.tx.take() {
            Some(tx) => tx.commit().await.map_err(storage),
            None => Err(ModerationError::StorageError(
                "redaction transaction already finished".to_string(),
            )),
        }
    }

    async fn rollback(&mut self) -> Result<(), ModerationError> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await.map_err(storage),
            None => Ok(()),
        }
    }
}

// ============================================================================
// VOTES & CANDIDATES
// ============================================================================

#[async_trait]
impl VoteStore for SqliteModerationStore {
    async fn has_vote(&self, voter: Voter, target: ReportTarget) -> Result<bool, ModerationError> {
        let row = sqlx::query(
            "SELECT 1 FROM spam_votes WHERE voter_id = ? AND target_kind = ? AND target_id = ?",
        )
        .bind(voter.id() as i64)
        .bind(target.kind().as_str())
        .bind(target.target_id() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        Ok(row.is_some())
    }

    async fn insert_vote(&self, vote: NewVote) -> Result<bool, ModerationError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO spam_votes
                (target_kind, target_id, spammer_id, voter_id, weighting, created)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(vote.target.kind().as_str())
        .bind(vote.target.target_id() as i64)
        .bind(vote.spammer_id as i64)
        .bind(vote.voter.id() as i64)
        .bind(vote.weighting as i64)
        .bind(vote.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected() == 1)
    }

    async fn votes_for_kind(&self, kind: TargetKind) -> Result<Vec<Vote>, ModerationError> {
        let rows = sqlx::query(
            r#"
            SELECT id, target_kind, target_id, spammer_id, voter_id, weighting, created
            FROM spam_votes WHERE target_kind = ? ORDER BY id
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(rows.iter().filter_map(vote_from_row).collect())
    }

    async fn delete_votes_for_target(&self, target: ReportTarget) -> Result<u64, ModerationError> {
        let result = sqlx::query("DELETE FROM spam_votes WHERE target_kind = ? AND target_id = ?")
            .bind(target.kind().as_str())
            .bind(target.target_id() as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn delete_votes_for_spammer(&self, spammer_id: u64) -> Result<u64, ModerationError> {
        let result = sqlx::query("DELETE FROM spam_votes WHERE spammer_id = ?")
            .bind(spammer_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn count_votes(&self) -> Result<u64, ModerationError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM spam_votes")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }
}

#[async_trait]
impl CandidateStore for SqliteModerationStore {
    async fn candidate_exists(
        &self,
        original_id: u64,
        is_spam: bool,
    ) -> Result<bool, ModerationError> {
        let row = sqlx::query("SELECT 1 FROM spam_candidates WHERE original_id = ? AND is_spam = ?")
            .bind(original_id as i64)
            .bind(is_spam)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.is_some())
    }

    async fn insert_candidate(&self, candidate: NewSpamCandidate) -> Result<u64, ModerationError> {
        let result = sqlx::query(
            r#"
            INSERT INTO spam_candidates
                (original_id, is_spam, user_ip, user_agent, comment_author,
                 comment_author_email, comment_content, created)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(candidate.original_id as i64)
        .bind(candidate.is_spam)
        .bind(&candidate.user_ip)
        .bind(&candidate.user_agent)
        .bind(&candidate.comment_author)
        .bind(&candidate.comment_author_email)
        .bind(&candidate.comment_content)
        .bind(candidate.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.last_insert_rowid() as u64)
    }

    async fn get_candidate(
        &self,
        candidate_id: u64,
    ) -> Result<Option<ExternalSpamCandidate>, ModerationError> {
        let row = sqlx::query("SELECT * FROM spam_candidates WHERE id = ?")
            .bind(candidate_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.as_ref().map(candidate_from_row))
    }

    async fn list_candidates(&self) -> Result<Vec<ExternalSpamCandidate>, ModerationError> {
        let rows = sqlx::query("SELECT * FROM spam_candidates ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        Ok(rows.iter().map(candidate_from_row).collect())
    }

    async fn delete_candidate(&self, candidate_id: u64) -> Result<bool, ModerationError> {
        let result = sqlx::query("DELETE FROM spam_candidates WHERE id = ?")
            .bind(candidate_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }
}
