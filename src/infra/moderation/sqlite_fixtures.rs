// Seed helpers for tests that run against a real SQLite store.

use super::sqlite_moderation_store::{forum_kind_to_str, role_to_str, state_to_str};
use super::SqliteModerationStore;
use crate::core::moderation::{AccountState, ForumKind, Role, User};
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

/// A user with every profile field filled in, first seen a year ago.
pub fn test_user(id: u64, role: Role) -> User {
    User {
        id,
        username: format!("user{}", id),
        email: format!("user{}@example.org", id),
        first_name: "User".to_string(),
        last_name: id.to_string(),
        state: AccountState::Active,
        role,
        first_access: Some(Utc::now() - Duration::days(365)),
        description: "Buy cheap watches".to_string(),
        url: "http://watches.example.com".to_string(),
        icq: "123456".to_string(),
        skype: "watches.sales".to_string(),
        yahoo: "watches".to_string(),
        aim: "watches".to_string(),
        msn: "watches@example.com".to_string(),
        phone1: "555-0100".to_string(),
        phone2: "555-0101".to_string(),
        department: "Sales".to_string(),
        institution: "Watches Inc".to_string(),
        city: "Perth".to_string(),
        picture: 42,
    }
}

impl SqliteModerationStore {
    pub async fn insert_user(&self, user: &User) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, first_name, last_name, state, role,
                first_access, description, url, icq, skype, yahoo, aim, msn, phone1, phone2,
                department, institution, city, picture)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id as i64)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(state_to_str(user.state))
        .bind(role_to_str(user.role))
        .bind(user.first_access.map(|at| at.timestamp()))
        .bind(&user.description)
        .bind(&user.url)
        .bind(&user.icq)
        .bind(&user.skype)
        .bind(&user.yahoo)
        .bind(&user.aim)
        .bind(&user.msn)
        .bind(&user.phone1)
        .bind(&user.phone2)
        .bind(&user.department)
        .bind(&user.institution)
        .bind(&user.city)
        .bind(user.picture as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn insert_forum(&self, id: u64, kind: ForumKind) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO forums (id, name, kind) VALUES (?, ?, ?)")
            .bind(id as i64)
            .bind(format!("Forum {}", id))
            .bind(forum_kind_to_str(kind))
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Discussion `discussion_id` whose first post is `post_id`.
    pub async fn start_discussion(
        &self,
        forum_id: u64,
        discussion_id: u64,
        post_id: u64,
        user_id: u64,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO discussions (id, forum_id, name, first_post_id, user_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(discussion_id as i64)
        .bind(forum_id as i64)
        .bind(format!("Discussion {}", discussion_id))
        .bind(post_id as i64)
        .bind(user_id as i64)
        .execute(self.pool())
        .await?;
        self.insert_post(post_id, discussion_id, None, user_id, Utc::now())
            .await
    }

    pub async fn insert_post(
        &self,
        id: u64,
        discussion_id: u64,
        parent_id: Option<u64>,
        user_id: u64,
        created: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO forum_posts (id, discussion_id, parent_id, user_id, subject, message, created)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id as i64)
        .bind(discussion_id as i64)
        .bind(parent_id.map(|p| p as i64))
        .bind(user_id as i64)
        .bind(format!("Post {}", id))
        .bind("Visit http://watches.example.com today")
        .bind(created.timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn insert_comment(&self, id: u64, user_id: u64, component: &str) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO comments (id, user_id, component, item_id, content, created) VALUES (?, ?, ?, 1, ?, ?)",
        )
        .bind(id as i64)
        .bind(user_id as i64)
        .bind(component)
        .bind("Nice post, see my site")
        .bind(Utc::now().timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// A message plus its delivery record.
    pub async fn insert_message(&self, from: u64, to: u64, is_read: bool) -> sqlx::Result<()> {
        let result = sqlx::query(
            "INSERT INTO messages (user_id_from, user_id_to, body, is_read, created) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(from as i64)
        .bind(to as i64)
        .bind("hello")
        .bind(is_read)
        .bind(Utc::now().timestamp())
        .execute(self.pool())
        .await?;
        sqlx::query("INSERT INTO message_deliveries (message_id, status) VALUES (?, 'sent')")
            .bind(result.last_insert_rowid())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn insert_tag(&self, user_id: u64, tag: &str, item_id: u64) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO tag_instances (user_id, tag_name, item_id) VALUES (?, ?, ?)")
            .bind(user_id as i64)
            .bind(tag)
            .bind(item_id as i64)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn insert_session(&self, user_id: u64) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO user_sessions (user_id, sid) VALUES (?, ?)")
            .bind(user_id as i64)
            .bind(format!("sid-{}", user_id))
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn insert_custom_field(&self, user_id: u64, value: &str) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO user_info_data (user_id, field_name, data) VALUES (?, 'website', ?)")
            .bind(user_id as i64)
            .bind(value)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn insert_user_file(&self, user_id: u64, area: &str) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO user_files (user_id, area, filename) VALUES (?, ?, 'f1.png')")
            .bind(user_id as i64)
            .bind(area)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn row_count(&self, table: &str) -> i64 {
        sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", table))
            .fetch_one(self.pool())
            .await
            .map(|row| row.get::<i64, _>("n"))
            .unwrap_or(-1)
    }
}
