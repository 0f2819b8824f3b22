use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::path::PathBuf;
use tokio_rusqlite::Connection;

use crate::models::{FileFilter, FileOwner, FileRecord, User, UserCredentials};
use crate::streaming::{BlobRecord, BlobRecords};

const FILE_COLUMNS: &str = "f.id, f.filename, f.original_name, f.path, f.mimetype, f.size,
    f.is_public, f.description, f.tags, f.created_at, f.updated_at,
    u.id, u.username, u.email";

#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

fn sqlite(err: tokio_rusqlite::Error) -> anyhow::Error {
    anyhow!("sqlite: {err}")
}

fn to_millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        department: row.get(3)?,
        job_title: row.get(4)?,
        created_at: from_millis(5, row.get(5)?)?,
    })
}

fn file_from_row(row: &Row) -> rusqlite::Result<FileRecord> {
    let path: String = row.get(3)?;
    let size: i64 = row.get(5)?;
    let tags: String = row.get(8)?;
    Ok(FileRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        original_name: row.get(2)?,
        path: PathBuf::from(path),
        mimetype: row.get(4)?,
        size: u64::try_from(size).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(5, size))?,
        is_public: row.get(6)?,
        description: row.get(7)?,
        tags: serde_json::from_str(&tags).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?,
        created_at: from_millis(9, row.get(9)?)?,
        updated_at: from_millis(10, row.get(10)?)?,
        owner: FileOwner {
            id: row.get(11)?,
            username: row.get(12)?,
            email: row.get(13)?,
        },
    })
}

impl Database {
    pub async fn open(path: &str) -> Result<Self> {
        let opened = if path == ":memory:" {
            Connection::open_in_memory().await
        } else {
            Connection::open(path).await
        };
        let conn = opened.map_err(sqlite)?;
        let db = Database { conn };
        db.create_tables().await?;
        Ok(db)
    }

    pub async fn create_tables(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    r#"PRAGMA foreign_keys = ON;
                    CREATE TABLE IF NOT EXISTS users (
                        id TEXT NOT NULL PRIMARY KEY,
                        username TEXT NOT NULL UNIQUE,
                        email TEXT NOT NULL UNIQUE,
                        password_hash TEXT NOT NULL,
                        department TEXT NOT NULL DEFAULT '',
                        job_title TEXT NOT NULL DEFAULT '',
                        created_at INTEGER NOT NULL
                    );
                    CREATE TABLE IF NOT EXISTS files (
                        id TEXT NOT NULL PRIMARY KEY,
                        filename TEXT NOT NULL,
                        original_name TEXT NOT NULL,
                        path TEXT NOT NULL,
                        mimetype TEXT NOT NULL,
                        size INTEGER NOT NULL,
                        owner_id TEXT NOT NULL REFERENCES users(id),
                        is_public INTEGER NOT NULL DEFAULT 0,
                        description TEXT NOT NULL DEFAULT '',
                        tags TEXT NOT NULL DEFAULT '[]',
                        created_at INTEGER NOT NULL,
                        updated_at INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS files_owner_created ON files (owner_id, created_at DESC);
                    CREATE INDEX IF NOT EXISTS files_public_created ON files (is_public, created_at DESC);"#,
                )?;
                Ok(())
            })
            .await
            .map_err(sqlite)
    }

    /// Inserts the user unless the email or username is taken; returns whether it was inserted.
    pub async fn insert_user(&self, user: &User, password_hash: &str) -> Result<bool> {
        let user = user.clone();
        let password_hash = password_hash.to_string();
        self.conn
            .call(move |conn| {
                let taken: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 OR username = ?2)",
                    params![user.email, user.username],
                    |row| row.get(0),
                )?;
                if taken {
                    return Ok(false);
                }
                conn.execute(
                    r#"INSERT INTO users
                        (id, username, email, password_hash, department, job_title, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                    params![
                        user.id,
                        user.username,
                        user.email,
                        password_hash,
                        user.department,
                        user.job_title,
                        to_millis(&user.created_at),
                    ],
                )?;
                Ok(true)
            })
            .await
            .map_err(sqlite)
    }

    pub async fn find_user(&self, id: &str) -> Result<Option<User>> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        r#"SELECT id, username, email, department, job_title, created_at
                        FROM users WHERE id = ?1"#,
                        params![id],
                        user_from_row,
                    )
                    .optional()?)
            })
            .await
            .map_err(sqlite)
    }

    pub async fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>> {
        let email = email.to_string();
        self.conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        r#"SELECT id, username, email, department, job_title, created_at, password_hash
                        FROM users WHERE email = ?1"#,
                        params![email],
                        |row| {
                            Ok(UserCredentials {
                                user: user_from_row(row)?,
                                password_hash: row.get(6)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await
            .map_err(sqlite)
    }

    pub async fn insert_file(&self, file: &FileRecord) -> Result<()> {
        let file = file.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO files
                        (id, filename, original_name, path, mimetype, size, owner_id,
                         is_public, description, tags, created_at, updated_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
                    params![
                        file.id,
                        file.filename,
                        file.original_name,
                        file.path.to_string_lossy(),
                        file.mimetype,
                        i64::try_from(file.size).unwrap_or(i64::MAX),
                        file.owner.id,
                        file.is_public,
                        file.description,
                        serde_json::to_string(&file.tags).unwrap_or_else(|_| "[]".to_string()),
                        to_millis(&file.created_at),
                        to_millis(&file.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(sqlite)
    }

    pub async fn find_file(&self, id: &str) -> Result<Option<FileRecord>> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {FILE_COLUMNS} FROM files f JOIN users u ON u.id = f.owner_id WHERE f.id = ?1"
                );
                Ok(conn.query_row(&sql, params![id], file_from_row).optional()?)
            })
            .await
            .map_err(sqlite)
    }

    /// Files the viewer may see under `filter`, newest first.
    pub async fn list_files(&self, viewer_id: &str, filter: FileFilter) -> Result<Vec<FileRecord>> {
        let viewer_id = viewer_id.to_string();
        self.conn
            .call(move |conn| {
                let condition = match filter {
                    FileFilter::Mine => "f.owner_id = ?1",
                    FileFilter::Public => "f.is_public = 1",
                    FileFilter::Visible => "(f.owner_id = ?1 OR f.is_public = 1)",
                };
                let sql = format!(
                    "SELECT {FILE_COLUMNS} FROM files f JOIN users u ON u.id = f.owner_id
                    WHERE {condition} ORDER BY f.created_at DESC, f.rowid DESC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = match filter {
                    FileFilter::Public => stmt.query_map([], file_from_row)?,
                    _ => stmt.query_map(params![viewer_id], file_from_row)?,
                };
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(sqlite)
    }

    pub async fn update_file(&self, file: &FileRecord) -> Result<()> {
        let file = file.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE files
                        SET is_public = ?2, description = ?3, tags = ?4, updated_at = ?5
                        WHERE id = ?1"#,
                    params![
                        file.id,
                        file.is_public,
                        file.description,
                        serde_json::to_string(&file.tags).unwrap_or_else(|_| "[]".to_string()),
                        to_millis(&file.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(sqlite)
    }

    pub async fn delete_file(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.conn
            .call(move |conn| Ok(conn.execute("DELETE FROM files WHERE id = ?1", params![id])? > 0))
            .await
            .map_err(sqlite)
    }
}

#[async_trait]
impl BlobRecords for Database {
    async fn blob_record(&self, id: &str) -> Result<Option<BlobRecord>> {
        Ok(self.find_file(id).await?.map(BlobRecord::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(name: &str) -> User {
        User {
            id: crate::crypto::random_id(),
            username: name.to_string(),
            email: format!("{name}@techcorp.com"),
            department: String::new(),
            job_title: String::new(),
            created_at: Utc::now(),
        }
    }

    fn file(owner: &User, is_public: bool, created_at: DateTime<Utc>) -> FileRecord {
        FileRecord {
            id: crate::crypto::random_id(),
            filename: "stored.mp4".to_string(),
            original_name: "clip.mp4".to_string(),
            path: PathBuf::from("uploads/stored.mp4"),
            mimetype: "video/mp4".to_string(),
            size: 42,
            owner: FileOwner {
                id: owner.id.clone(),
                username: owner.username.clone(),
                email: owner.email.clone(),
            },
            is_public,
            description: String::new(),
            tags: vec!["demo".to_string()],
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn users_are_unique_by_email_and_username() {
        let db = Database::open(":memory:").await.unwrap();
        let alice = user("alice");
        assert!(db.insert_user(&alice, "hash").await.unwrap());

        let mut same_email = user("alice2");
        same_email.email = alice.email.clone();
        assert!(!db.insert_user(&same_email, "hash").await.unwrap());
        assert!(!db.insert_user(&user("alice"), "hash").await.unwrap());

        let creds = db.find_credentials(&alice.email).await.unwrap().unwrap();
        assert_eq!(creds.password_hash, "hash");
        assert_eq!(creds.user.id, alice.id);
        assert_eq!(db.find_user(&alice.id).await.unwrap().unwrap().username, "alice");
        assert!(db.find_user("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_respects_filter_and_order() {
        let db = Database::open(":memory:").await.unwrap();
        let alice = user("alice");
        let bob = user("bob");
        db.insert_user(&alice, "h").await.unwrap();
        db.insert_user(&bob, "h").await.unwrap();

        let now = Utc::now();
        let alice_private = file(&alice, false, now - Duration::seconds(30));
        let bob_public = file(&bob, true, now - Duration::seconds(20));
        let bob_private = file(&bob, false, now - Duration::seconds(10));
        for f in [&alice_private, &bob_public, &bob_private] {
            db.insert_file(f).await.unwrap();
        }

        let visible = db.list_files(&alice.id, FileFilter::Visible).await.unwrap();
        let ids: Vec<_> = visible.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec![bob_public.id.as_str(), alice_private.id.as_str()]);

        let mine = db.list_files(&alice.id, FileFilter::Mine).await.unwrap();
        assert_eq!(mine.len(), 1);
        let public = db.list_files(&alice.id, FileFilter::Public).await.unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].owner.username, "bob");
    }

    #[tokio::test]
    async fn file_update_and_delete() {
        let db = Database::open(":memory:").await.unwrap();
        let alice = user("alice");
        db.insert_user(&alice, "h").await.unwrap();
        let mut record = file(&alice, false, Utc::now());
        db.insert_file(&record).await.unwrap();

        record.is_public = true;
        record.description = "updated".to_string();
        record.tags = vec!["x".to_string(), "y".to_string()];
        db.update_file(&record).await.unwrap();

        let stored = db.find_file(&record.id).await.unwrap().unwrap();
        assert!(stored.is_public);
        assert_eq!(stored.description, "updated");
        assert_eq!(stored.tags, vec!["x", "y"]);
        assert_eq!(stored.path, PathBuf::from("uploads/stored.mp4"));

        let blob = db.blob_record(&record.id).await.unwrap().unwrap();
        assert_eq!(blob.owner_id, alice.id);
        assert_eq!(blob.size_bytes, 42);

        assert!(db.delete_file(&record.id).await.unwrap());
        assert!(!db.delete_file(&record.id).await.unwrap());
        assert!(db.find_file(&record.id).await.unwrap().is_none());
    }
}
