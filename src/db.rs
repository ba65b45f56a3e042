use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Thread-safe database handle. rusqlite::Connection is !Sync,
/// so we wrap Db in a Mutex for cross-thread access.
pub type SharedDb = Arc<Mutex<Db>>;

// ---------------------------------------------------------------------------
// Post model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PostMediaType {
    Image,
    Video,
}

impl PostMediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "IMAGE",
            Self::Video => "VIDEO",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "IMAGE" => Some(Self::Image),
            "VIDEO" => Some(Self::Video),
            _ => None,
        }
    }
}

/// One pinned image upload: a content hash plus the file names under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpfsImage {
    pub hash: String,
    #[serde(default)]
    pub file_names: Vec<String>,
}

/// A video location. Rows written by different backends carry different keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

impl VideoSource {
    pub fn from_url(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.hash.is_none() && self.url.is_none() && self.src.is_none()
    }
}

/// `video_data` is stored either as a single object or as an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VideoData {
    Many(Vec<VideoSource>),
    One(VideoSource),
}

impl VideoData {
    pub fn sources(&self) -> Vec<&VideoSource> {
        match self {
            Self::Many(v) => v.iter().collect(),
            Self::One(s) => vec![s],
        }
    }

    fn is_empty(&self) -> bool {
        self.sources().iter().all(|s| s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRow {
    pub id: String,
    pub author: String,
    pub media_type: PostMediaType,
    pub prompt: Option<String>,
    pub ipfs_images: Option<Vec<IpfsImage>>,
    pub video_data: Option<VideoData>,
    pub is_private: bool,
    pub is_draft: bool,
    pub job_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl PostRow {
    /// A post can be shown once it has images or video attached.
    pub fn is_displayable(&self) -> bool {
        has_media(self.ipfs_images.as_deref(), self.video_data.as_ref())
    }
}

fn has_media(images: Option<&[IpfsImage]>, video: Option<&VideoData>) -> bool {
    images.is_some_and(|v| !v.is_empty()) || video.is_some_and(|v| !v.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostStats {
    pub total: i64,
    pub images: i64,
    pub videos: i64,
    pub pending: i64,
}

// ---------------------------------------------------------------------------
// Database wrapper
// ---------------------------------------------------------------------------

const POST_COLUMNS: &str = "id, author, media_type, prompt, ipfs_images, video_data, is_private, is_draft, job_id, created_at, updated_at";

pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open SQLite database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Db { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        let db = Db { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn into_shared(self) -> SharedDb {
        Arc::new(Mutex::new(self))
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS posts (
                id          TEXT PRIMARY KEY,
                author      TEXT NOT NULL,
                media_type  TEXT NOT NULL,
                prompt      TEXT,
                ipfs_images TEXT,
                video_data  TEXT,
                is_private  INTEGER NOT NULL DEFAULT 0,
                is_draft    INTEGER NOT NULL DEFAULT 0,
                job_id      TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_posts_author_created ON posts(author, created_at);
            CREATE INDEX IF NOT EXISTS idx_posts_job_id ON posts(job_id);",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    pub fn insert_post(&self, post: &PostRow) -> Result<()> {
        let ipfs_images = post
            .ipfs_images
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let video_data = post
            .video_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            &format!("INSERT INTO posts ({POST_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
            params![
                post.id,
                post.author,
                post.media_type.as_str(),
                post.prompt,
                ipfs_images,
                video_data,
                post.is_private,
                post.is_draft,
                post.job_id,
                post.created_at,
                post.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>> {
        self.conn
            .query_row(
                &format!("SELECT {POST_COLUMNS} FROM posts WHERE id=?1"),
                params![id],
                row_to_post,
            )
            .optional()
            .context("failed to load post")
    }

    /// Identifier of the author's newest post, the signal the image watcher polls.
    pub fn latest_post_id(&self, author: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT id FROM posts WHERE author=?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![author],
                |r| r.get(0),
            )
            .optional()
            .context("failed to query latest post")
    }

    pub fn list_posts_by_author(
        &self,
        author: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PostRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE author=?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(params![author, limit as i64, offset as i64], row_to_post)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to collect posts")
    }

    /// Attach finished video media to a post. Returns false if no row matched.
    pub fn set_video_data(&self, post_id: &str, video: &VideoData) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE posts SET video_data=?2, updated_at=?3 WHERE id=?1",
            params![post_id, serde_json::to_string(video)?, now],
        )?;
        Ok(changed > 0)
    }

    /// Same as [`Db::set_video_data`], matching on the generation job instead.
    pub fn set_video_data_for_job(&self, job_id: &str, video: &VideoData) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE posts SET video_data=?2, updated_at=?3 WHERE job_id=?1",
            params![job_id, serde_json::to_string(video)?, now],
        )?;
        Ok(changed > 0)
    }

    pub fn get_post_stats(&self, author: &str) -> Result<PostStats> {
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, params![author], |r| r.get(0))?)
        };
        Ok(PostStats {
            total: count("SELECT COUNT(*) FROM posts WHERE author=?1")?,
            images: count("SELECT COUNT(*) FROM posts WHERE author=?1 AND media_type='IMAGE'")?,
            videos: count("SELECT COUNT(*) FROM posts WHERE author=?1 AND media_type='VIDEO'")?,
            pending: self.count_pending(author)?,
        })
    }

    /// Posts whose media columns hold nothing displayable; `[]` and `{}`
    /// count as empty, same as [`PostRow::is_displayable`].
    fn count_pending(&self, author: &str) -> Result<i64> {
        let mut stmt = self
            .conn
            .prepare("SELECT ipfs_images, video_data FROM posts WHERE author=?1")?;
        let rows = stmt.query_map(params![author], |row| {
            let images: Option<Vec<IpfsImage>> = json_column(0, row.get(0)?)?;
            let video: Option<VideoData> = json_column(1, row.get(1)?)?;
            Ok(!has_media(images.as_deref(), video.as_ref()))
        })?;
        let mut pending = 0;
        for row in rows {
            if row.context("failed to read post media")? {
                pending += 1;
            }
        }
        Ok(pending)
    }
}

fn json_column<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<T>> {
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn row_to_post(row: &rusqlite::Row) -> rusqlite::Result<PostRow> {
    let media_type: String = row.get(2)?;
    let media_type = PostMediaType::parse(&media_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown media_type {media_type:?}").into(),
        )
    })?;
    Ok(PostRow {
        id: row.get(0)?,
        author: row.get(1)?,
        media_type,
        prompt: row.get(3)?,
        ipfs_images: json_column(4, row.get(4)?)?,
        video_data: json_column(5, row.get(5)?)?,
        is_private: row.get(6)?,
        is_draft: row.get(7)?,
        job_id: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn post(id: &str, author: &str, created_at: &str) -> PostRow {
        PostRow {
            id: id.to_string(),
            author: author.to_string(),
            media_type: PostMediaType::Image,
            prompt: Some("a red fox in snow".into()),
            ipfs_images: Some(vec![IpfsImage {
                hash: "Qmabc".into(),
                file_names: vec!["0.png".into()],
            }]),
            video_data: None,
            is_private: false,
            is_draft: false,
            job_id: None,
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let db = Db::open_in_memory().unwrap();
        db.insert_post(&post("p1", "alice", "2026-01-01T00:00:00Z")).unwrap();
        let got = db.get_post("p1").unwrap().unwrap();
        assert_eq!(got.author, "alice");
        assert_eq!(got.media_type, PostMediaType::Image);
        assert_eq!(got.ipfs_images.unwrap()[0].file_names, vec!["0.png"]);
        assert!(db.get_post("missing").unwrap().is_none());
    }

    #[test]
    fn latest_post_is_per_author_and_newest() {
        let db = Db::open_in_memory().unwrap();
        assert!(db.latest_post_id("alice").unwrap().is_none());
        db.insert_post(&post("p1", "alice", "2026-01-01T00:00:00Z")).unwrap();
        db.insert_post(&post("p2", "alice", "2026-01-02T00:00:00Z")).unwrap();
        db.insert_post(&post("p3", "bob", "2026-01-03T00:00:00Z")).unwrap();
        assert_eq!(db.latest_post_id("alice").unwrap().as_deref(), Some("p2"));
        assert_eq!(db.latest_post_id("bob").unwrap().as_deref(), Some("p3"));
    }

    #[test]
    fn list_posts_paginates_newest_first() {
        let db = Db::open_in_memory().unwrap();
        for i in 0..5 {
            db.insert_post(&post(&format!("p{i}"), "alice", &format!("2026-01-0{}T00:00:00Z", i + 1)))
                .unwrap();
        }
        let page = db.list_posts_by_author("alice", 2, 1).unwrap();
        let ids: Vec<_> = page.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p3", "p2"]);
    }

    #[test]
    fn set_video_data_by_post_and_job() {
        let db = Db::open_in_memory().unwrap();
        let mut row = post("v1", "alice", "2026-01-01T00:00:00Z");
        row.media_type = PostMediaType::Video;
        row.ipfs_images = None;
        row.job_id = Some("job-1".into());
        db.insert_post(&row).unwrap();
        assert!(!db.get_post("v1").unwrap().unwrap().is_displayable());

        let video = VideoData::One(VideoSource::from_url("https://cdn.example/v.mp4"));
        assert!(db.set_video_data_for_job("job-1", &video).unwrap());
        let got = db.get_post("v1").unwrap().unwrap();
        assert!(got.is_displayable());
        assert_eq!(got.video_data, Some(video.clone()));

        assert!(!db.set_video_data("nope", &video).unwrap());
    }

    #[test]
    fn video_data_accepts_array_and_object() {
        let many: VideoData = serde_json::from_str(r#"[{"hash":"Qm1"},{"src":"https://x/y.mp4"}]"#).unwrap();
        assert_eq!(many.sources().len(), 2);
        let one: VideoData = serde_json::from_str(r#"{"url":"https://x/y.mp4"}"#).unwrap();
        assert_eq!(one.sources()[0].url.as_deref(), Some("https://x/y.mp4"));
    }

    #[test]
    fn empty_media_is_not_displayable() {
        let mut row = post("p", "a", "t");
        row.ipfs_images = Some(vec![]);
        assert!(!row.is_displayable());
        row.video_data = Some(VideoData::One(VideoSource::default()));
        assert!(!row.is_displayable());
    }

    #[test]
    fn stats_count_by_kind() {
        let db = Db::open_in_memory().unwrap();
        db.insert_post(&post("p1", "alice", "2026-01-01T00:00:00Z")).unwrap();
        let mut v = post("v1", "alice", "2026-01-02T00:00:00Z");
        v.media_type = PostMediaType::Video;
        v.ipfs_images = None;
        db.insert_post(&v).unwrap();
        let stats = db.get_post_stats("alice").unwrap();
        assert_eq!((stats.total, stats.images, stats.videos, stats.pending), (2, 1, 1, 1));
    }

    #[test]
    fn pending_stats_agree_with_displayable() {
        let db = Db::open_in_memory().unwrap();
        let mut empty_images = post("e1", "alice", "2026-01-01T00:00:00Z");
        empty_images.ipfs_images = Some(vec![]);
        let mut empty_video = post("e2", "alice", "2026-01-02T00:00:00Z");
        empty_video.ipfs_images = None;
        empty_video.video_data = Some(VideoData::Many(vec![VideoSource::default()]));
        let ready = post("r1", "alice", "2026-01-03T00:00:00Z");
        for row in [&empty_images, &empty_video, &ready] {
            db.insert_post(row).unwrap();
        }

        let expected = db
            .list_posts_by_author("alice", 10, 0)
            .unwrap()
            .iter()
            .filter(|p| !p.is_displayable())
            .count() as i64;
        assert_eq!(expected, 2);
        assert_eq!(db.get_post_stats("alice").unwrap().pending, expected);
    }
}
