//! `SQLite` message store.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use mailmirror_mime::Headers;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{FlagDelta, LocalId, MessageStore, Part, Query, StoredMessage, select_part};
use crate::{Error, Result};

/// Ids per `IN (...)` list, below `SQLite`'s bind limit.
const CHUNK: usize = 500;

/// Compare-and-set attempts per message before giving up.
const CAS_ATTEMPTS: usize = 16;

/// [`MessageStore`] backed by a `SQLite` file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `database_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                local_id INTEGER PRIMARY KEY AUTOINCREMENT,
                flags TEXT NOT NULL DEFAULT '[]',
                arrived TEXT NOT NULL,
                header BLOB NOT NULL,
                raw BLOB NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn flags(row: &SqliteRow) -> Result<BTreeSet<String>> {
        let json: String = row.get("flags");
        Ok(serde_json::from_str(&json)?)
    }

    fn arrived(row: &SqliteRow) -> Result<DateTime<Utc>> {
        let text: String = row.get("arrived");
        DateTime::parse_from_rfc3339(&text)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| Error::Malformed(format!("arrived {text:?}: {e}")))
    }

    /// Flags column of `ids` as stored, unparsed.
    async fn raw_flags(&self, ids: &[LocalId]) -> Result<Vec<(LocalId, String)>> {
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT local_id, flags FROM messages WHERE local_id IN (");
            {
                let mut separated = qb.separated(", ");
                for &id in chunk {
                    separated.push_bind(to_sql(id)?);
                }
            }
            qb.push(")");
            for row in qb.build().fetch_all(&self.pool).await? {
                out.push((from_sql(row.get("local_id"))?, row.get("flags")));
            }
        }
        Ok(out)
    }

    /// Applies `delta` to one message. The update only lands if the flags
    /// are still the ones it was computed from; otherwise it rereads and
    /// tries again.
    async fn update_flags(&self, id: LocalId, mut seen: String, delta: &FlagDelta) -> Result<()> {
        for _ in 0..CAS_ATTEMPTS {
            let current: BTreeSet<String> = serde_json::from_str(&seen)?;
            let next = delta.apply(&current);
            if next == current {
                return Ok(());
            }
            let done = sqlx::query("UPDATE messages SET flags = ? WHERE local_id = ? AND flags = ?")
                .bind(serde_json::to_string(&next)?)
                .bind(to_sql(id)?)
                .bind(&seen)
                .execute(&self.pool)
                .await?;
            if done.rows_affected() == 1 {
                return Ok(());
            }
            match self.raw_flags(&[id]).await?.pop() {
                Some((_, latest)) => seen = latest,
                // expunged meanwhile
                None => return Ok(()),
            }
        }
        Err(Error::Conflict(format!("flags of local id {id}")))
    }
}

/// Appends the SQL form of `query`. Header criteria are left to the caller
/// and pass here.
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, query: &Query) -> Result<()> {
    match query {
        Query::All | Query::Header(..) => {
            qb.push("1");
        }
        Query::Ids(ids) => {
            let ids = ids.iter().map(|&id| to_sql(id)).collect::<Result<Vec<_>>>()?;
            qb.push("local_id IN (SELECT value FROM json_each(");
            qb.push_bind(serde_json::to_string(&ids)?);
            qb.push("))");
        }
        Query::Flag(flag) => {
            qb.push("EXISTS (SELECT 1 FROM json_each(flags) WHERE value = ");
            qb.push_bind(flag.clone());
            qb.push(")");
        }
        Query::NotFlag(flag) => {
            qb.push("NOT EXISTS (SELECT 1 FROM json_each(flags) WHERE value = ");
            qb.push_bind(flag.clone());
            qb.push(")");
        }
        Query::And(all) => {
            qb.push("(1");
            for sub in all {
                qb.push(" AND ");
                push_filter(qb, sub)?;
            }
            qb.push(")");
        }
    }
    Ok(())
}

fn to_sql(id: LocalId) -> Result<i64> {
    i64::try_from(id).map_err(|_| Error::NotFound(format!("local id {id}")))
}

fn from_sql(id: i64) -> Result<LocalId> {
    LocalId::try_from(id).map_err(|_| Error::Malformed(format!("local id {id}")))
}

impl MessageStore for SqliteStore {
    async fn append(
        &self,
        flags: &BTreeSet<String>,
        arrived: DateTime<Utc>,
        raw: &[u8],
    ) -> Result<LocalId> {
        let result = sqlx::query(
            r"
            INSERT INTO messages (flags, arrived, header, raw)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(serde_json::to_string(flags)?)
        .bind(arrived.to_rfc3339())
        .bind(select_part(raw, Part::Header))
        .bind(raw)
        .execute(&self.pool)
        .await?;
        from_sql(result.last_insert_rowid())
    }

    async fn search(&self, query: &Query) -> Result<Vec<LocalId>> {
        let with_headers = query.needs_headers();
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(if with_headers {
            "SELECT local_id, flags, header FROM messages WHERE "
        } else {
            "SELECT local_id FROM messages WHERE "
        });
        push_filter(&mut qb, query)?;
        qb.push(" ORDER BY local_id");
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = from_sql(row.get("local_id"))?;
            if with_headers {
                let header: Vec<u8> = row.get("header");
                let headers = Headers::parse(&header, &mut mailmirror_mime::charset::Decoder::new());
                if !query.matches(id, &Self::flags(row)?, &headers) {
                    continue;
                }
            }
            ids.push(id);
        }
        Ok(ids)
    }

    async fn fetch(&self, ids: &[LocalId], part: Part) -> Result<Vec<StoredMessage>> {
        let column = match part {
            Part::Flags => "NULL AS raw",
            Part::Header => "header AS raw",
            Part::Full => "raw",
        };
        let wanted: Vec<LocalId> = ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut messages = Vec::with_capacity(wanted.len());
        for chunk in wanted.chunks(CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "SELECT local_id, flags, arrived, {column} FROM messages WHERE local_id IN ("
            ));
            {
                let mut separated = qb.separated(", ");
                for &id in chunk {
                    separated.push_bind(to_sql(id)?);
                }
            }
            qb.push(") ORDER BY local_id");
            for row in qb.build().fetch_all(&self.pool).await? {
                messages.push(StoredMessage {
                    id: from_sql(row.get("local_id"))?,
                    flags: Self::flags(&row)?,
                    arrived: Self::arrived(&row)?,
                    raw: row.get::<Option<Vec<u8>>, _>("raw").unwrap_or_default(),
                });
            }
        }
        Ok(messages)
    }

    async fn store(&self, ids: &[LocalId], delta: &FlagDelta) -> Result<()> {
        let wanted: BTreeSet<LocalId> = ids.iter().copied().collect();
        let wanted: Vec<LocalId> = wanted.into_iter().collect();
        for (id, seen) in self.raw_flags(&wanted).await? {
            self.update_flags(id, seen, delta).await?;
        }
        Ok(())
    }

    async fn expunge(&self, ids: &[LocalId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for &id in ids {
            sqlx::query("DELETE FROM messages WHERE local_id = ?")
                .bind(to_sql(id)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("value")))
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO metadata (key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn flags(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn append_fetch_and_flags() {
        let store = SqliteStore::in_memory().await.unwrap();
        let raw = b"Message-Id: <101@mlr>\r\nSubject: hi\r\n\r\nbody\r\n";
        let id = store
            .append(&flags(&["#inbox"]), Utc::now(), raw)
            .await
            .unwrap();

        let full = store.fetch(&[id], Part::Full).await.unwrap();
        assert_eq!(full[0].raw, raw.to_vec());
        let header = store.fetch(&[id], Part::Header).await.unwrap();
        assert_eq!(header[0].headers().get("Subject"), Some("hi"));
        let bare = store.fetch(&[id], Part::Flags).await.unwrap();
        assert!(bare[0].raw.is_empty());

        store
            .store(&[id], &FlagDelta::add(["\\Seen"]))
            .await
            .unwrap();
        let found = store.search(&Query::flag("\\Seen")).await.unwrap();
        assert_eq!(found, vec![id]);
        let found = store
            .search(&Query::header("Message-Id", "101@mlr"))
            .await
            .unwrap();
        assert_eq!(found, vec![id]);
    }

    #[tokio::test]
    async fn metadata_upsert() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.get_metadata("tags").await.unwrap(), None);
        store.set_metadata("tags", "{}").await.unwrap();
        store.set_metadata("tags", r#"{"Work":"Work"}"#).await.unwrap();
        assert_eq!(
            store.get_metadata("tags").await.unwrap().as_deref(),
            Some(r#"{"Work":"Work"}"#)
        );
    }

    #[tokio::test]
    async fn search_filters_in_sql() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store
            .append(&flags(&["#inbox", "\\Seen"]), Utc::now(), b"Subject: one\r\n\r\n")
            .await
            .unwrap();
        let b = store
            .append(&flags(&["#inbox"]), Utc::now(), b"Subject: two\r\n\r\n")
            .await
            .unwrap();
        let c = store
            .append(&flags(&["#sent"]), Utc::now(), b"Subject: two again\r\n\r\n")
            .await
            .unwrap();

        let unread = Query::And(vec![Query::flag("#inbox"), Query::NotFlag("\\Seen".into())]);
        assert_eq!(store.search(&unread).await.unwrap(), vec![b]);
        assert_eq!(
            store.search(&Query::Ids(vec![c, a, 99])).await.unwrap(),
            vec![a, c]
        );
        assert!(store.search(&Query::Ids(Vec::new())).await.unwrap().is_empty());
        let two = Query::And(vec![Query::header("Subject", "two"), Query::NotFlag("#inbox".into())]);
        assert_eq!(store.search(&two).await.unwrap(), vec![c]);
        assert_eq!(store.search(&Query::All).await.unwrap(), vec![a, b, c]);
    }

    #[tokio::test]
    async fn concurrent_flag_updates_are_not_lost() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let id = store
            .append(&BTreeSet::new(), Utc::now(), b"A: 1\r\n\r\n")
            .await
            .unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for n in 0..20 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                store
                    .store(&[id], &FlagDelta::add([format!("tag{n}")]))
                    .await
                    .unwrap();
            });
        }
        while let Some(done) = tasks.join_next().await {
            done.unwrap();
        }

        let stored = store.fetch(&[id], Part::Flags).await.unwrap();
        assert_eq!(stored[0].flags.len(), 20);
    }

    #[tokio::test]
    async fn stale_update_rereads_before_writing() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .append(&flags(&["a"]), Utc::now(), b"A: 1\r\n\r\n")
            .await
            .unwrap();
        // someone else wrote after "a" was read
        store.store(&[id], &FlagDelta::add(["b"])).await.unwrap();

        store
            .update_flags(id, r#"["a"]"#.to_string(), &FlagDelta::add(["c"]))
            .await
            .unwrap();

        let stored = store.fetch(&[id], Part::Flags).await.unwrap();
        assert_eq!(stored[0].flags, flags(&["a", "b", "c"]));
    }

    #[tokio::test]
    async fn expunged_ids_are_not_reused() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store
            .append(&BTreeSet::new(), Utc::now(), b"A: 1\r\n\r\n")
            .await
            .unwrap();
        store.expunge(&[a]).await.unwrap();
        let b = store
            .append(&BTreeSet::new(), Utc::now(), b"A: 2\r\n\r\n")
            .await
            .unwrap();
        assert!(b > a);
        assert!(store.fetch(&[a], Part::Flags).await.unwrap().is_empty());
    }
}
