//! PostgreSQL implementation of [`Connection`].
//!
//! Layout:
//! - namespace      -> schema
//! - table          -> `(id text primary key, doc jsonb not null)`
//! - index `name`   -> expression index `hzidx_<hash>` over `(doc -> 'f')...`,
//!   tagged with `COMMENT ON INDEX ... IS 'hz-index:<name>'`
//!
//! Postgres index names are unique per schema and capped at 63 bytes, so the
//! physical name is derived from (table, name) and the logical name lives in
//! the comment. Indexes without the tag (primary keys, hand-made indexes) are
//! invisible to `index_list`.
//!
//! Schema and table names are used as-is and must fit in
//! [`MAX_IDENTIFIER_BYTES`]; longer names are refused instead of truncated.
//!
//! A connection owns one database session. Concurrent calls queue on it
//! without a deadline.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::Connection as _;
use sqlx::{Postgres, Transaction};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::debug;

use crate::conn::{
    document_id, merge_documents, Change, Conflict, Connection, Readiness, WriteOptions,
    WriteSummary,
};
use crate::error::{DbError, DbResult};
use crate::{internal_namespace, COLLECTIONS_TABLE, GROUPS_TABLE};

/// Longest schema, table or index name Postgres stores without truncation.
pub const MAX_IDENTIFIER_BYTES: usize = 63;

const INDEX_TAG: &str = "hz-index:";
const READY_POLL: Duration = Duration::from_millis(100);

type Session = sqlx::postgres::PgConnection;

#[derive(Debug)]
pub struct PgConnection {
    session: Mutex<Option<Session>>,
}

impl PgConnection {
    pub fn from_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }

    async fn session(&self) -> DbResult<MappedMutexGuard<'_, Session>> {
        MutexGuard::try_map(self.session.lock().await, Option::as_mut).map_err(|_| DbError::Closed)
    }
}

async fn table_exists(s: &mut Session, namespace: &str, table: &str) -> DbResult<bool> {
    let (exists,): (bool,) = sqlx::query_as("select to_regclass($1) is not null")
        .bind(qualified(namespace, table)?)
        .fetch_one(&mut *s)
        .await
        .map_err(DbError::sqlx("table exists check"))?;
    Ok(exists)
}

async fn has_privilege(
    s: &mut Session,
    namespace: &str,
    table: &str,
    privilege: &str,
) -> DbResult<bool> {
    let (ok,): (bool,) = sqlx::query_as("select has_table_privilege($1, $2)")
        .bind(qualified(namespace, table)?)
        .bind(privilege)
        .fetch_one(&mut *s)
        .await
        .map_err(DbError::sqlx("table privilege check"))?;
    Ok(ok)
}

async fn create_record_table(s: &mut Session, namespace: &str, table: &str) -> DbResult<()> {
    let sql = format!(
        "create table if not exists {} (id text primary key, doc jsonb not null)",
        qualified(namespace, table)?
    );
    sqlx::query(&sql)
        .execute(&mut *s)
        .await
        .map_err(DbError::sqlx("create table"))?;
    Ok(())
}

#[async_trait]
impl Connection for PgConnection {
    async fn init_metadata(&self, project: &str) -> DbResult<bool> {
        let internal = internal_namespace(project);
        let mut s = self.session().await?;

        let existed = table_exists(&mut s, &internal, COLLECTIONS_TABLE).await?
            && table_exists(&mut s, &internal, GROUPS_TABLE).await?;

        for ns in [project, internal.as_str()] {
            let sql = format!("create schema if not exists {}", ident(ns)?);
            sqlx::query(&sql)
                .execute(&mut *s)
                .await
                .map_err(DbError::sqlx("create schema"))?;
        }
        create_record_table(&mut s, &internal, COLLECTIONS_TABLE).await?;
        create_record_table(&mut s, &internal, GROUPS_TABLE).await?;

        debug!(project, created = !existed, "metadata tables ensured");
        Ok(!existed)
    }

    async fn wait_ready(
        &self,
        namespace: &str,
        table: &str,
        readiness: Readiness,
    ) -> DbResult<()> {
        let privilege = match readiness {
            Readiness::Reads => "SELECT",
            Readiness::Writes => "INSERT",
        };
        loop {
            {
                let mut s = self.session().await?;
                if table_exists(&mut s, namespace, table).await?
                    && has_privilege(&mut s, namespace, table, privilege).await?
                {
                    return Ok(());
                }
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    async fn table_create(&self, namespace: &str, table: &str) -> DbResult<bool> {
        let mut s = self.session().await?;
        if table_exists(&mut s, namespace, table).await? {
            return Ok(false);
        }
        create_record_table(&mut s, namespace, table).await?;
        Ok(true)
    }

    async fn table_drop(&self, namespace: &str, table: &str) -> DbResult<bool> {
        let mut s = self.session().await?;
        if !table_exists(&mut s, namespace, table).await? {
            return Ok(false);
        }
        let sql = format!("drop table if exists {}", qualified(namespace, table)?);
        sqlx::query(&sql)
            .execute(&mut *s)
            .await
            .map_err(DbError::sqlx("drop table"))?;
        Ok(true)
    }

    async fn index_list(&self, namespace: &str, table: &str) -> DbResult<Vec<String>> {
        let mut s = self.session().await?;
        if !table_exists(&mut s, namespace, table).await? {
            return Err(DbError::NoSuchTable {
                namespace: namespace.to_string(),
                table: table.to_string(),
            });
        }

        let rows: Vec<(Option<String>,)> = sqlx::query_as(
            r#"
            select obj_description(i.indexrelid, 'pg_class')
            from pg_index i
            join pg_class t on t.oid = i.indrelid
            join pg_namespace n on n.oid = t.relnamespace
            where n.nspname = $1
              and t.relname = $2
              and not i.indisprimary
            "#,
        )
        .bind(namespace)
        .bind(table)
        .fetch_all(&mut *s)
        .await
        .map_err(DbError::sqlx("index list"))?;

        let mut names: Vec<String> = rows
            .into_iter()
            .filter_map(|(comment,)| comment?.strip_prefix(INDEX_TAG).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn index_create(
        &self,
        namespace: &str,
        table: &str,
        name: &str,
        fields: &[String],
    ) -> DbResult<()> {
        let physical = physical_index_name(table, name);
        let columns: Vec<String> = fields
            .iter()
            .map(|f| format!("(doc -> {})", literal(f)))
            .collect();

        let create = format!(
            "create index {} on {} ({})",
            ident(&physical)?,
            qualified(namespace, table)?,
            columns.join(", ")
        );
        let comment = format!(
            "comment on index {} is {}",
            qualified(namespace, &physical)?,
            literal(&format!("{INDEX_TAG}{name}"))
        );

        let mut s = self.session().await?;
        let mut tx = s
            .begin()
            .await
            .map_err(DbError::sqlx("begin index create"))?;
        sqlx::query(&create)
            .execute(&mut *tx)
            .await
            .map_err(DbError::sqlx("create index"))?;
        sqlx::query(&comment)
            .execute(&mut *tx)
            .await
            .map_err(DbError::sqlx("tag index"))?;
        tx.commit()
            .await
            .map_err(DbError::sqlx("commit index create"))?;

        debug!(namespace, table, index = name, physical = %physical, "index created");
        Ok(())
    }

    async fn index_drop(&self, namespace: &str, table: &str, name: &str) -> DbResult<()> {
        let sql = format!(
            "drop index if exists {}",
            qualified(namespace, &physical_index_name(table, name))?
        );
        let mut s = self.session().await?;
        sqlx::query(&sql)
            .execute(&mut *s)
            .await
            .map_err(DbError::sqlx("drop index"))?;
        Ok(())
    }

    async fn get(&self, namespace: &str, table: &str, id: &str) -> DbResult<Option<Value>> {
        let sql = format!("select doc from {} where id = $1", qualified(namespace, table)?);
        let mut s = self.session().await?;
        let row: Option<(Value,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *s)
            .await
            .map_err(DbError::sqlx("get record"))?;
        Ok(row.map(|(doc,)| doc))
    }

    async fn list(&self, namespace: &str, table: &str) -> DbResult<Vec<Value>> {
        let sql = format!("select doc from {} order by id", qualified(namespace, table)?);
        let mut s = self.session().await?;
        let rows: Vec<(Value,)> = sqlx::query_as(&sql)
            .fetch_all(&mut *s)
            .await
            .map_err(DbError::sqlx("list records"))?;
        Ok(rows.into_iter().map(|(doc,)| doc).collect())
    }

    async fn insert(
        &self,
        namespace: &str,
        table: &str,
        docs: Vec<Value>,
        opts: WriteOptions,
    ) -> DbResult<WriteSummary> {
        let target = qualified(namespace, table)?;
        let mut summary = WriteSummary::default();

        let mut s = self.session().await?;
        let mut tx = s.begin().await.map_err(DbError::sqlx("begin insert"))?;

        for doc in docs {
            let id = document_id(&doc)?.to_string();
            let old = lock_record(&mut tx, &target, &id).await?;

            let new = match (&old, opts.conflict) {
                (None, _) => {
                    write_record(&mut tx, &target, &id, &doc, false).await?;
                    summary.inserted += 1;
                    Some(doc)
                }
                (Some(_), Conflict::Error) => {
                    summary.record_error(format!("duplicate primary key `id`: {id:?}"));
                    continue;
                }
                (Some(existing), conflict) => {
                    let merged = match conflict {
                        Conflict::Update => merge_documents(existing.clone(), doc),
                        _ => doc,
                    };
                    if &merged == existing {
                        summary.unchanged += 1;
                    } else {
                        write_record(&mut tx, &target, &id, &merged, true).await?;
                        summary.replaced += 1;
                    }
                    Some(merged)
                }
            };

            if opts.return_changes {
                summary.changes.push(Change {
                    old_val: old,
                    new_val: new,
                });
            }
        }

        tx.commit().await.map_err(DbError::sqlx("commit insert"))?;
        Ok(summary)
    }

    async fn delete(
        &self,
        namespace: &str,
        table: &str,
        id: &str,
        return_changes: bool,
    ) -> DbResult<WriteSummary> {
        let sql = format!(
            "delete from {} where id = $1 returning doc",
            qualified(namespace, table)?
        );
        let mut s = self.session().await?;
        let row: Option<(Value,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *s)
            .await
            .map_err(DbError::sqlx("delete record"))?;

        let mut summary = WriteSummary::default();
        if let Some((old,)) = row {
            summary.deleted = 1;
            if return_changes {
                summary.changes.push(Change {
                    old_val: Some(old),
                    new_val: None,
                });
            }
        }
        Ok(summary)
    }

    async fn close(&self) -> DbResult<()> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        session.close().await.map_err(DbError::sqlx("close session"))
    }
}

async fn lock_record(
    tx: &mut Transaction<'_, Postgres>,
    target: &str,
    id: &str,
) -> DbResult<Option<Value>> {
    let sql = format!("select doc from {target} where id = $1 for update");
    let row: Option<(Value,)> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DbError::sqlx("lock record"))?;
    Ok(row.map(|(doc,)| doc))
}

async fn write_record(
    tx: &mut Transaction<'_, Postgres>,
    target: &str,
    id: &str,
    doc: &Value,
    exists: bool,
) -> DbResult<()> {
    let sql = if exists {
        format!("update {target} set doc = $2 where id = $1")
    } else {
        format!("insert into {target} (id, doc) values ($1, $2)")
    };
    sqlx::query(&sql)
        .bind(id)
        .bind(doc)
        .execute(&mut **tx)
        .await
        .map_err(DbError::sqlx("write record"))?;
    Ok(())
}

/// Physical Postgres index name for logical index `name` on `table`.
pub fn physical_index_name(table: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(table.as_bytes());
    hasher.update([0u8]);
    hasher.update(name.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("hzidx_{}", &digest[..24])
}

fn ident(s: &str) -> DbResult<String> {
    if s.len() > MAX_IDENTIFIER_BYTES {
        return Err(DbError::NameTooLong {
            name: s.to_string(),
            len: s.len(),
            max: MAX_IDENTIFIER_BYTES,
        });
    }
    Ok(format!("\"{}\"", s.replace('"', "\"\"")))
}

fn qualified(namespace: &str, table: &str) -> DbResult<String> {
    Ok(format!("{}.{}", ident(namespace)?, ident(table)?))
}

fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
