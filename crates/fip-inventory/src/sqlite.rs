use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tracing::{debug, trace};

use crate::{Binding, FipStatus, FloatingIp, InventoryStore, ObservedRow, StoreError, UpsertOutcome};

/// SQLite-backed inventory
#[derive(Debug, Clone)]
pub struct SqliteStore {
    inner: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `uri` and run migrations.
    ///
    /// In-memory URIs get a single connection that never idles out, since
    /// sqlite drops an in-memory database when its last connection closes.
    pub async fn connect(uri: impl AsRef<str>) -> Result<Self, StoreError> {
        let uri = uri.as_ref();
        let opts = SqliteConnectOptions::from_str(uri)?
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let inner = if uri.contains(":memory:") || uri.contains("mode=memory") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(opts)
                .await?
        } else {
            SqlitePool::connect_with(opts).await?
        };

        sqlx::migrate!("./migrations").run(&inner).await?;
        debug!(uri, "inventory database ready");
        Ok(Self { inner })
    }

    async fn rows(&self, sql: &str, arg: Option<&str>) -> Result<Vec<FloatingIp>, StoreError> {
        let mut query = sqlx::query_as::<_, util::RawRow>(sql);
        if let Some(arg) = arg {
            query = query.bind(arg);
        }
        let mut rows = query
            .fetch_all(&self.inner)
            .await?
            .into_iter()
            .map(FloatingIp::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        // text order would put 10.0.0.10 before 10.0.0.5
        rows.sort_by_key(|r| r.address);
        Ok(rows)
    }

    /// Classify a write that touched no rows: unchanged if the stored row
    /// already matches the observation, conflict otherwise.
    async fn settle_noop(
        &self,
        row: &ObservedRow,
        expected: Option<&Binding>,
    ) -> Result<UpsertOutcome, StoreError> {
        match self.get(row.address).await? {
            Some(current) if !row.differs_from(&current) => Ok(UpsertOutcome::Unchanged),
            current => Err(StoreError::Conflict {
                address: row.address,
                expected: expected
                    .cloned()
                    .or_else(|| current.map(|c| c.binding()))
                    .unwrap_or_else(Binding::available),
            }),
        }
    }
}

#[async_trait]
impl InventoryStore for SqliteStore {
    async fn get(&self, address: IpAddr) -> Result<Option<FloatingIp>, StoreError> {
        sqlx::query_as::<_, util::RawRow>("SELECT * FROM floating_ips WHERE address = ?1")
            .bind(address.to_string())
            .fetch_optional(&self.inner)
            .await?
            .map(FloatingIp::try_from)
            .transpose()
    }

    async fn list_all(&self) -> Result<Vec<FloatingIp>, StoreError> {
        self.rows("SELECT * FROM floating_ips", None).await
    }

    async fn list_by_status(&self, status: FipStatus) -> Result<Vec<FloatingIp>, StoreError> {
        self.rows("SELECT * FROM floating_ips WHERE status = ?1", Some(status.as_str()))
            .await
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<FloatingIp>, StoreError> {
        self.rows("SELECT * FROM floating_ips WHERE project_id = ?1", Some(project_id))
            .await
    }

    async fn find_by_vm(&self, vm_id: &str) -> Result<Vec<FloatingIp>, StoreError> {
        self.rows("SELECT * FROM floating_ips WHERE vm_id = ?1", Some(vm_id))
            .await
    }

    async fn upsert_observed(
        &self,
        row: &ObservedRow,
        expected: Option<&Binding>,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let address = row.address.to_string();
        let affected = match expected {
            None => {
                trace!(%address, "inserting observed row");
                sqlx::query(
                    r#"INSERT INTO floating_ips
                        (address, subnet_id, network_id, status, project_id, vm_id, created_at, updated_at)
                    VALUES
                        (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                    ON CONFLICT (address) DO NOTHING"#,
                )
                .bind(&address)
                .bind(&row.subnet_id)
                .bind(&row.network_id)
                .bind(row.binding.status.as_str())
                .bind(row.binding.project_id.as_deref())
                .bind(row.binding.vm_id.as_deref())
                .bind(now)
                .execute(&self.inner)
                .await?
                .rows_affected()
            }
            Some(expected) => {
                // SET sees the old vm_id, so vm_name survives only if the VM is unchanged
                sqlx::query(
                    r#"UPDATE floating_ips
                    SET
                        subnet_id = ?2, network_id = ?3, status = ?4, project_id = ?5, vm_id = ?6,
                        vm_name = CASE WHEN vm_id IS ?6 THEN vm_name ELSE NULL END,
                        updated_at = ?7
                    WHERE
                        address = ?1
                        AND status IS ?8 AND project_id IS ?9 AND vm_id IS ?10
                        AND (subnet_id IS NOT ?2 OR network_id IS NOT ?3 OR status IS NOT ?4
                             OR project_id IS NOT ?5 OR vm_id IS NOT ?6)"#,
                )
                .bind(&address)
                .bind(&row.subnet_id)
                .bind(&row.network_id)
                .bind(row.binding.status.as_str())
                .bind(row.binding.project_id.as_deref())
                .bind(row.binding.vm_id.as_deref())
                .bind(now)
                .bind(expected.status.as_str())
                .bind(expected.project_id.as_deref())
                .bind(expected.vm_id.as_deref())
                .execute(&self.inner)
                .await?
                .rows_affected()
            }
        };

        match (affected, expected) {
            (0, _) => self.settle_noop(row, expected).await,
            (_, None) => Ok(UpsertOutcome::Created),
            (_, Some(_)) => Ok(UpsertOutcome::Updated),
        }
    }

    async fn transition(
        &self,
        address: IpAddr,
        expected: &Binding,
        next: &Binding,
        vm_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<FloatingIp, StoreError> {
        let updated = sqlx::query_as::<_, util::RawRow>(
            r#"UPDATE floating_ips
            SET
                status = ?2, project_id = ?3, vm_id = ?4, vm_name = ?5, updated_at = ?6
            WHERE
                address = ?1 AND status IS ?7 AND project_id IS ?8 AND vm_id IS ?9
            RETURNING *"#,
        )
        .bind(address.to_string())
        .bind(next.status.as_str())
        .bind(next.project_id.as_deref())
        .bind(next.vm_id.as_deref())
        .bind(vm_name)
        .bind(now)
        .bind(expected.status.as_str())
        .bind(expected.project_id.as_deref())
        .bind(expected.vm_id.as_deref())
        .fetch_optional(&self.inner)
        .await?;

        match updated {
            Some(raw) => FloatingIp::try_from(raw),
            None if self.get(address).await?.is_none() => Err(StoreError::NotFound(address)),
            None => Err(StoreError::Conflict {
                address,
                expected: expected.clone(),
            }),
        }
    }

    async fn delete_if(&self, address: IpAddr, expected: &Binding) -> Result<(), StoreError> {
        let affected = sqlx::query(
            "DELETE FROM floating_ips WHERE address = ?1 AND status IS ?2 AND project_id IS ?3 AND vm_id IS ?4",
        )
        .bind(address.to_string())
        .bind(expected.status.as_str())
        .bind(expected.project_id.as_deref())
        .bind(expected.vm_id.as_deref())
        .execute(&self.inner)
        .await?
        .rows_affected();

        if affected > 0 {
            Ok(())
        } else if self.get(address).await?.is_none() {
            Err(StoreError::NotFound(address))
        } else {
            Err(StoreError::Conflict {
                address,
                expected: expected.clone(),
            })
        }
    }

    async fn count_by_status(&self) -> Result<BTreeMap<FipStatus, usize>, StoreError> {
        let mut counts: BTreeMap<FipStatus, usize> = FipStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(address) FROM floating_ips GROUP BY status")
                .fetch_all(&self.inner)
                .await?;
        for (status, count) in rows {
            let status = FipStatus::from_str(&status).map_err(|e| StoreError::Corrupt(e.to_string()))?;
            counts.insert(status, count as usize);
        }
        Ok(counts)
    }
}

mod util {
    use super::*;

    #[derive(Debug, sqlx::FromRow)]
    pub struct RawRow {
        pub address: String,
        pub subnet_id: String,
        pub network_id: String,
        pub project_id: Option<String>,
        pub vm_id: Option<String>,
        pub vm_name: Option<String>,
        pub status: String,
        pub note: Option<String>,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    impl TryFrom<RawRow> for FloatingIp {
        type Error = StoreError;

        fn try_from(raw: RawRow) -> Result<Self, Self::Error> {
            let address = raw
                .address
                .parse()
                .map_err(|_| StoreError::Corrupt(format!("bad address '{}'", raw.address)))?;
            let status = raw
                .status
                .parse()
                .map_err(|e: crate::model::ParseStatusError| StoreError::Corrupt(e.to_string()))?;
            Ok(FloatingIp {
                address,
                subnet_id: raw.subnet_id,
                network_id: raw.network_id,
                project_id: raw.project_id,
                vm_id: raw.vm_id,
                vm_name: raw.vm_name,
                status,
                note: raw.note,
                created_at: raw.created_at,
                updated_at: raw.updated_at,
            })
        }
    }
}
