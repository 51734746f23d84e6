//! Server catalog queries.

use std::collections::{BTreeMap, HashSet};

use super::db::{CatalogDatabase, DatabaseError};
use super::models::{CatalogSyncReport, GroupSummary, Server, ServerState, ServerSummary};
use crate::provider::ScrapedInstance;

impl CatalogDatabase {
    /// Reconcile a full provider scrape into the `servers` table.
    ///
    /// New instances are inserted, changed ones updated (rows whose name,
    /// group and state already match are not written), and catalog rows the
    /// provider no longer reports are deleted. Runs as one transaction.
    ///
    /// An instance that moves to another group drops its desired state.
    /// Servers without a desired state then take the one their group's
    /// session implies (`on` while leased, `off` once terminated), so an
    /// instance joining mid-lease is started or stopped with the rest.
    pub async fn sync_catalog(
        &self,
        instances: &[ScrapedInstance],
        now: i64,
    ) -> Result<CatalogSyncReport, DatabaseError> {
        let mut tx = self.pool().begin().await?;
        let mut report = CatalogSyncReport::default();

        for instance in instances {
            let result = sqlx::query(
                "INSERT INTO servers (unique_id, name, server_group, state, time_added) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(unique_id) DO UPDATE SET \
                   name = excluded.name, \
                   server_group = excluded.server_group, \
                   state = excluded.state, \
                   next_state = CASE \
                     WHEN servers.server_group IS excluded.server_group THEN servers.next_state \
                   END \
                 WHERE servers.name IS NOT excluded.name \
                    OR servers.server_group IS NOT excluded.server_group \
                    OR servers.state IS NOT excluded.state",
            )
            .bind(&instance.unique_id)
            .bind(&instance.name)
            .bind(&instance.server_group)
            .bind(instance.state.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
            report.changed += result.rows_affected();
        }

        let seen: HashSet<&str> = instances.iter().map(|i| i.unique_id.as_str()).collect();
        let existing: Vec<String> = sqlx::query_scalar("SELECT unique_id FROM servers")
            .fetch_all(&mut *tx)
            .await?;

        for unique_id in existing.iter().filter(|id| !seen.contains(id.as_str())) {
            let result = sqlx::query("DELETE FROM servers WHERE unique_id = ?")
                .bind(unique_id)
                .execute(&mut *tx)
                .await?;
            report.removed += result.rows_affected();
        }

        let adopted = sqlx::query(
            "UPDATE servers SET next_state = ( \
               SELECT CASE WHEN s.to_cleanup = 1 THEN 'off' ELSE 'on' END \
               FROM server_sessions s WHERE s.server_group = servers.server_group \
             ) \
             WHERE next_state IS NULL \
               AND EXISTS (SELECT 1 FROM server_sessions s WHERE s.server_group = servers.server_group)",
        )
        .execute(&mut *tx)
        .await?;
        report.changed += adopted.rows_affected();

        tx.commit().await?;
        Ok(report)
    }

    /// Ids of servers currently in `state` whose desired state is `next_state`.
    pub async fn pending_server_ids(
        &self,
        state: ServerState,
        next_state: ServerState,
    ) -> Result<Vec<String>, DatabaseError> {
        let ids = sqlx::query_scalar(
            "SELECT unique_id FROM servers WHERE state = ? AND next_state = ? ORDER BY unique_id",
        )
        .bind(state.as_str())
        .bind(next_state.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(ids)
    }

    pub async fn get_server(&self, unique_id: &str) -> Result<Server, DatabaseError> {
        sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE unique_id = ?")
            .bind(unique_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Server {unique_id}")))
    }

    pub async fn list_servers(&self) -> Result<Vec<Server>, DatabaseError> {
        let servers =
            sqlx::query_as::<_, Server>("SELECT * FROM servers ORDER BY server_group, name")
                .fetch_all(self.pool())
                .await?;

        Ok(servers)
    }

    pub async fn servers_in_group(&self, server_group: &str) -> Result<Vec<Server>, DatabaseError> {
        let servers =
            sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE server_group = ? ORDER BY name")
                .bind(server_group)
                .fetch_all(self.pool())
                .await?;

        Ok(servers)
    }

    /// Per-group view of servers and the open lease on each group.
    ///
    /// Both reads share one transaction so the summary is a consistent
    /// snapshot.
    pub async fn group_summaries(&self) -> Result<Vec<GroupSummary>, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            "SELECT server_group, name, state, next_state FROM servers ORDER BY server_group, name",
        )
        .fetch_all(&mut *tx)
        .await?;

        let leases: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT server_group, email, expiry FROM server_sessions WHERE to_cleanup = 0",
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut groups: BTreeMap<String, GroupSummary> = BTreeMap::new();
        for (server_group, name, state, next_state) in rows {
            groups
                .entry(server_group.clone())
                .or_insert_with(|| empty_summary(server_group))
                .servers
                .push(ServerSummary {
                    name,
                    state,
                    next_state,
                });
        }
        for (server_group, email, expiry) in leases {
            let summary = groups
                .entry(server_group.clone())
                .or_insert_with(|| empty_summary(server_group));
            summary.current_user = Some(email);
            summary.expiry = Some(expiry);
        }

        Ok(groups.into_values().collect())
    }
}

const fn empty_summary(server_group: String) -> GroupSummary {
    GroupSummary {
        server_group,
        servers: Vec::new(),
        current_user: None,
        expiry: None,
    }
}
