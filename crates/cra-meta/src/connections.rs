//! Manager for `craconnectiontable`.

use std::sync::Arc;

use cra_store::{delete_rows, TableService};

use crate::error::MetaError;
use crate::rows::{decode, encode, ConnectionRecord};
use crate::tables;

/// Typed operations over the connection table.
///
/// Rows are partitioned by source vertex with the remaining 3-tuple in
/// the row key, so `connections_from` is a single partition scan. A
/// connection row persists even if its endpoints later vanish; the
/// connection engine treats lookup failure as transient.
#[derive(Clone)]
pub struct ConnectionManager {
    service: Arc<dyn TableService>,
}

impl ConnectionManager {
    /// Creates a manager over the given table service.
    #[must_use]
    pub fn new(service: Arc<dyn TableService>) -> Self {
        Self { service }
    }

    fn row_key(from_endpoint: &str, to_vertex: &str, to_endpoint: &str) -> String {
        format!("{from_endpoint}:{to_vertex}:{to_endpoint}")
    }

    /// Inserts a connection row. Idempotent: re-adding the same
    /// 4-tuple replaces the row in place.
    pub async fn add_connection(&self, record: &ConnectionRecord) -> Result<(), MetaError> {
        let value = encode(tables::CONNECTION, record)?;
        self.service
            .upsert(
                tables::CONNECTION,
                &record.from_vertex,
                &Self::row_key(&record.from_endpoint, &record.to_vertex, &record.to_endpoint),
                &value,
            )
            .await?;
        Ok(())
    }

    /// Point lookup of one connection.
    pub async fn connection(
        &self,
        from_vertex: &str,
        from_endpoint: &str,
        to_vertex: &str,
        to_endpoint: &str,
    ) -> Result<Option<ConnectionRecord>, MetaError> {
        let entry = self
            .service
            .get(
                tables::CONNECTION,
                from_vertex,
                &Self::row_key(from_endpoint, to_vertex, to_endpoint),
            )
            .await?;

        match entry {
            Some(entry) => Ok(Some(decode(tables::CONNECTION, &entry)?)),
            None => Ok(None),
        }
    }

    /// Every connection whose source is the named vertex.
    pub async fn connections_from(&self, vertex: &str) -> Result<Vec<ConnectionRecord>, MetaError> {
        let entries = self.service.scan(tables::CONNECTION, Some(vertex)).await?;
        entries
            .iter()
            .map(|e| decode(tables::CONNECTION, e))
            .collect()
    }

    /// Every connection whose destination is the named vertex.
    pub async fn connections_to(&self, vertex: &str) -> Result<Vec<ConnectionRecord>, MetaError> {
        let entries = self.service.scan(tables::CONNECTION, None).await?;

        let mut records = Vec::new();
        for entry in &entries {
            let record: ConnectionRecord = decode(tables::CONNECTION, entry)?;
            if record.to_vertex == vertex {
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Deletes one connection row; returns whether it existed.
    pub async fn delete_connection(
        &self,
        from_vertex: &str,
        from_endpoint: &str,
        to_vertex: &str,
        to_endpoint: &str,
    ) -> Result<bool, MetaError> {
        Ok(self
            .service
            .delete(
                tables::CONNECTION,
                from_vertex,
                &Self::row_key(from_endpoint, to_vertex, to_endpoint),
            )
            .await?)
    }

    /// Deletes every connection touching the named vertex, in either
    /// direction; returns the number removed.
    pub async fn delete_all_for_vertex(&self, vertex: &str) -> Result<u64, MetaError> {
        let outbound: Vec<String> = self
            .service
            .scan(tables::CONNECTION, Some(vertex))
            .await?
            .into_iter()
            .map(|e| e.row)
            .collect();

        let mut deleted = delete_rows(&self.service, tables::CONNECTION, vertex, outbound).await?;

        for record in self.connections_to(vertex).await? {
            deleted += u64::from(
                self.delete_connection(
                    &record.from_vertex,
                    &record.from_endpoint,
                    &record.to_vertex,
                    &record.to_endpoint,
                )
                .await?,
            );
        }

        Ok(deleted)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cra_store::MemoryTableService;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(Arc::new(MemoryTableService::new()))
    }

    fn record(from: &str, from_ep: &str, to: &str, to_ep: &str) -> ConnectionRecord {
        ConnectionRecord {
            from_vertex: from.to_owned(),
            from_endpoint: from_ep.to_owned(),
            to_vertex: to.to_owned(),
            to_endpoint: to_ep.to_owned(),
        }
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let connections = manager();

        let conn = record("ea", "out", "eb", "in");
        connections.add_connection(&conn).await.unwrap();
        connections.add_connection(&conn).await.unwrap();

        assert_eq!(connections.connections_from("ea").await.unwrap().len(), 1);
        assert!(connections
            .connection("ea", "out", "eb", "in")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn from_and_to_queries() {
        let connections = manager();

        connections
            .add_connection(&record("ea", "out", "eb", "in"))
            .await
            .unwrap();
        connections
            .add_connection(&record("ea", "aux", "ec", "in"))
            .await
            .unwrap();
        connections
            .add_connection(&record("ec", "out", "eb", "in2"))
            .await
            .unwrap();

        assert_eq!(connections.connections_from("ea").await.unwrap().len(), 2);
        assert_eq!(connections.connections_to("eb").await.unwrap().len(), 2);
        assert_eq!(connections.connections_to("ea").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn delete_connection() {
        let connections = manager();

        connections
            .add_connection(&record("ea", "out", "eb", "in"))
            .await
            .unwrap();

        assert!(connections
            .delete_connection("ea", "out", "eb", "in")
            .await
            .unwrap());
        assert!(!connections
            .delete_connection("ea", "out", "eb", "in")
            .await
            .unwrap());
        assert!(connections
            .connection("ea", "out", "eb", "in")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_all_for_vertex_covers_both_directions() {
        let connections = manager();

        connections
            .add_connection(&record("ea", "out", "eb", "in"))
            .await
            .unwrap();
        connections
            .add_connection(&record("eb", "out", "ec", "in"))
            .await
            .unwrap();
        connections
            .add_connection(&record("ec", "out", "ea", "in"))
            .await
            .unwrap();

        let deleted = connections.delete_all_for_vertex("eb").await.unwrap();
        assert_eq!(deleted, 2);

        assert!(connections.connections_from("eb").await.unwrap().is_empty());
        assert!(connections.connections_to("eb").await.unwrap().is_empty());
        assert_eq!(connections.connections_from("ec").await.unwrap().len(), 1);
    }
}
