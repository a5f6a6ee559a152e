//! Manager for `craendpointtable`.

use std::sync::Arc;

use cra_store::{delete_rows, TableService};

use crate::error::MetaError;
use crate::rows::{decode, encode, Direction, EndpointRecord};
use crate::tables;

/// Typed operations over the endpoint table.
#[derive(Clone)]
pub struct EndpointManager {
    service: Arc<dyn TableService>,
}

impl EndpointManager {
    /// Creates a manager over the given table service.
    #[must_use]
    pub fn new(service: Arc<dyn TableService>) -> Self {
        Self { service }
    }

    /// Inserts or replaces an endpoint row. Direction and asyncness
    /// are immutable in the model; replacement is only meaningful when
    /// a vertex is re-loaded under the same name.
    pub async fn add_endpoint(
        &self,
        vertex: &str,
        endpoint: &str,
        direction: Direction,
        is_async: bool,
    ) -> Result<(), MetaError> {
        let record = EndpointRecord {
            vertex: vertex.to_owned(),
            endpoint: endpoint.to_owned(),
            direction,
            is_async,
        };

        let value = encode(tables::ENDPOINT, &record)?;
        self.service
            .upsert(tables::ENDPOINT, vertex, endpoint, &value)
            .await?;
        Ok(())
    }

    /// Point lookup of one endpoint.
    pub async fn endpoint(
        &self,
        vertex: &str,
        endpoint: &str,
    ) -> Result<Option<EndpointRecord>, MetaError> {
        match self.service.get(tables::ENDPOINT, vertex, endpoint).await? {
            Some(entry) => Ok(Some(decode(tables::ENDPOINT, &entry)?)),
            None => Ok(None),
        }
    }

    /// Every endpoint of a vertex, optionally filtered by direction.
    pub async fn endpoints_of(
        &self,
        vertex: &str,
        direction: Option<Direction>,
    ) -> Result<Vec<EndpointRecord>, MetaError> {
        let entries = self.service.scan(tables::ENDPOINT, Some(vertex)).await?;

        let mut records = Vec::with_capacity(entries.len());
        for entry in &entries {
            let record: EndpointRecord = decode(tables::ENDPOINT, entry)?;
            if direction.map_or(true, |d| record.direction == d) {
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Deletes one endpoint row; returns whether it existed.
    pub async fn delete_endpoint(&self, vertex: &str, endpoint: &str) -> Result<bool, MetaError> {
        Ok(self.service.delete(tables::ENDPOINT, vertex, endpoint).await?)
    }

    /// Deletes every endpoint of a vertex in batches; returns the
    /// number removed.
    pub async fn delete_all_for_vertex(&self, vertex: &str) -> Result<u64, MetaError> {
        let rows: Vec<String> = self
            .service
            .scan(tables::ENDPOINT, Some(vertex))
            .await?
            .into_iter()
            .map(|e| e.row)
            .collect();

        Ok(delete_rows(&self.service, tables::ENDPOINT, vertex, rows).await?)
    }
}

impl std::fmt::Debug for EndpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointManager").finish_non_exhaustive()
    }
}
