//! Manager for `cravertextable`: instances, definitions and vertices.

use std::sync::Arc;

use cra_store::{TableEntry, TableService};

use crate::error::MetaError;
use crate::names::validate_definition_name;
use crate::rows::{decode, encode, VertexRecord};
use crate::tables;

/// Typed operations over the vertex table.
#[derive(Clone)]
pub struct VertexManager {
    service: Arc<dyn TableService>,
}

impl VertexManager {
    /// Creates a manager over the given table service.
    #[must_use]
    pub fn new(service: Arc<dyn TableService>) -> Self {
        Self { service }
    }

    fn record(entry: &TableEntry) -> Result<VertexRecord, MetaError> {
        decode(tables::VERTEX, entry)
    }

    /// Registers (or re-registers) an instance. Address and port are
    /// replaced on re-registration; the row key stays the same.
    pub async fn register_instance(
        &self,
        name: &str,
        address: &str,
        port: u16,
    ) -> Result<(), MetaError> {
        let record = VertexRecord {
            instance: name.to_owned(),
            vertex: String::new(),
            definition: String::new(),
            address: address.to_owned(),
            port,
            parameter: Vec::new(),
            is_sharded: false,
        };

        let value = encode(tables::VERTEX, &record)?;
        self.service
            .upsert(tables::VERTEX, name, "", &value)
            .await?;
        Ok(())
    }

    /// Looks up an instance row by name.
    pub async fn instance_for_name(&self, name: &str) -> Result<Option<VertexRecord>, MetaError> {
        match self.service.get(tables::VERTEX, name, "").await? {
            Some(entry) => Ok(Some(Self::record(&entry)?)),
            None => Ok(None),
        }
    }

    /// Lists every registered instance.
    pub async fn all_instances(&self) -> Result<Vec<VertexRecord>, MetaError> {
        let entries = self.service.scan(tables::VERTEX, None).await?;
        entries
            .iter()
            .filter(|e| e.row.is_empty() && !e.partition.is_empty())
            .map(Self::record)
            .collect()
    }

    /// Deletes an instance row; returns whether it existed.
    pub async fn delete_instance(&self, name: &str) -> Result<bool, MetaError> {
        Ok(self.service.delete(tables::VERTEX, name, "").await?)
    }

    /// Writes a definition template row (empty instance).
    pub async fn define(&self, definition: &str, is_sharded: bool) -> Result<(), MetaError> {
        validate_definition_name(definition)?;

        let record = VertexRecord {
            instance: String::new(),
            vertex: definition.to_owned(),
            definition: definition.to_owned(),
            address: String::new(),
            port: 0,
            parameter: Vec::new(),
            is_sharded,
        };

        let value = encode(tables::VERTEX, &record)?;
        self.service
            .upsert(tables::VERTEX, "", definition, &value)
            .await?;
        Ok(())
    }

    /// Looks up the definition template row.
    pub async fn row_for_definition(
        &self,
        definition: &str,
    ) -> Result<Option<VertexRecord>, MetaError> {
        match self.service.get(tables::VERTEX, "", definition).await? {
            Some(entry) => Ok(Some(Self::record(&entry)?)),
            None => Ok(None),
        }
    }

    /// Inserts or replaces a vertex row.
    pub async fn put_vertex(
        &self,
        instance: &str,
        vertex: &str,
        definition: &str,
        parameter: &[u8],
    ) -> Result<(), MetaError> {
        let record = VertexRecord {
            instance: instance.to_owned(),
            vertex: vertex.to_owned(),
            definition: definition.to_owned(),
            address: String::new(),
            port: 0,
            parameter: parameter.to_vec(),
            is_sharded: false,
        };

        let value = encode(tables::VERTEX, &record)?;
        self.service
            .upsert(tables::VERTEX, instance, vertex, &value)
            .await?;
        Ok(())
    }

    /// Point lookup of a vertex row.
    pub async fn vertex_row(
        &self,
        instance: &str,
        vertex: &str,
    ) -> Result<Option<VertexRecord>, MetaError> {
        match self.service.get(tables::VERTEX, instance, vertex).await? {
            Some(entry) => Ok(Some(Self::record(&entry)?)),
            None => Ok(None),
        }
    }

    /// Any instance hosting the named vertex, earliest insertion
    /// first.
    pub async fn row_for_vertex(&self, vertex: &str) -> Result<Option<VertexRecord>, MetaError> {
        let entries = self.hosting_rows(vertex).await?;
        match entries.first() {
            Some(entry) => Ok(Some(Self::record(entry)?)),
            None => Ok(None),
        }
    }

    /// Like [`Self::row_for_vertex`], but skipping rows whose hosting
    /// instance has no known address.
    pub async fn row_for_active_vertex(
        &self,
        vertex: &str,
    ) -> Result<Option<VertexRecord>, MetaError> {
        for entry in self.hosting_rows(vertex).await? {
            let record = Self::record(&entry)?;
            if let Some(instance) = self.instance_for_name(&record.instance).await? {
                if instance.has_address() {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// Every vertex row hosted on an instance (the instance row itself
    /// is excluded).
    pub async fn vertices_for_instance(
        &self,
        instance: &str,
    ) -> Result<Vec<VertexRecord>, MetaError> {
        let entries = self.service.scan(tables::VERTEX, Some(instance)).await?;
        entries
            .iter()
            .filter(|e| !e.row.is_empty())
            .map(Self::record)
            .collect()
    }

    /// Deletes a vertex row; returns whether it existed.
    pub async fn delete_vertex(&self, instance: &str, vertex: &str) -> Result<bool, MetaError> {
        Ok(self.service.delete(tables::VERTEX, instance, vertex).await?)
    }

    /// Whether the named vertex exists on any instance.
    pub async fn vertex_exists(&self, vertex: &str) -> Result<bool, MetaError> {
        Ok(!self.hosting_rows(vertex).await?.is_empty())
    }

    /// Scans for rows materialising the named vertex, in insertion
    /// order. Scans are eventually consistent; single-row lookups on
    /// the results may still miss.
    async fn hosting_rows(&self, vertex: &str) -> Result<Vec<TableEntry>, MetaError> {
        let entries = self.service.scan(tables::VERTEX, None).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.row == vertex && !e.partition.is_empty())
            .collect())
    }
}

impl std::fmt::Debug for VertexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cra_store::MemoryTableService;

    fn manager() -> VertexManager {
        VertexManager::new(Arc::new(MemoryTableService::new()))
    }

    #[tokio::test]
    async fn register_and_lookup_instance() {
        let vertices = manager();

        vertices
            .register_instance("worker-a", "10.0.0.1", 11000)
            .await
            .unwrap();

        let instance = vertices.instance_for_name("worker-a").await.unwrap().unwrap();
        assert_eq!(instance.address, "10.0.0.1");
        assert_eq!(instance.port, 11000);
        assert!(instance.has_address());
    }

    #[tokio::test]
    async fn reregistration_replaces_address() {
        let vertices = manager();

        vertices
            .register_instance("worker-a", "10.0.0.1", 11000)
            .await
            .unwrap();
        vertices
            .register_instance("worker-a", "10.0.0.2", 11001)
            .await
            .unwrap();

        let instance = vertices.instance_for_name("worker-a").await.unwrap().unwrap();
        assert_eq!(instance.address, "10.0.0.2");
        assert_eq!(instance.port, 11001);
        assert_eq!(vertices.all_instances().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn define_validates_name() {
        let vertices = manager();

        vertices.define("echo-vertex", false).await.unwrap();
        assert!(vertices
            .row_for_definition("echo-vertex")
            .await
            .unwrap()
            .is_some());

        assert!(matches!(
            vertices.define("Echo", false).await,
            Err(MetaError::InvalidDefinitionName(_))
        ));
    }

    #[tokio::test]
    async fn instantiated_vertex_is_found() {
        let vertices = manager();

        vertices.define("echo", false).await.unwrap();
        vertices
            .put_vertex("worker-a", "ea", "echo", b"params")
            .await
            .unwrap();

        let row = vertices.vertex_row("worker-a", "ea").await.unwrap().unwrap();
        assert_eq!(row.definition, "echo");
        assert_eq!(row.parameter, b"params");

        let found = vertices.row_for_vertex("ea").await.unwrap().unwrap();
        assert_eq!(found.instance, "worker-a");
        assert!(vertices.vertex_exists("ea").await.unwrap());
        assert!(!vertices.vertex_exists("eb").await.unwrap());
    }

    #[tokio::test]
    async fn row_for_vertex_prefers_earliest_insertion() {
        let vertices = manager();

        vertices
            .put_vertex("worker-a", "shared", "echo", b"")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        vertices
            .put_vertex("worker-b", "shared", "echo", b"")
            .await
            .unwrap();

        let row = vertices.row_for_vertex("shared").await.unwrap().unwrap();
        assert_eq!(row.instance, "worker-a");
    }

    #[tokio::test]
    async fn active_lookup_skips_addressless_instances() {
        let vertices = manager();

        // Detached-style instance with no dialable address.
        vertices.register_instance("ghost", "", 0).await.unwrap();
        vertices
            .put_vertex("ghost", "shared", "echo", b"")
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        vertices
            .register_instance("worker-b", "10.0.0.2", 11001)
            .await
            .unwrap();
        vertices
            .put_vertex("worker-b", "shared", "echo", b"")
            .await
            .unwrap();

        let row = vertices.row_for_vertex("shared").await.unwrap().unwrap();
        assert_eq!(row.instance, "ghost");

        let active = vertices
            .row_for_active_vertex("shared")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.instance, "worker-b");
    }

    #[tokio::test]
    async fn vertices_for_instance_excludes_instance_row() {
        let vertices = manager();

        vertices
            .register_instance("worker-a", "10.0.0.1", 11000)
            .await
            .unwrap();
        vertices
            .put_vertex("worker-a", "v1", "echo", b"")
            .await
            .unwrap();
        vertices
            .put_vertex("worker-a", "v2", "echo", b"")
            .await
            .unwrap();

        let hosted = vertices.vertices_for_instance("worker-a").await.unwrap();
        assert_eq!(hosted.len(), 2);
        assert!(hosted.iter().all(|r| !r.vertex.is_empty()));
    }

    #[tokio::test]
    async fn delete_vertex_and_instance() {
        let vertices = manager();

        vertices
            .register_instance("worker-a", "10.0.0.1", 11000)
            .await
            .unwrap();
        vertices
            .put_vertex("worker-a", "v1", "echo", b"")
            .await
            .unwrap();

        assert!(vertices.delete_vertex("worker-a", "v1").await.unwrap());
        assert!(!vertices.delete_vertex("worker-a", "v1").await.unwrap());

        assert!(vertices.delete_instance("worker-a").await.unwrap());
        assert!(vertices.instance_for_name("worker-a").await.unwrap().is_none());
    }
}
