// ABOUTME: Collaborator seams: SQL sessions, direct metastore queries and the storage probe
// ABOUTME: The pipeline only talks to environments through these traits

pub mod probe;
pub mod queries;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::error::MirrorError;
use crate::model::{Environment, TableStatistics};
pub use probe::HdfsCliProbe;
pub use queries::{QueryDefinition, QueryDefinitions};

pub type Row = Vec<String>;

/// One connection, held for a single unit of work.
#[async_trait]
pub trait SqlSession: Send {
    async fn execute(&mut self, statement: &str) -> Result<Vec<Row>>;
}

#[async_trait]
pub trait SqlGateway: Send + Sync {
    async fn session(&self, environment: Environment) -> Result<Box<dyn SqlSession>>;
}

#[async_trait]
pub trait MetastoreGateway: Send + Sync {
    /// Runs a named query with positional parameters against the environment's metastore.
    async fn query(&self, environment: Environment, query: &QueryDefinition, params: &[String]) -> Result<Vec<Row>>;
}

#[async_trait]
pub trait StorageProbe: Send + Sync {
    async fn exists(&self, location: &str) -> Result<bool>;
    async fn content_summary(&self, location: &str) -> Result<TableStatistics>;
    /// Checks that every namespace is reachable from here.
    async fn link_test(&self, namespaces: &[String]) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct Gateways {
    pub sql: Option<Arc<dyn SqlGateway>>,
    pub metastore: Option<Arc<dyn MetastoreGateway>>,
    pub probe: Option<Arc<dyn StorageProbe>>,
}

impl Gateways {
    pub fn sql(&self) -> Result<&Arc<dyn SqlGateway>> {
        self.sql
            .as_ref()
            .ok_or_else(|| anyhow::Error::new(MirrorError::Connection("no SQL gateway configured".to_string())))
    }
}

impl std::fmt::Debug for Gateways {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateways")
            .field("sql", &self.sql.is_some())
            .field("metastore", &self.metastore.is_some())
            .field("probe", &self.probe.is_some())
            .finish()
    }
}
