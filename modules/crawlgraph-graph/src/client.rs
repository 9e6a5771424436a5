use neo4rs::{query, ConfigBuilder, Graph};
use tracing::info;

/// Bolt connection pool shared by the writer and the schema migration.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) graph: Graph,
}

impl GraphClient {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, neo4rs::Error> {
        // Crawls are sequential; a small pool is plenty.
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(500)
            .max_connections(4)
            .build()?;
        let graph = Graph::connect(config).await?;
        info!(uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Round-trip a trivial query so bad credentials fail here rather than on
    /// the first write.
    pub async fn ping(&self) -> Result<(), neo4rs::Error> {
        let mut rows = self.graph.execute(query("RETURN 1 AS ok")).await?;
        while rows.next().await?.is_some() {}
        Ok(())
    }

    /// Raw driver handle for integration-test assertions.
    #[cfg(feature = "test-utils")]
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}
