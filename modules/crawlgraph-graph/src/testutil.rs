//! Disposable Neo4j for integration tests. Requires Docker.

use testcontainers::{
    core::{ContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

use crate::{migrate::migrate, GraphClient};

const TEST_PASSWORD: &str = "crawlgraph-test";

/// Start Neo4j community, connect, and apply the schema.
///
/// Keep the returned container alive for the whole test; dropping it stops
/// the database.
pub async fn migrated_neo4j() -> (ContainerAsync<GenericImage>, GraphClient) {
    let container = GenericImage::new("neo4j", "5.25.1-community")
        .with_exposed_port(ContainerPort::Tcp(7687))
        .with_wait_for(WaitFor::message_on_stdout("Started."))
        .with_env_var("NEO4J_AUTH", format!("neo4j/{TEST_PASSWORD}"))
        .start()
        .await
        .expect("neo4j container did not start");

    let port = container
        .get_host_port_ipv4(7687)
        .await
        .expect("bolt port not mapped");
    let client = GraphClient::connect(&format!("bolt://127.0.0.1:{port}"), "neo4j", TEST_PASSWORD)
        .await
        .expect("bolt connection failed");
    client.ping().await.expect("neo4j not answering queries");
    migrate(&client).await.expect("schema migration failed");

    (container, client)
}
