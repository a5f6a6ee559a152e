//! Metadata-plane integration tests: topology invariants that hold
//! with or without live workers.

use std::sync::Arc;

use cra_client::DataflowClient;
use cra_meta::{shard_name, Direction};
use cra_proto::ErrorCode;
use cra_store::{ArtifactStore, MemoryArtifactStore, MemoryTableService, TableService};

fn client() -> DataflowClient {
    let tables: Arc<dyn TableService> = Arc::new(MemoryTableService::new());
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
    DataflowClient::new(tables, artifacts)
}

/// Registers a fake live instance so active-vertex lookups resolve.
async fn register_instance(client: &DataflowClient, name: &str) {
    client
        .vertices()
        .register_instance(name, "127.0.0.1", 1)
        .await
        .unwrap();
}

#[tokio::test]
async fn define_then_instantiate_creates_row() {
    let client = client();
    register_instance(&client, "worker-a").await;

    client
        .define_vertex("echo", false, b"binary")
        .await
        .unwrap();

    // No worker is listening; the load RPC fails but the row write is
    // authoritative.
    let code = client
        .instantiate_vertex("worker-a", "ea", "echo", b"p")
        .await
        .unwrap();
    assert!(!code.is_success());

    let row = client.vertices().row_for_vertex("ea").await.unwrap().unwrap();
    assert_eq!(row.instance, "worker-a");
    assert_eq!(row.definition, "echo");
    assert_eq!(row.parameter, b"p");
}

#[tokio::test]
async fn define_rejects_bad_names() {
    let client = client();

    for name in ["AB", "a", "ab", "-abc", "abc-"] {
        assert!(client.define_vertex(name, false, b"").await.is_err(), "{name}");
    }

    client.define_vertex("$root", false, b"").await.unwrap();
}

#[tokio::test]
async fn connect_is_idempotent() {
    let client = client();
    register_instance(&client, "worker-a").await;

    client.define_vertex("echo", false, b"").await.unwrap();
    client
        .vertices()
        .put_vertex("worker-a", "ea", "echo", b"")
        .await
        .unwrap();
    client
        .vertices()
        .put_vertex("worker-a", "eb", "echo", b"")
        .await
        .unwrap();

    client.connect("ea", "out", "eb", "in").await.unwrap();
    client.connect("ea", "out", "eb", "in").await.unwrap();

    let rows = client.connections().connections_from("ea").await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn connect_unknown_vertex_writes_nothing() {
    let client = client();

    let code = client.connect("ghost", "out", "also-ghost", "in").await.unwrap();
    assert_eq!(code, ErrorCode::VertexNotFound);

    assert!(client
        .connections()
        .connections_from("ghost")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn sharded_instantiate_places_shards_round_robin() {
    let client = client();
    register_instance(&client, "worker-a").await;
    register_instance(&client, "worker-b").await;

    client.define_vertex("src", true, b"").await.unwrap();

    let instances = vec!["worker-a".to_owned(), "worker-b".to_owned()];
    let code = client
        .instantiate_sharded_vertex(&instances, "src", "src", b"u", 2, None)
        .await
        .unwrap();
    // No worker is listening, so the loads fail; the rows and the
    // descriptor still exist.
    assert!(!code.is_success());

    let info = client.get_sharding_info("src").await.unwrap().unwrap();
    assert_eq!(info.epoch, 0);
    assert_eq!(info.all_shards, vec![0, 1, 2, 3]);
    assert_eq!(info.all_instances, instances);

    let rows = client.sharded().rows_for_sharded_vertex("src").await.unwrap();
    assert_eq!(rows.len(), 4);

    for shard in 0..4u32 {
        let expected = if shard % 2 == 0 { "worker-a" } else { "worker-b" };
        let row = client
            .vertices()
            .row_for_vertex(&shard_name("src", shard))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.instance, expected);
    }
}

#[tokio::test]
async fn full_mesh_creates_f_times_t_rows() {
    let client = client();
    register_instance(&client, "worker-a").await;

    client.define_vertex("src", true, b"").await.unwrap();
    client.define_vertex("snk", true, b"").await.unwrap();

    let instances = vec!["worker-a".to_owned()];
    client
        .instantiate_sharded_vertex(&instances, "src", "src", b"", 3, None)
        .await
        .unwrap();
    client
        .instantiate_sharded_vertex(&instances, "snk", "snk", b"", 2, None)
        .await
        .unwrap();

    // F = 3 source shards, T = 2 destination shards.
    let code = client
        .connect_sharded_vertices_with_full_mesh("src", &["o0", "o1"], "snk", &["i0", "i1", "i2"])
        .await
        .unwrap();
    // Establishment is best-effort without workers; the rows are what
    // matters here.
    assert_ne!(code, ErrorCode::VerticesEndpointsNotMatched);

    let mut rows = Vec::new();
    for shard in 0..3u32 {
        rows.extend(
            client
                .connections()
                .connections_from(&shard_name("src", shard))
                .await
                .unwrap(),
        );
    }
    assert_eq!(rows.len(), 6);

    for j in 0..3u32 {
        for k in 0..2u32 {
            assert!(
                rows.iter().any(|r| {
                    r.from_vertex == shard_name("src", j)
                        && r.from_endpoint == format!("o{k}")
                        && r.to_vertex == shard_name("snk", k)
                        && r.to_endpoint == format!("i{j}")
                }),
                "missing src${j}.o{k} -> snk${k}.i{j}"
            );
        }
    }
}

#[tokio::test]
async fn full_mesh_arity_mismatch_creates_zero_rows() {
    let client = client();
    register_instance(&client, "worker-a").await;

    client.define_vertex("src", true, b"").await.unwrap();
    client.define_vertex("snk", true, b"").await.unwrap();

    let instances = vec!["worker-a".to_owned()];
    client
        .instantiate_sharded_vertex(&instances, "src", "src", b"", 3, None)
        .await
        .unwrap();
    client
        .instantiate_sharded_vertex(&instances, "snk", "snk", b"", 3, None)
        .await
        .unwrap();

    // Two source endpoints against three destination shards.
    let code = client
        .connect_sharded_vertices_with_full_mesh("src", &["o0", "o1"], "snk", &["i0", "i1", "i2"])
        .await
        .unwrap();
    assert_eq!(code, ErrorCode::VerticesEndpointsNotMatched);

    for shard in 0..3u32 {
        assert!(client
            .connections()
            .connections_from(&shard_name("src", shard))
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn detached_dispose_cleans_every_row() {
    let client = client();

    let detached = client.register_as_vertex("driver", None).await.unwrap();
    let instance = detached.instance().to_owned();

    assert_eq!(instance.len(), 16);
    assert!(instance.chars().all(|c| c.is_ascii_lowercase()));

    detached.add_input_endpoint("in").await.unwrap();
    detached.add_output_endpoint("out").await.unwrap();

    // Connection rows touching the detached vertex, in both
    // directions.
    client
        .connections()
        .add_connection(&cra_meta::ConnectionRecord {
            from_vertex: "driver".to_owned(),
            from_endpoint: "out".to_owned(),
            to_vertex: "other".to_owned(),
            to_endpoint: "in".to_owned(),
        })
        .await
        .unwrap();
    client
        .connections()
        .add_connection(&cra_meta::ConnectionRecord {
            from_vertex: "other".to_owned(),
            from_endpoint: "out".to_owned(),
            to_vertex: "driver".to_owned(),
            to_endpoint: "in".to_owned(),
        })
        .await
        .unwrap();

    detached.dispose().await;

    assert!(client
        .vertices()
        .instance_for_name(&instance)
        .await
        .unwrap()
        .is_none());
    assert!(client
        .vertices()
        .vertex_row(&instance, "driver")
        .await
        .unwrap()
        .is_none());
    assert!(client
        .endpoints()
        .endpoints_of("driver", None)
        .await
        .unwrap()
        .is_empty());
    assert!(client
        .connections()
        .connections_from("driver")
        .await
        .unwrap()
        .is_empty());
    assert!(client
        .connections()
        .connections_to("driver")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn detached_endpoint_rows_have_directions() {
    let client = client();

    let detached = client
        .register_as_vertex("typed", Some("existing-instance"))
        .await
        .unwrap();
    assert_eq!(detached.instance(), "existing-instance");

    detached.add_input_endpoint("in").await.unwrap();
    detached.add_output_endpoint("out").await.unwrap();

    let inputs = client
        .endpoints()
        .endpoints_of("typed", Some(Direction::Input))
        .await
        .unwrap();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].endpoint, "in");

    let outputs = client
        .endpoints()
        .endpoints_of("typed", Some(Direction::Output))
        .await
        .unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].endpoint, "out");
}

#[tokio::test]
async fn reset_empties_every_table() {
    let client = client();
    register_instance(&client, "worker-a").await;

    client.define_vertex("echo", false, b"binary").await.unwrap();
    client
        .vertices()
        .put_vertex("worker-a", "ea", "echo", b"")
        .await
        .unwrap();
    client
        .endpoints()
        .add_endpoint("ea", "in", Direction::Input, true)
        .await
        .unwrap();
    client
        .connections()
        .add_connection(&cra_meta::ConnectionRecord {
            from_vertex: "ea".to_owned(),
            from_endpoint: "out".to_owned(),
            to_vertex: "eb".to_owned(),
            to_endpoint: "in".to_owned(),
        })
        .await
        .unwrap();
    client
        .sharded()
        .register("src", vec![], vec![0], vec![0], vec![], None)
        .await
        .unwrap();

    client.reset().await.unwrap();

    assert!(client.vertices().all_instances().await.unwrap().is_empty());
    assert!(client.vertices().row_for_vertex("ea").await.unwrap().is_none());
    assert!(client
        .vertices()
        .row_for_definition("echo")
        .await
        .unwrap()
        .is_none());
    assert!(client
        .endpoints()
        .endpoints_of("ea", None)
        .await
        .unwrap()
        .is_empty());
    assert!(client
        .connections()
        .connections_from("ea")
        .await
        .unwrap()
        .is_empty());
    assert!(client
        .get_sharding_info("src")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn disconnect_deletes_the_row() {
    let client = client();
    register_instance(&client, "worker-a").await;

    client.define_vertex("echo", false, b"").await.unwrap();
    client
        .vertices()
        .put_vertex("worker-a", "ea", "echo", b"")
        .await
        .unwrap();
    client
        .vertices()
        .put_vertex("worker-a", "eb", "echo", b"")
        .await
        .unwrap();

    client.connect("ea", "out", "eb", "in").await.unwrap();
    client.disconnect("ea", "out", "eb", "in").await.unwrap();

    assert!(client
        .connections()
        .connections_from("ea")
        .await
        .unwrap()
        .is_empty());
}
