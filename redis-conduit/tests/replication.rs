//! Master/replica routing against mock nodes answering `ROLE`

mod common;

use common::{bulk, error, kv_reply, MockServer, Reply};
use parking_lot::Mutex;
use redis_conduit::{
    ReplicaPolicy, ReplicationClient, ReplicationConfig, ReplicationTopology, Request, Response,
};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

type Port = Arc<OnceLock<u16>>;

fn master_role(replica: &Port) -> Response {
    let replicas = replica
        .get()
        .map(|port| {
            vec![Response::Array(vec![
                bulk("127.0.0.1"),
                bulk(&port.to_string()),
                bulk("0"),
            ])]
        })
        .unwrap_or_default();
    Response::Array(vec![bulk("master"), Response::Integer(0), Response::Array(replicas)])
}

fn replica_role(master: &Port) -> Response {
    Response::Array(vec![
        bulk("slave"),
        bulk("127.0.0.1"),
        Response::Integer(i64::from(*master.get().unwrap())),
        bulk("connected"),
        Response::Integer(0),
    ])
}

struct Pair {
    master: MockServer,
    replica: MockServer,
}

async fn pair() -> Pair {
    let master_port: Port = Arc::default();
    let replica_port: Port = Arc::default();

    let master = {
        let replica_port = Arc::clone(&replica_port);
        let store = Mutex::new(HashMap::new());
        MockServer::start(move |args| match args[0].as_str() {
            "ROLE" => master_role(&replica_port).into(),
            _ => kv_reply(&store, args),
        })
        .await
    };
    let replica = {
        let master_port = Arc::clone(&master_port);
        let store = Mutex::new(HashMap::new());
        MockServer::start(move |args| match args[0].as_str() {
            "ROLE" => replica_role(&master_port).into(),
            "SET" => error("READONLY You can't write against a read only replica.").into(),
            _ => kv_reply(&store, args),
        })
        .await
    };
    master_port.set(master.port).unwrap();
    replica_port.set(replica.port).unwrap();
    Pair { master, replica }
}

#[tokio::test]
async fn test_discovery_from_replica() {
    let p = pair().await;
    // only the replica is listed; the master is found through ROLE
    let client = ReplicationClient::connect(ReplicationConfig::new(p.replica.url()))
        .await
        .unwrap();
    let topology = client.topology();
    assert_eq!(topology.master, p.master.endpoint());
    assert_eq!(topology.replicas, vec![p.replica.endpoint()]);
}

#[tokio::test]
async fn test_reads_go_to_replica_writes_to_master() {
    let p = pair().await;
    let config =
        ReplicationConfig::new(p.master.url()).with_replicas(ReplicaPolicy::Always);
    let client = ReplicationClient::connect(config).await.unwrap();

    client.send(&Request::cmd("SET").arg("k").arg("v")).await.unwrap();
    client.send(&Request::cmd("GET").arg("k")).await.unwrap();
    client.send(&Request::cmd("GET").arg("k")).await.unwrap();

    assert_eq!(p.master.count("SET"), 1);
    assert_eq!(p.replica.count("SET"), 0);
    assert_eq!(p.replica.count("GET"), 2);
    assert_eq!(p.master.count("GET"), 0);
}

#[tokio::test]
async fn test_never_policy_keeps_reads_on_master() {
    let p = pair().await;
    let config = ReplicationConfig::new(p.master.url()).with_replicas(ReplicaPolicy::Never);
    let client = ReplicationClient::connect(config).await.unwrap();

    client.send(&Request::cmd("GET").arg("k")).await.unwrap();
    assert_eq!(p.master.count("GET"), 1);
    assert_eq!(p.replica.count("GET"), 0);
}

#[tokio::test]
async fn test_mixed_batch_goes_to_master() {
    let p = pair().await;
    let config =
        ReplicationConfig::new(p.master.url()).with_replicas(ReplicaPolicy::Always);
    let client = ReplicationClient::connect(config).await.unwrap();

    let replies = client
        .batch(&[
            Request::cmd("SET").arg("k").arg("v"),
            Request::cmd("GET").arg("k"),
        ])
        .await
        .unwrap();
    assert_eq!(replies[1].as_ref().unwrap(), &bulk("v"));
    assert_eq!(p.replica.log().len(), 0);

    client
        .batch(&[Request::cmd("GET").arg("a"), Request::cmd("GET").arg("b")])
        .await
        .unwrap();
    assert_eq!(p.replica.count("GET"), 2);
}

#[tokio::test]
async fn test_static_topology_uses_first_endpoint_as_master() {
    let master = MockServer::kv().await;
    let replica = MockServer::start(|args| match args[0].as_str() {
        "GET" => bulk("from-replica").into(),
        _ => Reply::Default,
    })
    .await;
    let config = ReplicationConfig::new(format!(
        "redis://127.0.0.1:{},127.0.0.1:{}",
        master.port, replica.port
    ))
    .with_topology(ReplicationTopology::Static)
    .with_replicas(ReplicaPolicy::Always);
    let client = ReplicationClient::connect(config).await.unwrap();

    let reply = client.send(&Request::cmd("GET").arg("k")).await.unwrap();
    assert_eq!(reply, bulk("from-replica"));
    assert_eq!(master.count("ROLE") + replica.count("ROLE"), 0);
}

#[tokio::test]
async fn test_dead_replica_falls_back_to_master() {
    let master = MockServer::start(|args| match args[0].as_str() {
        "GET" => bulk("from-master").into(),
        _ => Reply::Default,
    })
    .await;
    let config = ReplicationConfig::new(format!(
        "redis://127.0.0.1:{},127.0.0.1:1",
        master.port
    ))
    .with_topology(ReplicationTopology::Static)
    .with_replicas(ReplicaPolicy::Always);
    let client = ReplicationClient::connect(config).await.unwrap();

    let reply = client.send(&Request::cmd("GET").arg("k")).await.unwrap();
    assert_eq!(reply, bulk("from-master"));
}
