//! Standalone client, connection and pool behavior against a mock server

mod common;

use common::{bulk, error, MockServer, Reply};
use redis_conduit::{
    Client, Connection, ConnectionConfig, PoolConfig, ProtocolVersion, RedisError, Request,
    Response, StandaloneConfig,
};
use std::sync::Arc;
use std::time::Duration;

fn config(server: &MockServer) -> StandaloneConfig {
    StandaloneConfig::new(server.url())
}

#[tokio::test]
async fn test_set_get_roundtrip() {
    let server = MockServer::kv().await;
    let client = Client::connect(config(&server)).await.unwrap();

    client
        .send(&Request::cmd("SET").arg("greeting").arg("hello"))
        .await
        .unwrap();
    let value: Option<String> = client
        .query(&Request::cmd("GET").arg("greeting"))
        .await
        .unwrap();
    assert_eq!(value.as_deref(), Some("hello"));

    let missing: Option<String> = client.query(&Request::cmd("GET").arg("nope")).await.unwrap();
    assert_eq!(missing, None);
    assert_eq!(client.mode(), "standalone");
}

#[tokio::test]
async fn test_handshake_negotiates_resp3() {
    let server = MockServer::kv().await;
    let conn = Connection::connect(&server.endpoint(), &ConnectionConfig::new(server.url()))
        .await
        .unwrap();
    assert_eq!(conn.protocol(), ProtocolVersion::Resp3);
    assert_eq!(server.log()[0], vec!["HELLO".to_string(), "3".to_string()]);
}

#[tokio::test]
async fn test_hello_rejected_falls_back_to_resp2() {
    let server = MockServer::start(|args| match args[0].as_str() {
        "HELLO" => error("ERR unknown command 'HELLO'").into(),
        _ => Reply::Default,
    })
    .await;
    let config = ConnectionConfig::new(server.url())
        .with_password("secret")
        .with_database(2);
    let conn = Connection::connect(&server.endpoint(), &config).await.unwrap();
    assert_eq!(conn.protocol(), ProtocolVersion::Resp2);

    let commands: Vec<String> = server.log().into_iter().map(|a| a[0].clone()).collect();
    assert_eq!(commands, vec!["HELLO", "AUTH", "SELECT"]);
}

#[tokio::test]
async fn test_wrong_password_is_auth_error() {
    let server = MockServer::start(|args| match args[0].as_str() {
        "HELLO" => error("WRONGPASS invalid username-password pair").into(),
        _ => Reply::Default,
    })
    .await;
    let config = StandaloneConfig {
        base: ConnectionConfig::new(server.url()).with_password("bad"),
    };
    let err = Client::connect(config).await.unwrap_err();
    assert!(matches!(err, RedisError::Auth(_)), "{err:?}");
}

#[tokio::test]
async fn test_error_reply_surfaces_as_server_error() {
    let server = MockServer::start(|args| match args[0].as_str() {
        "LPUSH" => error("WRONGTYPE Operation against a key holding the wrong kind of value").into(),
        _ => Reply::Default,
    })
    .await;
    let client = Client::connect(config(&server)).await.unwrap();
    let request = Request::cmd("LPUSH").arg("k").arg("v");

    let raw = client.send_raw(&request).await.unwrap();
    assert!(raw.is_error());
    assert!(client.send(&request).await.is_err());

    // the connection is still usable afterwards
    let pong = client.send(&Request::cmd("PING")).await.unwrap();
    assert_eq!(pong, Response::Simple("PONG".into()));
}

#[tokio::test]
async fn test_arity_checked_before_sending() {
    let server = MockServer::kv().await;
    let client = Client::connect(config(&server)).await.unwrap();
    let before = server.log().len();
    assert!(client.send(&Request::cmd("GET")).await.is_err());
    assert_eq!(server.log().len(), before);
}

#[tokio::test]
async fn test_concurrent_requests_keep_fifo_order() {
    let server = MockServer::kv().await;
    let conn = Arc::new(
        Connection::connect(&server.endpoint(), &ConnectionConfig::new(server.url()))
            .await
            .unwrap(),
    );

    let tasks: Vec<_> = (0..200)
        .map(|i| {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                let reply = conn
                    .send(&Request::cmd("ECHO").arg(format!("msg-{i}")))
                    .await
                    .unwrap();
                (i, reply)
            })
        })
        .collect();

    for task in tasks {
        let (i, reply) = task.await.unwrap();
        assert_eq!(reply, bulk(&format!("msg-{i}")));
    }
    assert_eq!(conn.in_flight(), 0);
}

#[tokio::test]
async fn test_batch_replies_in_order() {
    let server = MockServer::kv().await;
    let client = Client::connect(config(&server)).await.unwrap();
    let replies = client
        .batch(&[
            Request::cmd("SET").arg("a").arg("1"),
            Request::cmd("INCR").arg("a"),
            Request::cmd("NOSUCH"),
            Request::cmd("GET").arg("a"),
        ])
        .await
        .unwrap();

    assert_eq!(replies.len(), 4);
    assert_eq!(replies[1].as_ref().unwrap(), &Response::Integer(2));
    assert!(replies[2].as_ref().unwrap().is_error());
    assert_eq!(replies[3].as_ref().unwrap(), &bulk("2"));
}

#[tokio::test]
async fn test_backpressure_rejects_over_limit() {
    let server = MockServer::start(|args| match args[0].as_str() {
        "BLPOP" => Reply::Silent,
        _ => Reply::Default,
    })
    .await;
    let config = ConnectionConfig::new(server.url())
        .with_max_waiting_handlers(2)
        .with_operation_timeout(None);
    let conn = Arc::new(Connection::connect(&server.endpoint(), &config).await.unwrap());

    let blocked: Vec<_> = (0..2)
        .map(|_| {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.send(&Request::cmd("BLPOP").arg("q").arg(0)).await })
        })
        .collect();
    assert!(common::eventually(|| conn.in_flight() == 2).await);

    let err = conn.send(&Request::cmd("PING")).await.unwrap_err();
    assert!(matches!(err, RedisError::Backpressure { max_waiting_handlers: 2 }));

    conn.close();
    for task in blocked {
        assert!(task.await.unwrap().is_err());
    }
}

#[tokio::test]
async fn test_operation_timeout() {
    let server = MockServer::start(|args| match args[0].as_str() {
        "BLPOP" => Reply::Silent,
        _ => Reply::Default,
    })
    .await;
    let config = ConnectionConfig::new(server.url())
        .with_operation_timeout(Some(Duration::from_millis(50)));
    let conn = Connection::connect(&server.endpoint(), &config).await.unwrap();
    let err = conn
        .send(&Request::cmd("BLPOP").arg("q").arg(0))
        .await
        .unwrap_err();
    assert!(matches!(err, RedisError::Timeout));
}

#[tokio::test]
async fn test_pool_bounds_connections_and_waiters() {
    let server = MockServer::start(|args| match args[0].as_str() {
        "BLPOP" => Reply::Silent,
        _ => Reply::Default,
    })
    .await;
    let pool = PoolConfig::default()
        .with_max_size(2)
        .with_max_waiting(1)
        .with_acquire_timeout(Duration::from_millis(200));
    let config = StandaloneConfig {
        base: ConnectionConfig::new(server.url())
            .with_operation_timeout(None)
            .with_pool_config(pool),
    };
    let client = redis_conduit::StandaloneClient::connect(config).await.unwrap();

    let blocked: Vec<_> = (0..2)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.send(&Request::cmd("BLPOP").arg("q").arg(0)).await })
        })
        .collect();
    assert!(common::eventually(|| server.count("BLPOP") == 2).await);

    // third caller waits, fourth is refused at once
    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.send(&Request::cmd("PING")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let err = client.send(&Request::cmd("PING")).await.unwrap_err();
    assert!(matches!(err, RedisError::PoolExhausted { .. }), "{err:?}");

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, RedisError::Timeout), "{err:?}");
    assert_eq!(server.connections(), 2);

    client.close();
    for task in blocked {
        task.abort();
    }
}
