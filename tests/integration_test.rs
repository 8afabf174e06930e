use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use futures::StreamExt;
use ipnet::Ipv4Net;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    sync::oneshot,
};
use tower::ServiceExt;

use weave_netplugin::{
    router, serve, Allocator, ContainerInfo, Driver, EventStream, Registrar, Runtime, VethPair,
    Watcher, Wiring, WiringError,
};

type Calls = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct FakeAllocator {
    calls: Calls,
    fail_release: bool,
}

#[async_trait]
impl Allocator for FakeAllocator {
    async fn allocate(&self, endpoint_id: &str) -> anyhow::Result<Ipv4Net> {
        self.calls.lock().unwrap().push(format!("allocate {endpoint_id}"));
        Ok("10.32.0.1/12".parse()?)
    }

    async fn release(&self, endpoint_id: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("release {endpoint_id}"));
        if self.fail_release {
            anyhow::bail!("lease for {endpoint_id} unknown");
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeWiring {
    calls: Calls,
    fail_delete: bool,
}

#[async_trait]
impl Wiring for FakeWiring {
    async fn create_pair(&self, pair: &VethPair) -> Result<(), WiringError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("create {} {}", pair.local, pair.peer));
        Ok(())
    }

    async fn attach(&self, iface: &str, bridge: &str) -> Result<(), WiringError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("attach {iface} {bridge}"));
        Ok(())
    }

    async fn delete_pair(&self, pair: &VethPair) -> Result<(), WiringError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete {}", pair.local));
        if self.fail_delete {
            return Err(WiringError::VethDelete {
                name: pair.local.clone(),
                reason: "No such device".to_string(),
            });
        }
        Ok(())
    }
}

struct QuietRuntime;

#[async_trait]
impl Runtime for QuietRuntime {
    async fn inspect(&self, id: &str) -> anyhow::Result<ContainerInfo> {
        anyhow::bail!("no such container {id}")
    }

    fn events(&self) -> EventStream {
        futures::stream::empty().boxed()
    }
}

struct NullRegistrar;

#[async_trait]
impl Registrar for NullRegistrar {
    async fn register(&self, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn deregister(&self, _: &str, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Plugin {
    app: Router,
    driver: Arc<Driver>,
    watcher: Arc<Watcher>,
    allocations: Calls,
    wirings: Calls,
}

fn plugin(allocator: FakeAllocator, wiring: FakeWiring) -> Plugin {
    let allocations = allocator.calls.clone();
    let wirings = wiring.calls.clone();

    let watcher = Watcher::new(
        Arc::new(QuietRuntime),
        Arc::new(NullRegistrar),
        Duration::from_secs(1),
    );
    let driver = Arc::new(
        Driver::new(watcher.clone(), Arc::new(allocator), Arc::new(wiring))
            .with_timeout(Duration::from_secs(1)),
    );

    Plugin {
        app: router(driver.clone()),
        driver,
        watcher,
        allocations,
        wirings,
    }
}

async fn call(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let (status, text) = call_raw(app, path, body.to_string()).await;
    (status, serde_json::from_str(&text).unwrap())
}

async fn call_raw(app: &Router, path: &str, body: String) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header(
                    header::CONTENT_TYPE,
                    "application/vnd.docker.plugins.v1.2+json",
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_handshake_and_capabilities() {
    let p = plugin(FakeAllocator::default(), FakeWiring::default());

    let (status, body) = call(&p.app, "/Plugin.Activate", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Implements": ["NetworkDriver"]}));

    let (status, body) = call(&p.app, "/NetworkDriver.GetCapabilities", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Scope": "global"}));
}

#[tokio::test]
async fn test_status_reports_version() {
    let p = plugin(FakeAllocator::default(), FakeWiring::default());

    let response = p
        .app
        .clone()
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(
        String::from_utf8(body.to_vec()).unwrap(),
        format!("weave plugin {}\n", env!("CARGO_PKG_VERSION"))
    );
}

#[tokio::test]
async fn test_network_lifecycle() {
    let p = plugin(FakeAllocator::default(), FakeWiring::default());

    let (status, body) = call(
        &p.app,
        "/NetworkDriver.CreateNetwork",
        json!({"NetworkID": "net1", "Options": {}, "IPv4Data": []}),
    )
    .await;
    assert_eq!((status, body), (StatusCode::OK, json!({})));
    assert!(p.watcher.is_watching("net1"));

    let (status, body) = call(
        &p.app,
        "/NetworkDriver.CreateNetwork",
        json!({"NetworkID": "net2"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"Err": "You get just one network, and you already made net1"})
    );
    assert_eq!(p.driver.current_network().await.as_deref(), Some("net1"));

    let (status, body) = call(
        &p.app,
        "/NetworkDriver.DeleteNetwork",
        json!({"NetworkID": "net2"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Err": "Network net2 not found"}));
    assert!(p.watcher.is_watching("net1"));

    let (status, body) = call(
        &p.app,
        "/NetworkDriver.DeleteNetwork",
        json!({"NetworkID": "net1"}),
    )
    .await;
    assert_eq!((status, body), (StatusCode::OK, json!({})));
    assert!(!p.watcher.is_watching("net1"));
    assert_eq!(p.driver.current_network().await, None);
}

#[tokio::test]
async fn test_create_endpoint() {
    let p = plugin(FakeAllocator::default(), FakeWiring::default());

    let (_, body) = call(
        &p.app,
        "/NetworkDriver.CreateEndpoint",
        json!({"NetworkID": "net1", "EndpointID": "ep1"}),
    )
    .await;
    assert_eq!(body, json!({"Err": "No such network net1"}));
    assert!(p.allocations.lock().unwrap().is_empty());

    call(
        &p.app,
        "/NetworkDriver.CreateNetwork",
        json!({"NetworkID": "net1"}),
    )
    .await;

    let (status, body) = call(
        &p.app,
        "/NetworkDriver.CreateEndpoint",
        json!({"NetworkID": "net1", "EndpointID": "ep1", "Interface": {}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"Interface": {"Address": "10.32.0.1/12", "MacAddress": "7a:42:0a:20:00:01"}})
    );
    assert_eq!(*p.allocations.lock().unwrap(), vec!["allocate ep1"]);
}

#[tokio::test]
async fn test_delete_endpoint_ignores_release_failure() {
    let p = plugin(
        FakeAllocator {
            fail_release: true,
            ..Default::default()
        },
        FakeWiring::default(),
    );

    let (status, body) = call(
        &p.app,
        "/NetworkDriver.DeleteEndpoint",
        json!({"NetworkID": "net1", "EndpointID": "ep1"}),
    )
    .await;
    assert_eq!((status, body), (StatusCode::OK, json!({})));

    // The release runs after the reply.
    p.driver.drain_releases().await;
    assert_eq!(*p.allocations.lock().unwrap(), vec!["release ep1"]);
}

#[tokio::test]
async fn test_endpoint_oper_info() {
    let p = plugin(FakeAllocator::default(), FakeWiring::default());

    let (status, body) = call(
        &p.app,
        "/NetworkDriver.EndpointOperInfo",
        json!({"NetworkID": "net1", "EndpointID": "ep1"}),
    )
    .await;
    assert_eq!((status, body), (StatusCode::OK, json!({"Value": {}})));
}

#[tokio::test]
async fn test_join_and_leave() {
    let p = plugin(
        FakeAllocator::default(),
        FakeWiring {
            fail_delete: true,
            ..Default::default()
        },
    );
    p.driver.set_nameserver("172.17.0.1").unwrap();

    let (status, body) = call(
        &p.app,
        "/NetworkDriver.Join",
        json!({
            "NetworkID": "net1",
            "EndpointID": "0123456789abcdef",
            "SandboxKey": "/var/run/docker/netns/abc",
            "Options": null
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "InterfaceName": {"SrcName": "vethwg01234", "DstPrefix": "ethwe"},
            "StaticRoutes": [{"Destination": "172.17.0.1/32", "RouteType": 1, "NextHop": ""}]
        })
    );

    let (status, body) = call(
        &p.app,
        "/NetworkDriver.Leave",
        json!({"NetworkID": "net1", "EndpointID": "0123456789abcdef"}),
    )
    .await;
    assert_eq!((status, body), (StatusCode::OK, json!({})));

    assert_eq!(
        *p.wirings.lock().unwrap(),
        vec![
            "create vethwl01234 vethwg01234",
            "attach vethwl01234 weave",
            "delete vethwl01234",
        ]
    );
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let p = plugin(FakeAllocator::default(), FakeWiring::default());

    for path in [
        "/NetworkDriver.CreateNetwork",
        "/NetworkDriver.DeleteEndpoint",
        "/NetworkDriver.Join",
    ] {
        let (status, text) = call_raw(&p.app, path, "{\"NetworkID\": ".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{path}");
        assert!(text.starts_with("Unable to decode JSON payload"), "{text}");
    }

    assert_eq!(p.driver.current_network().await, None);
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let p = plugin(FakeAllocator::default(), FakeWiring::default());

    let (status, _) = call_raw(&p.app, "/NetworkDriver.DiscoverNew", "{}".to_string()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Full round trip over a unix socket, as the container runtime talks to us.
#[tokio::test]
async fn test_serve_over_unix_socket() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("plugins").join("weave.sock");

    let p = plugin(FakeAllocator::default(), FakeWiring::default());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let server = {
        let driver = p.driver.clone();
        let socket_path = socket_path.clone();
        tokio::spawn(async move {
            serve(driver, &socket_path, async {
                let _ = stop_rx.await;
            })
            .await
        })
    };

    let mut stream = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(stream) = UnixStream::connect(&socket_path).await {
                break stream;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let body = r#"{"NetworkID":"net-sock"}"#;
    let request = format!(
        "POST /NetworkDriver.CreateNetwork HTTP/1.1\r\nHost: plugin\r\nContent-Type: application/vnd.docker.plugins.v1.2+json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.ends_with("{}\n"), "{response}");
    assert_eq!(p.driver.current_network().await.as_deref(), Some("net-sock"));

    stop_tx.send(()).unwrap();
    tokio_test::assert_ok!(server.await.unwrap());
}
