//! Harness for running a coordinator and workers in one process.

use std::net::SocketAddr;

use maskmul_coordinator::{
    AggregationProperties, Coordinator, CoordinatorError, CoordinatorProperties,
    OperandsProperties,
};
use maskmul_core::{vector, BigInt, Operands, Outcome};
use maskmul_worker::{DotProduct, Worker, WorkerError, WorkerReport};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
    time::Duration,
};

/// Coordinator config on an ephemeral local port.
pub fn coordinator_config(
    privacy: bool,
    mask_set_size: usize,
    timeout: u64,
) -> CoordinatorProperties {
    CoordinatorProperties {
        host: "127.0.0.1".to_string(),
        port: 0,
        concurrency: 8,
        aggregation: AggregationProperties {
            privacy,
            mask_set_size,
            timeout,
        },
        operands: OperandsProperties::default(),
        log: Default::default(),
    }
}

/// Binds a coordinator and runs it in the background.
pub async fn start_coordinator(
    config: &CoordinatorProperties,
    operands: Operands,
) -> (SocketAddr, JoinHandle<Result<Outcome, CoordinatorError>>) {
    let coordinator = Coordinator::bind(config, operands).await.unwrap();
    let addr = coordinator.local_addr().unwrap();
    (addr, tokio::spawn(coordinator.run()))
}

/// Returns the websocket URL of a coordinator.
pub fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/ws")
}

/// Spawns `count` honest workers named `{prefix}-{i}`.
pub fn spawn_workers(
    addr: SocketAddr,
    prefix: &str,
    count: usize,
) -> Vec<JoinHandle<Result<WorkerReport, WorkerError>>> {
    (0..count)
        .map(|i| {
            let worker = Worker::builder()
                .url(ws_url(addr))
                .worker_id(format!("{prefix}-{i}"))
                .idle_backoff(Duration::from_millis(10))
                .build()
                .unwrap();
            tokio::spawn(async move { worker.run(&DotProduct).await })
        })
        .collect()
}

/// Awaits every worker and returns the total number of answered tasks.
pub async fn join_workers(workers: Vec<JoinHandle<Result<WorkerReport, WorkerError>>>) -> usize {
    let mut completed = 0;
    for worker in workers {
        completed += worker.await.unwrap().unwrap().tasks_completed;
    }
    completed
}

/// The product computed locally.
pub fn expected_product(operands: &Operands) -> Vec<Vec<Option<BigInt>>> {
    operands
        .rows()
        .iter()
        .map(|row| {
            operands
                .columns()
                .iter()
                .map(|col| Some(vector::dot(row, col)))
                .collect()
        })
        .collect()
}

/// Sends a bare HTTP/1.1 GET and returns the response body.
pub async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected response: {head}");
    body.to_string()
}
