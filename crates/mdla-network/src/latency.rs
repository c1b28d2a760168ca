//! TCP connect latency to proxy servers.

use mdla_link::ServerDescriptor;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

/// Measure how long a TCP connect to the server takes.
///
/// `None` means timeout, refusal or an empty address.
pub async fn probe(descriptor: &ServerDescriptor, timeout: Duration) -> Option<Duration> {
    probe_endpoint(&descriptor.address, descriptor.port, timeout).await
}

/// Probe many servers concurrently, at most `concurrency` at a time.
///
/// Returns one latency per input server, preserving order.
pub async fn probe_all(
    descriptors: &[ServerDescriptor],
    timeout: Duration,
    concurrency: usize,
) -> Vec<Option<Duration>> {
    if descriptors.is_empty() {
        return Vec::new();
    }

    let mut results = vec![None; descriptors.len()];
    let limit = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set = JoinSet::new();

    for (idx, descriptor) in descriptors.iter().enumerate() {
        let host = descriptor.address.clone();
        let port = descriptor.port;
        let limit = Arc::clone(&limit);
        set.spawn(async move {
            let _permit = limit.acquire_owned().await.ok();
            (idx, probe_endpoint(&host, port, timeout).await)
        });
    }

    while let Some(joined) = set.join_next().await {
        if let Ok((idx, latency)) = joined {
            results[idx] = latency;
        }
    }

    results
}

async fn probe_endpoint(host: &str, port: u16, timeout: Duration) -> Option<Duration> {
    if host.is_empty() {
        return None;
    }

    let started = tokio::time::Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => Some(started.elapsed()),
        Ok(Err(e)) => {
            debug!("Probe {}:{} failed: {}", host, port, e);
            None
        }
        Err(_) => {
            debug!("Probe {}:{} timed out", host, port);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdla_link::ProtocolKind;
    use tokio::net::TcpListener;

    async fn accepting_listener() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while listener.accept().await.is_ok() {}
        });
        port
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_probe_reachable() {
        let port = accepting_listener().await;
        let d = ServerDescriptor::new(ProtocolKind::Vless, "127.0.0.1", port);
        assert!(probe(&d, Duration::from_millis(500)).await.is_some());
    }

    #[tokio::test]
    async fn test_probe_empty_address() {
        let d = ServerDescriptor::new(ProtocolKind::Tuic, "", 443);
        assert!(probe(&d, Duration::from_millis(100)).await.is_none());
    }

    #[tokio::test]
    async fn test_probe_all_preserves_order() {
        let open = accepting_listener().await;
        let closed = closed_port().await;

        let servers = vec![
            ServerDescriptor::new(ProtocolKind::Trojan, "127.0.0.1", closed),
            ServerDescriptor::new(ProtocolKind::Vless, "127.0.0.1", open),
            ServerDescriptor::new(ProtocolKind::Hysteria, "", 443),
        ];
        let latencies = probe_all(&servers, Duration::from_millis(500), 2).await;

        assert_eq!(latencies.len(), 3);
        assert!(latencies[0].is_none());
        assert!(latencies[1].is_some());
        assert!(latencies[2].is_none());
    }

    #[tokio::test]
    async fn test_probe_all_empty() {
        assert!(probe_all(&[], Duration::from_millis(100), 4).await.is_empty());
    }
}
