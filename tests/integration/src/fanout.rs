//! Fan-out of ordinary requests to every host.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tidepool_control::{Connection, ControlError, Request};
use tokio_util::sync::CancellationToken;

use crate::helpers::MockCluster;

#[tokio::test]
async fn echo_reaches_every_host() {
    let cluster = MockCluster::start(5).await;

    let mut req = Request::call("Echo", b"hello".to_vec());
    let resp = cluster
        .invoker()
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap();

    assert_eq!(resp.len(), 5);
    assert!(!resp.from_ms());
    let resp = resp.sorted();
    let mut expected = cluster.addrs();
    expected.sort();
    for (r, addr) in resp.responses().iter().zip(&expected) {
        assert_eq!(&r.addr, addr);
        assert_eq!(r.payload().unwrap(), &Bytes::from_static(b"hello"));
    }
}

#[tokio::test]
async fn stalled_host_bounded_by_deadline() {
    let cluster = MockCluster::start(4).await;
    cluster.stall(2);

    let started = Instant::now();
    let mut req = Request::call("Echo", Vec::new()).with_timeout(Duration::from_millis(300));
    let resp = cluster
        .invoker()
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(resp.successes().count(), 3);
    let stalled = resp
        .responses()
        .iter()
        .find(|r| r.addr == cluster.addr(2))
        .unwrap();
    assert!(matches!(stalled.error(), Some(ControlError::DeadlineExceeded)));
}

#[tokio::test]
async fn cancel_returns_promptly() {
    let cluster = MockCluster::start(3).await;
    for i in 0..3 {
        cluster.stall(i);
    }

    let cancel = CancellationToken::new();
    let canceler = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceler.cancel();
    });

    let started = Instant::now();
    let mut req = Request::call("Echo", Vec::new());
    let err = cluster.invoker().invoke(&cancel, &mut req).await.unwrap_err();

    assert!(matches!(err, ControlError::Canceled));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn errors_grouped_for_reporting() {
    let cluster = MockCluster::start(3).await;

    let mut req = Request::call("Nope", Vec::new());
    let resp = cluster
        .invoker()
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap();

    let errors = resp.host_errors();
    assert_eq!(errors.len(), 1);
    let (message, hosts) = errors.iter().next().unwrap();
    assert!(message.contains("Nope"));
    let mut expected = cluster.addrs();
    expected.sort();
    assert_eq!(hosts, &expected);
}

#[tokio::test]
async fn custom_closure_reuses_connection() {
    let cluster = MockCluster::start(2).await;

    let mut req = Request::new(|mut conn: Connection| async move {
        let first = conn.call("Echo", Bytes::from_static(b"a")).await?;
        let second = conn.call("Echo", Bytes::from_static(b"b")).await?;
        Ok::<_, ControlError>(Bytes::from([first, second].concat()))
    });
    let resp = cluster
        .invoker()
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap();

    assert_eq!(resp.successes().count(), 2);
    for (_, payload) in resp.successes() {
        assert_eq!(&payload[..], b"ab");
    }
}
