//! Connection failures as operators see them.

use std::time::Duration;

use tidepool_control::{ControlError, FaultCode, Invoker, Request, RetryPolicy};
use tidepool_protocol::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::helpers::{dead_addr, MockCluster};

#[tokio::test]
async fn refused_connection_carries_resolution() {
    let cluster = MockCluster::start(1).await;
    let dead = dead_addr().await;

    let mut req = Request::call("Echo", b"hi".to_vec()).with_hosts(vec![dead.clone(), cluster.addr(0)]);
    let resp = cluster
        .invoker()
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap();

    assert_eq!(resp.successes().count(), 1);
    let failed = resp.responses().iter().find(|r| r.addr == dead).unwrap();
    let fault = failed.error().and_then(|e| e.fault()).expect("classified fault");
    assert_eq!(fault.code, FaultCode::ConnectionRefused);
    assert!(fault.resolution.contains(&dead));
    assert!(fault.report().contains("resolution:"));
}

#[tokio::test]
async fn hangup_is_connection_closed() {
    let cluster = MockCluster::start(1).await;

    let mut req = Request::call("Hangup", Vec::new());
    let resp = cluster
        .invoker()
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap();

    let err = resp.responses()[0].error().unwrap();
    assert_eq!(err.fault().map(|f| f.code), Some(FaultCode::ConnectionClosed));
}

#[tokio::test]
async fn management_retries_refused_hosts() {
    let dead = dead_addr().await;
    let cluster = MockCluster::start(1).await;
    let invoker = Invoker::new(cluster.config());

    let mut req = Request::call("SystemQuery", Vec::new())
        .management()
        .with_hosts(vec![dead])
        .with_timeout(Duration::from_secs(10))
        .with_retry(RetryPolicy::new().max_tries(3));
    let err = invoker
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap_err();

    match err {
        ControlError::RetriesExhausted { tries, last } => {
            assert_eq!(tries, 3);
            assert_eq!(last.fault().map(|f| f.code), Some(FaultCode::ConnectionRefused));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn wrong_system_name_rejected() {
    let cluster = MockCluster::start(2).await;
    let mut config = cluster.config();
    config.name = "elsewhere".to_string();
    let invoker = Invoker::new(config);

    let mut req = Request::call("Echo", Vec::new());
    let resp = invoker
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap();

    assert_eq!(resp.error_count(), 2);
    for r in resp.responses() {
        let status = r.error().and_then(|e| e.status()).unwrap();
        assert_eq!(status.code, StatusCode::InvalidArgument);
    }
}

#[tokio::test]
async fn request_sys_overrides_config() {
    let cluster = MockCluster::start(1).await;
    let mut config = cluster.config();
    config.name = "elsewhere".to_string();
    let invoker = Invoker::new(config);

    let mut req = Request::call("Echo", b"ok".to_vec()).with_sys(crate::helpers::SYS);
    let resp = invoker
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap();
    assert_eq!(resp.successes().count(), 1);
}
