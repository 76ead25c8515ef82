//! Leader discovery against a live mock cluster.

use std::time::Duration;

use tidepool_control::{ControlError, FaultCode, Request, RetryPolicy};
use tokio_util::sync::CancellationToken;

use crate::helpers::MockCluster;

fn system_query() -> Request {
    Request::call("SystemQuery", Vec::new())
        .management()
        .with_timeout(Duration::from_secs(10))
}

#[tokio::test]
async fn follows_leader_hint() {
    let cluster = MockCluster::start(5).await;
    cluster.set_leader(Some(3));

    let mut req = system_query().with_hosts(vec![cluster.addr(0)]);
    let resp = cluster
        .invoker()
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap();

    let leader = cluster.addr(3);
    assert_eq!(resp.len(), 1);
    assert_eq!(resp.attempt(), 2);
    assert_eq!(resp.responses()[0].addr, leader);
    assert_eq!(resp.ms_response().unwrap(), format!("leader {leader}").as_bytes());
    assert_eq!(req.target_hosts(), [leader.clone()]);
    assert_eq!(cluster.hits(), vec![cluster.addr(0), leader]);
    assert_eq!(cluster.refusals(), vec![cluster.addr(0)]);
}

#[tokio::test]
async fn falls_back_to_replica_list() {
    let cluster = MockCluster::start(5).await;
    cluster.set_leader(Some(4));
    cluster.hide_leader_hint();

    let mut req = system_query().with_hosts(vec![cluster.addr(0)]);
    let resp = cluster
        .invoker()
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap();

    // second attempt goes to every replica; only the leader answers
    assert_eq!(resp.attempt(), 2);
    assert_eq!(resp.len(), 1);
    assert_eq!(req.target_hosts(), [cluster.addr(4)]);
    assert_eq!(cluster.hits().len(), 1 + 5);
}

#[tokio::test]
async fn discovers_leader_from_hostlist() {
    let cluster = MockCluster::start(8).await;
    cluster.set_leader(Some(6));

    let mut req = system_query();
    let resp = cluster
        .invoker()
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap();

    assert_eq!(resp.responses()[0].addr, cluster.addr(6));
    // at most five candidates, then possibly one redirect to the leader
    assert!(cluster.hits().len() <= 6);
}

#[tokio::test]
async fn follows_leader_change_between_calls() {
    let cluster = MockCluster::start(3).await;
    let invoker = cluster.invoker();

    cluster.set_leader(Some(0));
    let mut req = system_query();
    invoker.invoke(&CancellationToken::new(), &mut req).await.unwrap();
    assert_eq!(req.target_hosts(), [cluster.addr(0)]);

    // reuse the request: it now targets the old leader, which redirects
    cluster.set_leader(Some(2));
    req.set_timeout(Duration::from_secs(10));
    invoker.invoke(&CancellationToken::new(), &mut req).await.unwrap();
    assert_eq!(req.target_hosts(), [cluster.addr(2)]);
}

#[tokio::test]
async fn no_leader_times_out() {
    let cluster = MockCluster::start(3).await;

    let mut req = system_query().with_timeout(Duration::from_millis(500));
    let err = cluster
        .invoker()
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap_err();

    let fault = err.fault().expect("request timeout fault");
    assert_eq!(fault.code, FaultCode::RequestTimeout);
    assert!(cluster.hits().len() > 3, "expected several attempts");
}

#[tokio::test]
async fn no_leader_max_tries() {
    let cluster = MockCluster::start(3).await;

    let mut req = system_query().with_retry(RetryPolicy::new().max_tries(4));
    let err = cluster
        .invoker()
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap_err();

    match err {
        ControlError::RetriesExhausted { tries, last } => {
            assert_eq!(tries, 4);
            assert!(last.status().is_some());
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn unimplemented_method_is_fatal() {
    let cluster = MockCluster::start(3).await;
    cluster.set_leader(Some(0));

    let mut req = Request::call("PoolFrobnicate", Vec::new())
        .management()
        .with_hosts(vec![cluster.addr(1)]);
    let err = cluster
        .invoker()
        .invoke(&CancellationToken::new(), &mut req)
        .await
        .unwrap_err();

    assert!(err.is_unimplemented());
    assert_eq!(cluster.hits().len(), 1);
}
