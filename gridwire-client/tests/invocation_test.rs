//! Request/response tests against mock members.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{
    echo_request, eventually, init_tracing, responder, MockCluster, ECHO_RESPONSE, FAILING_REQUEST,
    RETRYABLE_REQUEST,
};
use gridwire_client::core::protocol::error_codes;
use gridwire_client::core::protocol::messages::ping;
use gridwire_client::core::ClientMessage;
use gridwire_client::{ClientState, GridClient, GridError, InvocationTarget};

#[tokio::test]
async fn test_invoke_resolves_with_matching_response() {
    init_tracing();
    let cluster = MockCluster::start(1).await;
    let client = GridClient::connect(cluster.config()).await.unwrap();
    assert_eq!(client.state(), ClientState::ConnectedToCluster);
    assert_eq!(client.cluster_id(), Some(cluster.cluster_id()));

    let future = client.invoke(echo_request(), InvocationTarget::Any);
    let correlation_id = future.correlation_id();
    let response = future.await.unwrap();

    assert_eq!(response.message_type(), Some(ECHO_RESPONSE));
    assert_eq!(response.correlation_id(), Some(correlation_id));
    assert_eq!(responder(&response), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_ping_round_trip() {
    let cluster = MockCluster::start(1).await;
    let client = GridClient::connect(cluster.config()).await.unwrap();

    let response = client
        .invoke(ping::encode_request(), InvocationTarget::Any)
        .await
        .unwrap();
    ping::decode_response(&response).unwrap();

    client.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_invocations_are_demultiplexed() {
    let cluster = MockCluster::start(1).await;
    let client = GridClient::connect(cluster.config()).await.unwrap();

    let futures: Vec<_> = (0..64)
        .map(|_| client.invoke(echo_request(), InvocationTarget::Any))
        .collect();
    let ids: HashSet<i64> = futures.iter().map(|f| f.correlation_id()).collect();
    assert_eq!(ids.len(), 64);

    for future in futures {
        let expected = future.correlation_id();
        let response = future.await.unwrap();
        assert_eq!(response.correlation_id(), Some(expected));
    }
    assert_eq!(cluster.member(0).handled(), 64);

    client.shutdown().await;
}

#[tokio::test]
async fn test_smart_client_connects_to_every_member() {
    let cluster = MockCluster::start(3).await;
    let client = GridClient::connect(cluster.config()).await.unwrap();

    assert_eq!(client.members().len(), 3);
    assert!(eventually(Duration::from_secs(5), || client.connection_count() == 3).await);
    for index in 0..3 {
        assert!(client
            .connection_manager()
            .connection_for_member(cluster.member(index).uuid())
            .is_some());
    }

    client.shutdown().await;
}

#[tokio::test]
async fn test_partition_requests_go_to_the_owner() {
    let cluster = MockCluster::start(2).await;
    let client = GridClient::connect(cluster.config()).await.unwrap();
    assert!(eventually(Duration::from_secs(5), || client.connection_count() == 2).await);

    let partitions = client.partition_service();
    assert_eq!(partitions.partition_count(), common::PARTITION_COUNT);
    assert!(eventually(Duration::from_secs(5), || partitions.partition_owner(0).is_some()).await);
    for partition_id in 0..common::PARTITION_COUNT {
        let owner = cluster.owner_of(partition_id);
        assert_eq!(
            partitions.partition_owner(partition_id).map(|m| m.uuid()),
            Some(cluster.member(owner).uuid())
        );

        let response = client
            .invoke(echo_request(), InvocationTarget::Partition(partition_id))
            .await
            .unwrap();
        assert_eq!(responder(&response), owner);
    }

    client.shutdown().await;
}

#[tokio::test]
async fn test_member_target() {
    let cluster = MockCluster::start(2).await;
    let client = GridClient::connect(cluster.config()).await.unwrap();
    assert!(eventually(Duration::from_secs(5), || client.connection_count() == 2).await);

    let response = client
        .invoke(echo_request(), InvocationTarget::Member(cluster.member(1).uuid()))
        .await
        .unwrap();
    assert_eq!(responder(&response), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let cluster = MockCluster::start(1).await;
    let client = GridClient::connect(cluster.config()).await.unwrap();

    let request = ClientMessage::new_request(FAILING_REQUEST, -1);
    match client.invoke(request, InvocationTarget::Any).await {
        Err(GridError::Server(error)) => {
            assert_eq!(error.code(), error_codes::ILLEGAL_ARGUMENT);
            assert_eq!(error.message(), Some("bad argument"));
        }
        other => panic!("expected a server error, got {:?}", other),
    }

    client.shutdown().await;
}

fn pending_requests(client: &GridClient) -> usize {
    client
        .connection_manager()
        .active_connections()
        .iter()
        .map(|connection| connection.pending_count())
        .sum()
}

#[tokio::test]
async fn test_retryable_server_error_is_retried() {
    let cluster = MockCluster::start(1).await;
    let client = GridClient::connect(cluster.config()).await.unwrap();
    cluster.member(0).fail_retryable(2);

    let request = ClientMessage::new_request(RETRYABLE_REQUEST, -1);
    let response = client.invoke(request, InvocationTarget::Any).await.unwrap();

    assert_eq!(response.message_type(), Some(RETRYABLE_REQUEST + 1));
    assert_eq!(responder(&response), 0);
    assert_eq!(cluster.member(0).handled(), 3);

    client.shutdown().await;
}

#[tokio::test]
async fn test_repeated_retryable_error_ends_in_timeout() {
    let cluster = MockCluster::start(1).await;
    let client = GridClient::connect(cluster.config()).await.unwrap();
    cluster.member(0).fail_retryable(usize::MAX);

    let request = ClientMessage::new_request(RETRYABLE_REQUEST, -1);
    let result = client
        .invoke_with_timeout(request, InvocationTarget::Any, Duration::from_millis(300))
        .await;

    match result {
        Err(GridError::Timeout(message)) => assert!(message.contains("partition moved"), "{}", message),
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert!(cluster.member(0).handled() > 1);
    assert_eq!(pending_requests(&client), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let cluster = MockCluster::start(1).await;
    let client = GridClient::connect(cluster.config()).await.unwrap();
    cluster.member(0).set_silent(true);

    let result = client
        .invoke_with_timeout(echo_request(), InvocationTarget::Any, Duration::from_millis(200))
        .await;
    assert!(matches!(result, Err(GridError::Timeout(_))));
    assert_eq!(pending_requests(&client), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_invocation() {
    let cluster = MockCluster::start(1).await;
    let client = GridClient::connect(cluster.config()).await.unwrap();
    cluster.member(0).set_silent(true);

    let future = client.invoke(echo_request(), InvocationTarget::Any);
    assert!(eventually(Duration::from_secs(5), || cluster.member(0).handled() == 1).await);
    future.cancel();
    assert!(matches!(future.await, Err(GridError::Cancelled(_))));
    assert_eq!(pending_requests(&client), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_invoke_on_key_routes_by_partition() {
    let cluster = MockCluster::start(2).await;
    let client = GridClient::connect(cluster.config()).await.unwrap();
    assert!(eventually(Duration::from_secs(5), || client.connection_count() == 2).await);

    let partitions = client.partition_service();
    assert!(eventually(Duration::from_secs(5), || partitions.partition_owner(0).is_some()).await);

    let key = b"customer-42";
    let partition_id = partitions.partition_id_for_key(key).unwrap();
    let response = client.invoke_on_key(echo_request(), key).await.unwrap();
    assert_eq!(responder(&response), cluster.owner_of(partition_id));

    client.shutdown().await;
}
