//! End-to-end transport tests against the in-memory Pub/Sub.

use chrono::Utc;
use messaging::{
    BackoffStrategy, CancellationToken, RetryPolicy, TransactionContext, Transport,
    TransportError, TransportMessage,
};
use pubsub_transport::{
    InMemoryPubSub, PubSubBackend, PubSubConfig, PubSubTransport, SubscriptionName, TopicName,
};
use std::sync::Arc;
use std::time::Duration;
use test_utils::TestDataBuilder;

const PROJECT: &str = "test-project";

fn backend() -> InMemoryPubSub {
    InMemoryPubSub::new().with_pull_wait(Duration::from_millis(50))
}

fn config(queue: &str) -> PubSubConfig {
    PubSubConfig::new(PROJECT)
        .with_input_queue(queue)
        .with_propagation_delay(Duration::ZERO)
        .with_subscription_retry(RetryPolicy::new(
            3,
            BackoffStrategy::Fixed(Duration::from_millis(10)),
        ))
}

async fn receiver(backend: &InMemoryPubSub, queue: &str) -> PubSubTransport {
    test_utils::init_tracing();
    let transport = PubSubTransport::new(config(queue), Arc::new(backend.clone()));
    transport.initialize().await.unwrap();
    transport
}

async fn send_one(transport: &PubSubTransport, destination: &str, message: TransportMessage) {
    let mut ctx = TransactionContext::new();
    transport.send(destination, message, &mut ctx).await.unwrap();
    ctx.commit().await.unwrap();
}

async fn receive(transport: &PubSubTransport, ctx: &mut TransactionContext) -> Option<TransportMessage> {
    transport
        .receive(ctx, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_committed_message_is_not_redelivered() {
    let backend = backend();
    let transport = receiver(&backend, "orders").await;
    let subscription = SubscriptionName::new(PROJECT, "orders");

    send_one(
        &transport,
        "orders",
        TransportMessage::with_id("m1", b"small body".to_vec()),
    )
    .await;

    let mut ctx = TransactionContext::new();
    let message = receive(&transport, &mut ctx).await.expect("message");
    assert_eq!(message.message_id(), Some("m1"));
    assert_eq!(message.body(), b"small body");
    ctx.commit().await.unwrap();

    let mut ctx = TransactionContext::new();
    assert!(receive(&transport, &mut ctx).await.is_none());
    assert_eq!(backend.acknowledged(&subscription).await, 1);
    assert_eq!(backend.outstanding(&subscription).await, 0);
    assert_eq!(backend.pending(&subscription).await, 0);
}

#[tokio::test]
async fn test_aborted_message_is_redelivered() {
    let backend = backend();
    let transport = receiver(&backend, "orders").await;

    send_one(
        &transport,
        "orders",
        TransportMessage::with_id("m1", b"retry me".to_vec()),
    )
    .await;

    let mut ctx = TransactionContext::new();
    assert!(receive(&transport, &mut ctx).await.is_some());
    ctx.abort().await.unwrap();

    let mut ctx = TransactionContext::new();
    let message = receive(&transport, &mut ctx).await.expect("redelivered");
    assert_eq!(message.message_id(), Some("m1"));
    assert_eq!(message.body(), b"retry me");
    ctx.commit().await.unwrap();
}

#[tokio::test]
async fn test_expired_message_is_dropped_and_not_acknowledged() {
    let backend = backend();
    let transport = receiver(&backend, "orders").await;
    let subscription = SubscriptionName::new(PROJECT, "orders");

    let expired = TransportMessage::with_id("m1", b"stale".to_vec())
        .with_expiry(Utc::now() - chrono::Duration::seconds(60));
    send_one(&transport, "orders", expired).await;

    let mut ctx = TransactionContext::new();
    assert!(receive(&transport, &mut ctx).await.is_none());
    ctx.commit().await.unwrap();

    assert_eq!(backend.acknowledged(&subscription).await, 0);
}

#[tokio::test]
async fn test_long_header_arrives_truncated() {
    let backend = backend();
    let transport = receiver(&backend, "orders").await;

    let message = TransportMessage::with_id("m1", b"body".to_vec())
        .with_header("big", "x".repeat(2000))
        .with_header("small", "y".repeat(1024));
    send_one(&transport, "orders", message).await;

    let pulled = backend
        .pull(&SubscriptionName::new(PROJECT, "orders"), 1)
        .await
        .unwrap();

    let attributes = &pulled[0].message.attributes;
    assert_eq!(attributes["big"].chars().count(), 1024);
    assert_eq!(attributes["small"].chars().count(), 1024);
    assert_eq!(attributes["message-id"], "m1");
}

#[tokio::test]
async fn test_failed_send_resets_received_lease() {
    let backend = backend();
    let transport = receiver(&backend, "orders").await;
    let subscription = SubscriptionName::new(PROJECT, "orders");

    send_one(
        &transport,
        "orders",
        TransportMessage::with_id("m1", b"order".to_vec()),
    )
    .await;

    let mut ctx = TransactionContext::new();
    receive(&transport, &mut ctx).await.expect("message");
    transport
        .send(
            "no-such-topic",
            TransportMessage::with_id("r1", b"reply".to_vec()),
            &mut ctx,
        )
        .await
        .unwrap();

    let err = ctx.commit().await.unwrap_err();
    assert!(matches!(err, TransportError::Publisher { ref destination, .. } if destination == "no-such-topic"));
    assert_eq!(backend.acknowledged(&subscription).await, 0);
    assert_eq!(backend.outstanding(&subscription).await, 0);

    let mut ctx = TransactionContext::new();
    let message = receive(&transport, &mut ctx).await.expect("redelivered");
    assert_eq!(message.message_id(), Some("m1"));
    ctx.commit().await.unwrap();
}

#[tokio::test]
async fn test_handler_sends_are_published_before_ack() {
    let backend = backend();
    let transport = receiver(&backend, "orders").await;
    transport.create_queue("invoices").await.unwrap();
    let invoices = receiver(&backend, "invoices").await;

    send_one(
        &transport,
        "orders",
        TransportMessage::with_id("m1", b"order".to_vec()),
    )
    .await;

    let mut ctx = TransactionContext::new();
    receive(&transport, &mut ctx).await.expect("order");
    for n in 0..3 {
        let reply = TransportMessage::with_id(format!("inv-{n}"), b"invoice".to_vec());
        transport.send("invoices", reply, &mut ctx).await.unwrap();
    }
    ctx.commit().await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let mut ctx = TransactionContext::new();
        let message = receive(&invoices, &mut ctx).await.expect("invoice");
        ids.push(message.message_id().unwrap().to_string());
        ctx.commit().await.unwrap();
    }
    ids.sort();
    assert_eq!(ids, vec!["inv-0", "inv-1", "inv-2"]);
    assert_eq!(
        backend
            .acknowledged(&SubscriptionName::new(PROJECT, "orders"))
            .await,
        1
    );
}

#[tokio::test]
async fn test_create_queue_is_idempotent() {
    let backend = backend();
    let transport = PubSubTransport::new(PubSubConfig::new(PROJECT), Arc::new(backend.clone()));

    transport.create_queue("orders").await.unwrap();
    transport.create_queue("orders").await.unwrap();

    assert!(backend.topic_exists(&TopicName::new(PROJECT, "orders")).await);
}

#[tokio::test]
async fn test_initialize_twice_provisions_once() {
    let backend = backend();
    let transport = receiver(&backend, "orders").await;

    transport.initialize().await.unwrap();

    assert_eq!(
        transport.subscription(),
        Some(&SubscriptionName::new(PROJECT, "orders"))
    );
}

#[tokio::test]
async fn test_purge_of_missing_queue_succeeds() {
    let backend = backend();
    let transport = PubSubTransport::new(config("ghost"), Arc::new(backend.clone()));

    transport.purge_queue().await.unwrap();
    transport.delete_queue("ghost").await.unwrap();
}

#[tokio::test]
async fn test_purge_removes_topic_and_subscription() {
    let backend = backend();
    let builder = TestDataBuilder::from_test_name("test_purge_removes_topic_and_subscription");
    let queue = builder.queue("orders");
    let transport = receiver(&backend, &queue).await;

    transport.purge_queue().await.unwrap();

    assert!(!backend.topic_exists(&TopicName::new(PROJECT, &queue)).await);
    assert!(
        !backend
            .subscription_exists(&SubscriptionName::new(PROJECT, &queue))
            .await
    );
    transport.purge_queue().await.unwrap();
}

#[tokio::test]
async fn test_send_only_transport_receives_nothing() {
    let backend = backend();
    let transport = PubSubTransport::new(
        PubSubConfig::new(PROJECT).with_input_queue(""),
        Arc::new(backend.clone()),
    );
    transport.initialize().await.unwrap();

    let mut ctx = TransactionContext::new();
    assert!(receive(&transport, &mut ctx).await.is_none());
    assert_eq!(transport.address(), None);
}

#[tokio::test]
async fn test_cancellation_interrupts_waiting_pull() {
    let backend = InMemoryPubSub::new().with_pull_wait(Duration::from_secs(60));
    let transport = receiver(&backend, "orders").await;
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let mut ctx = TransactionContext::new();
    let received = tokio::time::timeout(Duration::from_secs(5), transport.receive(&mut ctx, &cancel))
        .await
        .expect("receive returned promptly")
        .unwrap();

    assert!(received.is_none());
    assert_eq!(ctx.pending_hooks(), 0);
}

#[tokio::test]
async fn test_unavailable_backend_surfaces_distinct_error() {
    let backend = backend();
    let transport = receiver(&backend, "orders").await;
    backend.set_unavailable(true).await;

    let mut ctx = TransactionContext::new();
    let err = transport
        .receive(&mut ctx, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Unavailable { .. }));
    assert!(err.should_retry(0));
}

#[tokio::test]
async fn test_initialize_waits_for_topic_propagation() {
    let backend = backend();
    backend.lag_subscription_creation(2).await;

    let transport = receiver(&backend, "orders").await;

    assert!(
        backend
            .subscription_exists(&SubscriptionName::new(PROJECT, "orders"))
            .await
    );
    assert!(transport.subscription().is_some());
}

#[tokio::test]
async fn test_initialize_fails_when_topic_never_propagates() {
    let backend = backend();
    backend.lag_subscription_creation(100).await;
    let transport = PubSubTransport::new(config("orders"), Arc::new(backend.clone()));

    let err = transport.initialize().await.unwrap_err();

    assert!(matches!(err, TransportError::ProvisioningExhausted { attempts: 3, .. }));
    assert!(err.to_string().contains("projects/test-project/topics/orders"));
    assert!(transport.subscription().is_none());
}

#[tokio::test]
async fn test_concurrent_senders_share_publisher() {
    let backend = backend();
    let transport = receiver(&backend, "orders").await;

    let tasks: Vec<_> = (0..8)
        .map(|n| {
            let transport = transport.clone();
            tokio::spawn(async move {
                let message = TransportMessage::with_id(format!("m{n}"), b"x".to_vec());
                let mut ctx = TransactionContext::new();
                transport.send("orders", message, &mut ctx).await.unwrap();
                ctx.commit().await.unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(
        backend
            .pending(&SubscriptionName::new(PROJECT, "orders"))
            .await,
        8
    );
}
