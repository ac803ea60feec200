//! Contract checks shared by every in-tree backend.

mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use busbar::bus::{Batcher, DefaultBatcher, Feature, MockPubSub, PubSub};
use common::*;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_publish_succeeds_or_reports_documented_error() {
    for (name, bus) in all_backends().await {
        assert!(
            bus.publish(&request("orders", "x")).await.is_ok(),
            "{} rejected a well-formed request",
            name
        );
        let err = bus.publish(&request("", "x")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{}", name);
    }
}

#[tokio::test]
async fn test_attempted_batches_have_one_status_per_entry_in_order() {
    for (name, bus) in all_backends().await {
        let batch = batch_of(5, "orders");
        let response = bus.batch_publish(&batch).await;

        if bus.features().contains(Feature::BatchOperations) || name == "mock-decompose" {
            assert_eq!(response.len(), batch.len(), "{}", name);
            for (entry, status) in batch.entries.iter().zip(&response.statuses) {
                assert_eq!(entry.entry_id, status.entry_id, "{}", name);
            }
        } else {
            assert!(response.is_empty(), "{}", name);
        }
    }
}

#[tokio::test]
async fn test_default_adapter_noop_batch_publish_records_nothing() {
    let bus = adapted_bus(BatchPolicy::NoOp).await;
    let response = bus.batch_publish(&batch_of(3, "orders")).await;
    assert_eq!(response.len(), 0);
}

#[tokio::test]
async fn test_default_adapter_decompose_matches_individual_publishes() {
    let inner = MockPubSub::new();
    inner.set_fail_on_topic("payments").await;
    let batched = DefaultBatcher::with_policy(inner, BatchPolicy::Decompose);

    let reference = MockPubSub::new();
    reference.set_fail_on_topic("payments").await;

    let batch: BatchPublishRequest = vec![
        request("orders", "a"),
        request("payments", "b"),
        request("orders", "c"),
    ]
    .into_iter()
    .collect();

    let response = batched.batch_publish(&batch).await;

    assert_eq!(response.len(), 3);
    for (entry, status) in batch.entries.iter().zip(&response.statuses) {
        let expected = reference.publish(&entry.request).await;
        assert_eq!(status.result, expected);
    }
    // Same requests, same order.
    assert_eq!(
        batched.into_inner().take_published().await,
        reference.take_published().await
    );
}

#[tokio::test]
async fn test_default_adapter_batch_subscribe_registers_nothing() {
    for policy in [BatchPolicy::NoOp, BatchPolicy::Decompose] {
        let bus = adapted_bus(policy).await;
        let handler = Counter::new();
        let count = handler.count();

        let result = bus
            .batch_subscribe(
                CancellationToken::new(),
                SubscribeRequest::new("orders"),
                Arc::new(handler),
            )
            .await;
        assert!(result.is_ok());

        bus.batch_publish(&batch_of(3, "orders")).await;
        bus.publish(&request("orders", "x")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_ping_without_capability_is_not_supported() {
    for policy in [BatchPolicy::NoOp, BatchPolicy::Decompose] {
        let bus = adapted_bus(policy).await;
        let err = ping(bus.as_ref()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert_ne!(err.kind(), ErrorKind::Connection);
    }
}

#[tokio::test]
async fn test_ping_with_capability() {
    let bus = channel_bus().await;
    assert!(ping(bus.as_ref()).await.is_ok());
}

#[tokio::test]
async fn test_cancel_stops_handler_on_channel() {
    let bus = channel_bus().await;
    let handler = Counter::new();
    let count = handler.count();
    let ctx = CancellationToken::new();

    bus.subscribe(ctx.clone(), SubscribeRequest::new("orders"), Arc::new(handler))
        .await
        .unwrap();

    bus.publish(&request("orders", "1")).await.unwrap();
    bus.publish(&request("orders", "2")).await.unwrap();
    wait_for(&count, 2).await;

    ctx.cancel();
    bus.publish(&request("orders", "3")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancel_stops_handler_on_mock() {
    let bus = MockPubSub::new();
    let handler = Counter::new();
    let count = handler.count();
    let ctx = CancellationToken::new();

    bus.subscribe(ctx.clone(), SubscribeRequest::new("orders"), Arc::new(handler))
        .await
        .unwrap();

    bus.deliver(NewMessage::new("orders", "1")).await;
    bus.deliver(NewMessage::new("orders", "2")).await;
    ctx.cancel();
    bus.deliver(NewMessage::new("orders", "3")).await;

    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_publishes_are_observed_unchanged() {
    let mut bus = DefaultBatcher::new(MockPubSub::new());
    bus.init(Metadata::new("concurrency")).await.unwrap();
    let bus = Arc::new(bus);

    let tasks = (0..20).map(|i| {
        let bus = bus.clone();
        tokio::spawn(async move {
            let req = request(&format!("topic-{}", i), &format!("payload-{}", i))
                .with_metadata("seq", i.to_string());
            bus.publish(&req).await.map(|_| req)
        })
    });

    let sent: Vec<PublishRequest> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let observed = Arc::try_unwrap(bus)
        .ok()
        .expect("all publishers have finished")
        .into_inner()
        .take_published()
        .await;
    assert_eq!(observed.len(), sent.len());
    let observed: HashSet<_> = observed
        .iter()
        .map(|r| (r.topic.clone(), r.data.clone(), r.metadata.get("seq").cloned()))
        .collect();
    for req in &sent {
        assert!(observed.contains(&(
            req.topic.clone(),
            req.data.clone(),
            req.metadata.get("seq").cloned()
        )));
    }
}

#[tokio::test]
async fn test_close_is_safe_without_subscriptions() {
    for (name, bus) in all_backends().await {
        assert!(bus.close().await.is_ok(), "{}", name);
        assert!(bus.close().await.is_ok(), "{}", name);
    }
}
