//! Delivery-path coverage: receive variants, listener dispatch,
//! acknowledgment routing, seek barrier, batch receive and stats fan-out

mod common;

use common::*;
use futures::StreamExt;
use parking_lot::Mutex;
use relaymq_client::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

async fn two_partition_consumer(
    lookup: &Arc<MockLookup>,
    factory: &Arc<MockChildFactory>,
    config: ConsumerConfig,
) -> Arc<MultiTopicsConsumer> {
    lookup.set_partitions("t1", 2);
    subscribe_consumer(&["t1"], lookup, factory, config)
        .await
        .expect("subscribe should succeed")
}

#[tokio::test]
async fn test_receive_and_ack_routes_to_owning_partition() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let config = ConsumerConfigBuilder::new()
        .unacked_messages_timeout(Duration::from_secs(60))
        .tick_duration(Duration::from_secs(10))
        .build();
    let consumer = two_partition_consumer(&lookup, &factory, config).await;

    factory.child("t1-partition-0").emit(0, "m0").await;
    factory.child("t1-partition-1").emit(0, "m1").await;

    let first = consumer.receive().await.unwrap();
    let second = consumer.receive().await.unwrap();
    let mut topics: Vec<_> = [&first, &second]
        .iter()
        .map(|m| m.topic_name().unwrap().to_string())
        .collect();
    topics.sort();
    assert_eq!(topics, vec!["t1-partition-0", "t1-partition-1"]);
    assert_eq!(consumer.unacked_message_count(), 2);

    // permits are replenished at consumption time
    assert_eq!(factory.child("t1-partition-0").event_count("permit"), 1);
    assert_eq!(factory.child("t1-partition-1").event_count("permit"), 1);

    consumer.acknowledge(first.id()).await.unwrap();
    consumer.acknowledge(second.id()).await.unwrap();
    assert_eq!(consumer.unacked_message_count(), 0);

    let p0_acks = factory.child("t1-partition-0").event_count("ack:");
    let p1_acks = factory.child("t1-partition-1").event_count("ack:");
    assert_eq!((p0_acks, p1_acks), (1, 1));

    assert_eq!(consumer.metrics().messages_received.load(std::sync::atomic::Ordering::Relaxed), 2);
}

#[tokio::test]
async fn test_ack_without_topic_stamp_is_unroutable() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    let unstamped = MessageId::new(0, 5);
    assert!(matches!(
        consumer.acknowledge(&unstamped).await,
        Err(RelaymqClientError::OperationNotSupported { .. })
    ));

    consumer.close().await.unwrap();
    assert_eq!(
        consumer.acknowledge(&unstamped).await.err(),
        Some(RelaymqClientError::AlreadyClosed)
    );
}

#[tokio::test]
async fn test_ack_list_fans_out_per_topic() {
    let lookup = MockLookup::new();
    lookup.set_partitions("t1", 1);
    lookup.set_partitions("t2", 1);
    let factory = MockChildFactory::new();
    let consumer = subscribe_consumer(&["t1", "t2"], &lookup, &factory, ConsumerConfig::default())
        .await
        .unwrap();

    factory.child("t1-partition-0").emit(0, "a").await;
    factory.child("t2-partition-0").emit(0, "b").await;
    let first = consumer.receive().await.unwrap();
    let second = consumer.receive().await.unwrap();

    consumer
        .acknowledge_list(vec![first.id().clone(), second.id().clone()])
        .await
        .unwrap();
    assert_eq!(factory.child("t1-partition-0").event_count("ack_list:1"), 1);
    assert_eq!(factory.child("t2-partition-0").event_count("ack_list:1"), 1);

    // an id with no topic stamp rejects the whole list
    assert!(matches!(
        consumer.acknowledge_list(vec![MessageId::new(0, 9)]).await,
        Err(RelaymqClientError::OperationNotSupported { .. })
    ));
}

#[tokio::test]
async fn test_ack_list_with_unsubscribed_topic_is_unroutable() {
    let lookup = MockLookup::new();
    lookup.set_partitions("t1", 1);
    lookup.set_partitions("t2", 1);
    let factory = MockChildFactory::new();
    let consumer = subscribe_consumer(&["t1", "t2"], &lookup, &factory, ConsumerConfig::default())
        .await
        .unwrap();

    factory.child("t1-partition-0").emit(0, "a").await;
    let msg = consumer.receive().await.unwrap();
    consumer.unsubscribe_topic("t1").await.unwrap();

    assert!(matches!(
        consumer.acknowledge_list(vec![msg.id().clone()]).await,
        Err(RelaymqClientError::OperationNotSupported { .. })
    ));
}

#[tokio::test]
async fn test_cumulative_ack_routes_and_rejects_unknown_topics() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    factory.child("t1-partition-0").emit(3, "m").await;
    let msg = consumer.receive().await.unwrap();

    consumer.acknowledge_cumulative(msg.id()).await.unwrap();
    assert_eq!(factory.child("t1-partition-0").event_count("ack_cumulative:"), 1);

    assert!(matches!(
        consumer.acknowledge_cumulative(&MessageId::new(0, 9)).await,
        Err(RelaymqClientError::OperationNotSupported { .. })
    ));
}

#[tokio::test]
async fn test_negative_ack_routes_and_ignores_unknown_ids() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    factory.child("t1-partition-1").emit(0, "m").await;
    let msg = consumer.receive().await.unwrap();

    consumer.negative_acknowledge(msg.id());
    assert_eq!(factory.child("t1-partition-1").event_count("nack:"), 1);

    // silently ignored
    consumer.negative_acknowledge(&MessageId::new(0, 99));
}

#[tokio::test]
async fn test_redeliver_broadcast_clears_the_tracker() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let config = ConsumerConfigBuilder::new()
        .unacked_messages_timeout(Duration::from_secs(60))
        .build();
    let consumer = two_partition_consumer(&lookup, &factory, config).await;

    factory.child("t1-partition-0").emit(0, "m").await;
    consumer.receive().await.unwrap();
    assert_eq!(consumer.unacked_message_count(), 1);

    consumer.redeliver_unacknowledged_messages();
    assert_eq!(consumer.unacked_message_count(), 0);
    assert_eq!(factory.child("t1-partition-0").event_count("redeliver_all"), 1);
    assert_eq!(factory.child("t1-partition-1").event_count("redeliver_all"), 1);
}

#[tokio::test]
async fn test_selective_redeliver_needs_shared_subscription() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let config = ConsumerConfigBuilder::new()
        .subscription_type(SubscriptionType::Shared)
        .build();
    let consumer = two_partition_consumer(&lookup, &factory, config).await;

    factory.child("t1-partition-0").emit(0, "a").await;
    factory.child("t1-partition-1").emit(0, "b").await;
    let first = consumer.receive().await.unwrap();
    let second = consumer.receive().await.unwrap();

    let ids: HashSet<_> = [first.id().clone(), second.id().clone()].into_iter().collect();
    consumer.redeliver_unacknowledged(ids);
    assert_eq!(factory.child("t1-partition-0").event_count("redeliver:1"), 1);
    assert_eq!(factory.child("t1-partition-1").event_count("redeliver:1"), 1);
    assert_eq!(factory.child("t1-partition-0").event_count("redeliver_all"), 0);
}

#[tokio::test]
async fn test_selective_redeliver_degrades_to_broadcast_for_exclusive() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    factory.child("t1-partition-0").emit(0, "a").await;
    let msg = consumer.receive().await.unwrap();

    consumer.redeliver_unacknowledged([msg.id().clone()].into_iter().collect());
    assert_eq!(factory.child("t1-partition-0").event_count("redeliver_all"), 1);
    assert_eq!(factory.child("t1-partition-1").event_count("redeliver_all"), 1);
    assert_eq!(factory.child("t1-partition-0").event_count("redeliver:"), 1);
}

#[tokio::test]
async fn test_receive_with_timeout_times_out() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    assert_eq!(
        consumer.receive_with_timeout(Duration::from_millis(30)).await.err(),
        Some(RelaymqClientError::Timeout)
    );

    factory.child("t1-partition-0").emit(0, "m").await;
    assert!(consumer.receive_with_timeout(Duration::from_millis(30)).await.is_ok());
}

#[tokio::test]
async fn test_receive_async_pops_immediately_when_resident() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    factory.child("t1-partition-0").emit(4, "m").await;
    let msg = consumer.receive_async().await.unwrap();
    assert_eq!(msg.id().offset(), 4);
}

#[tokio::test]
async fn test_parked_receive_is_woken_without_touching_the_queue() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    let parked = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.receive_async().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    factory.child("t1-partition-0").emit(7, "wakeup").await;
    let msg = parked.await.unwrap().unwrap();
    assert_eq!(msg.id().offset(), 7);
    assert_eq!(msg.topic_name(), Some("t1-partition-0"));

    // the message bypassed the queue entirely
    assert_eq!(consumer.prefetched_message_count(), 0);
    assert_eq!(consumer.has_message_available().await, Ok(false));
    wait_until("permit replenished", || {
        factory.child("t1-partition-0").event_count("permit") == 1
    })
    .await;
}

#[tokio::test]
async fn test_parked_receive_races_with_concurrent_delivery() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    // No pre-sleep: delivery runs concurrently with waiter registration,
    // so every interleaving of pop-or-park and push must still resolve.
    for round in 0..50i64 {
        let waiter = {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.receive_async().await })
        };
        factory.child("t1-partition-0").emit(round, "racy").await;

        let msg = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("parked receive must not hang when delivery races with registration")
            .unwrap()
            .unwrap();
        assert_eq!(msg.id().offset(), round);
        assert_eq!(consumer.prefetched_message_count(), 0);
    }
}

#[tokio::test]
async fn test_concurrent_parked_receives_and_deliveries_all_resolve() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    let first = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.receive_async().await })
    };
    let second = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.receive_async().await })
    };

    let child0 = factory.child("t1-partition-0");
    let child1 = factory.child("t1-partition-1");
    let emit0 = tokio::spawn(async move { child0.emit(1, "a").await });
    let emit1 = tokio::spawn(async move { child1.emit(2, "b").await });
    emit0.await.unwrap();
    emit1.await.unwrap();

    let mut offsets = Vec::new();
    for waiter in [first, second] {
        let msg = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("every parked receive must observe one delivery")
            .unwrap()
            .unwrap();
        offsets.push(msg.id().offset());
    }
    offsets.sort();
    assert_eq!(offsets, vec![1, 2]);
    assert_eq!(consumer.prefetched_message_count(), 0);
}

#[tokio::test]
async fn test_listener_mode_dispatches_and_disables_receive() {
    let lookup = MockLookup::new();
    lookup.set_partitions("t1", 2);
    let factory = MockChildFactory::new();

    let collected: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();
    let config = ConsumerConfigBuilder::new()
        .message_listener(move |_consumer, msg| {
            sink.lock().push(msg);
        })
        .build();

    let consumer = subscribe_consumer(&["t1"], &lookup, &factory, config)
        .await
        .unwrap();

    // children start paused until the whole consumer is ready, then the
    // listeners are resumed
    for child in factory.children() {
        assert!(child.start_paused);
        wait_until("listener resumed", || child.event_count("resume") >= 1).await;
    }

    factory.child("t1-partition-0").emit(0, "a").await;
    factory.child("t1-partition-1").emit(0, "b").await;
    wait_until("listener collected messages", || collected.lock().len() == 2).await;

    // processed messages replenish permits even on the listener path
    wait_until("permits replenished", || {
        factory.child("t1-partition-0").event_count("permit") == 1
            && factory.child("t1-partition-1").event_count("permit") == 1
    })
    .await;

    assert!(matches!(
        consumer.receive().await,
        Err(RelaymqClientError::InvalidConfiguration { .. })
    ));
    assert!(matches!(
        consumer.batch_receive().await,
        Err(RelaymqClientError::InvalidConfiguration { .. })
    ));
}

#[tokio::test]
async fn test_listener_stays_paused_when_configured() {
    let lookup = MockLookup::new();
    lookup.set_partitions("t1", 1);
    let factory = MockChildFactory::new();

    let config = ConsumerConfigBuilder::new()
        .message_listener(|_consumer, _msg| {})
        .start_paused(true)
        .build();
    let consumer = subscribe_consumer(&["t1"], &lookup, &factory, config)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(factory.child("t1-partition-0").event_count("resume"), 0);

    consumer.resume_message_listener().unwrap();
    assert_eq!(factory.child("t1-partition-0").event_count("resume"), 1);
    consumer.pause_message_listener().unwrap();
    assert_eq!(factory.child("t1-partition-0").event_count("pause"), 1);
}

#[tokio::test]
async fn test_listener_control_requires_a_listener() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    assert!(matches!(
        consumer.pause_message_listener(),
        Err(RelaymqClientError::InvalidConfiguration { .. })
    ));
    assert!(matches!(
        consumer.resume_message_listener(),
        Err(RelaymqClientError::InvalidConfiguration { .. })
    ));
}

#[tokio::test]
async fn test_batch_receive_returns_when_count_threshold_met() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let config = ConsumerConfigBuilder::new()
        .batch_receive_policy(BatchReceivePolicy::new(3, -1, Duration::from_secs(5)).unwrap())
        .build();
    let consumer = two_partition_consumer(&lookup, &factory, config).await;

    let child = factory.child("t1-partition-0");
    for offset in 0..4 {
        child.emit(offset, "m").await;
    }

    let batch = consumer.batch_receive().await.unwrap();
    assert_eq!(batch.len(), 3);
    assert_eq!(consumer.prefetched_message_count(), 1);
}

#[tokio::test]
async fn test_batch_receive_delivers_partial_batch_on_timeout() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let config = ConsumerConfigBuilder::new()
        .batch_receive_policy(BatchReceivePolicy::new(5, -1, Duration::from_millis(80)).unwrap())
        .build();
    let consumer = two_partition_consumer(&lookup, &factory, config).await;

    factory.child("t1-partition-0").emit(0, "a").await;
    factory.child("t1-partition-0").emit(1, "b").await;

    let batch = consumer.batch_receive().await.unwrap();
    assert_eq!(batch.len(), 2);
}

#[tokio::test]
async fn test_batch_receive_is_woken_by_arriving_messages() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let config = ConsumerConfigBuilder::new()
        .batch_receive_policy(BatchReceivePolicy::new(2, -1, Duration::from_secs(5)).unwrap())
        .build();
    let consumer = two_partition_consumer(&lookup, &factory, config).await;

    let pending = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.batch_receive().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    factory.child("t1-partition-0").emit(0, "a").await;
    factory.child("t1-partition-0").emit(1, "b").await;

    let batch = pending.await.unwrap().unwrap();
    assert_eq!(batch.len(), 2);
}

#[tokio::test]
async fn test_seek_to_earliest_broadcasts_with_drain_barrier() {
    let lookup = MockLookup::new();
    lookup.set_partitions("t1", 2);
    lookup.set_partitions("t2", 1);
    let factory = MockChildFactory::new();
    let consumer = subscribe_consumer(&["t1", "t2"], &lookup, &factory, ConsumerConfig::default())
        .await
        .unwrap();

    factory.child("t1-partition-0").emit(0, "stale").await;
    assert_eq!(consumer.prefetched_message_count(), 1);

    consumer.seek(MessageId::earliest()).await.unwrap();

    assert_eq!(consumer.prefetched_message_count(), 0);
    for child in factory.children() {
        assert_eq!(child.event_count("seek:earliest"), 1);
        assert_eq!(child.event_count("pause"), 1);
        wait_until("listener resumed after seek", || child.event_count("resume") == 1).await;
    }
}

#[tokio::test]
async fn test_seek_single_partition_only_moves_that_cursor() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    factory.child("t1-partition-0").emit(5, "m").await;
    let msg = consumer.receive().await.unwrap();

    consumer.seek(msg.id().clone()).await.unwrap();
    assert_eq!(factory.child("t1-partition-0").event_count("seek:0:5"), 1);
    assert_eq!(factory.child("t1-partition-1").event_count("seek:"), 0);
    // the barrier still pauses and resumes every child
    assert_eq!(factory.child("t1-partition-1").event_count("pause"), 1);
}

#[tokio::test]
async fn test_seek_unknown_topic_is_rejected() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    assert!(matches!(
        consumer.seek(MessageId::new(0, 3)).await,
        Err(RelaymqClientError::OperationNotSupported { .. })
    ));
}

#[tokio::test]
async fn test_seek_timestamp_broadcasts() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    consumer.seek_timestamp(1_700_000_000_000).await.unwrap();
    assert_eq!(factory.child("t1-partition-0").event_count("seek:ts:1700000000000"), 1);
    assert_eq!(factory.child("t1-partition-1").event_count("seek:ts:1700000000000"), 1);
}

#[tokio::test]
async fn test_messages_arriving_during_seek_are_dropped() {
    let lookup = MockLookup::new();
    lookup.set_partitions("t1", 1);
    let factory = MockChildFactory::new();
    factory.script(
        "t1",
        ChildBehavior {
            hold_seek: true,
            ..Default::default()
        },
    );
    let consumer = subscribe_consumer(&["t1"], &lookup, &factory, ConsumerConfig::default())
        .await
        .unwrap();

    let child = factory.child("t1-partition-0");
    let seeking = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.seek(MessageId::earliest()).await })
    };
    wait_until("seek reached the child", || child.event_count("seek:earliest") == 1).await;

    // predates the new cursor, must be discarded
    child.emit(0, "stale").await;

    child.release_seek();
    assert!(seeking.await.unwrap().is_ok());
    assert_eq!(consumer.prefetched_message_count(), 0);
    assert_eq!(
        consumer.receive_with_timeout(Duration::from_millis(30)).await.err(),
        Some(RelaymqClientError::Timeout)
    );
}

#[tokio::test]
async fn test_stats_aggregation_across_children() {
    let lookup = MockLookup::new();
    lookup.set_partitions("t1", 1);
    lookup.set_partitions("t2", 1);
    let factory = MockChildFactory::new();
    factory.script(
        "t1",
        ChildBehavior {
            stats: BrokerConsumerStats {
                msg_rate_out: 2.0,
                msg_backlog: 10,
                ..Default::default()
            },
            ..Default::default()
        },
    );
    factory.script(
        "t2",
        ChildBehavior {
            stats: BrokerConsumerStats {
                msg_rate_out: 3.5,
                msg_backlog: 4,
                ..Default::default()
            },
            ..Default::default()
        },
    );

    let consumer = subscribe_consumer(&["t1", "t2"], &lookup, &factory, ConsumerConfig::default())
        .await
        .unwrap();

    let stats = consumer.get_broker_consumer_stats().await.unwrap();
    assert_eq!(stats.partition_count(), 2);
    assert_eq!(stats.msg_rate_out(), 5.5);
    assert_eq!(stats.msg_backlog(), 14);
}

#[tokio::test]
async fn test_stats_failure_short_circuits() {
    let lookup = MockLookup::new();
    lookup.set_partitions("t1", 2);
    let factory = MockChildFactory::new();
    factory.script(
        "t1-partition-1",
        ChildBehavior {
            stats_error: Some(RelaymqClientError::Timeout),
            ..Default::default()
        },
    );

    let consumer = subscribe_consumer(&["t1"], &lookup, &factory, ConsumerConfig::default())
        .await
        .unwrap();

    assert_eq!(
        consumer.get_broker_consumer_stats().await.err(),
        Some(RelaymqClientError::Timeout)
    );

    consumer.close().await.unwrap();
    assert_eq!(
        consumer.get_broker_consumer_stats().await.err(),
        Some(RelaymqClientError::ConsumerNotInitialized)
    );
}

#[tokio::test]
async fn test_has_message_available_asks_every_child() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;
    assert_eq!(consumer.has_message_available().await, Ok(false));

    let lookup2 = MockLookup::new();
    let factory2 = MockChildFactory::new();
    factory2.script(
        "t1-partition-1",
        ChildBehavior {
            has_message: true,
            ..Default::default()
        },
    );
    let consumer2 = two_partition_consumer(&lookup2, &factory2, ConsumerConfig::default()).await;
    assert_eq!(consumer2.has_message_available().await, Ok(true));
}

#[tokio::test]
async fn test_has_message_available_short_circuits_on_resident_bytes() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    factory.child("t1-partition-0").emit(0, "resident").await;
    assert_eq!(consumer.has_message_available().await, Ok(true));
}

#[tokio::test]
async fn test_get_last_message_id_is_unsupported() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    assert!(matches!(
        consumer.get_last_message_id().await,
        Err(RelaymqClientError::OperationNotSupported { .. })
    ));
}

#[tokio::test]
async fn test_send_flow_permits_broadcasts_receiver_queue_size() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let config = ConsumerConfigBuilder::new().receiver_queue_size(64).build();
    let consumer = two_partition_consumer(&lookup, &factory, config).await;

    consumer.send_flow_permits();
    assert_eq!(factory.child("t1-partition-0").event_count("flow:64"), 1);
    assert_eq!(factory.child("t1-partition-1").event_count("flow:64"), 1);
}

#[tokio::test]
async fn test_stream_yields_received_messages() {
    let lookup = MockLookup::new();
    let factory = MockChildFactory::new();
    let consumer = two_partition_consumer(&lookup, &factory, ConsumerConfig::default()).await;

    factory.child("t1-partition-0").emit(0, "a").await;
    factory.child("t1-partition-0").emit(1, "b").await;

    let mut stream = Box::pin(consumer.stream());
    let first = stream.next().await.unwrap().unwrap();
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(first.id().offset(), 0);
    assert_eq!(second.id().offset(), 1);
}
