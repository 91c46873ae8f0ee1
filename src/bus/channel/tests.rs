use std::time::Duration;

use super::*;

/// Records deliveries in handling order.
#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<Delivery>>,
    delay: Duration,
}

#[async_trait]
impl DeliveryHandler for RecordingHandler {
    async fn on_delivery(&self, delivery: &Delivery) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.seen.lock().await.push(delivery.clone());
    }
}

fn transport(partitions: usize) -> ChannelTransport {
    ChannelTransport::new(&ChannelConfig {
        partitions,
        capacity: 64,
    })
}

#[test]
fn test_partition_for_is_stable() {
    let transport = transport(4);
    let first = transport.partition_for(Some("42"));
    for _ in 0..10 {
        assert_eq!(transport.partition_for(Some("42")), first);
    }
    assert!(first < 4);
    assert_eq!(transport.partition_for(None), 0);
}

#[tokio::test]
async fn test_offsets_increase_per_partition() {
    let transport = transport(1);
    let (_, first) = transport
        .publish(EventKind::RatingUpdate, Some("1"), vec![])
        .await
        .unwrap();
    let (_, second) = transport
        .publish(EventKind::VoteCountUpdate, Some("1"), vec![])
        .await
        .unwrap();
    assert_eq!((first, second), (0, 1));
}

#[tokio::test]
async fn test_run_preserves_order_within_partition_and_commits() {
    let transport = Arc::new(transport(2));
    let handler = Arc::new(RecordingHandler::default());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    for i in 0..5u8 {
        transport
            .publish(EventKind::VoteCountUpdate, Some("7"), vec![i])
            .await
            .unwrap();
    }
    transport.close().await;

    transport
        .run(handler.clone(), shutdown_rx)
        .await
        .unwrap();

    let seen = handler.seen.lock().await;
    let payloads: Vec<u8> = seen.iter().map(|d| d.payload[0]).collect();
    assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
    assert_eq!(seen[0].kind(), Some(EventKind::VoteCountUpdate));

    let partition = transport.partition_for(Some("7"));
    assert_eq!(transport.committed_offset(partition), 5);
}

#[tokio::test]
async fn test_redeliver_keeps_offset() {
    let transport = Arc::new(transport(1));
    let handler = Arc::new(RecordingHandler::default());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    transport
        .publish(EventKind::RatingUpdate, Some("1"), b"x".to_vec())
        .await
        .unwrap();

    let runner = {
        let transport = Arc::clone(&transport);
        let handler = handler.clone();
        tokio::spawn(async move { transport.run(handler, shutdown_rx).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let first = handler.seen.lock().await[0].clone();
    transport.redeliver(first.clone()).await.unwrap();
    transport.close().await;
    runner.await.unwrap().unwrap();

    let seen = handler.seen.lock().await;
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].offset, first.offset);
    assert_eq!(seen[1].payload, first.payload);
}

#[tokio::test]
async fn test_run_twice_fails() {
    let transport = Arc::new(transport(1));
    transport.close().await;
    let (_tx, rx) = watch::channel(false);

    transport
        .run(Arc::new(RecordingHandler::default()), rx.clone())
        .await
        .unwrap();
    assert!(matches!(
        transport
            .run(Arc::new(RecordingHandler::default()), rx)
            .await,
        Err(BusError::Subscribe(_))
    ));
}

#[tokio::test]
async fn test_shutdown_stops_workers() {
    let transport = Arc::new(transport(2));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            transport
                .run(Arc::new(RecordingHandler::default()), shutdown_rx)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_publish_after_close_fails() {
    let transport = transport(1);
    transport.close().await;
    assert!(matches!(
        transport
            .publish(EventKind::RatingUpdate, Some("1"), vec![])
            .await,
        Err(BusError::Publish(_))
    ));
}
