//! End-to-end engine scenarios over the in-memory transport.
//!
//! Each test drives one or two engines through a [`MemoryNetwork`] and
//! checks the externally observable behavior: events, known items and
//! transfer snapshots.

use drift_core::{
    EngineError, EngineEvent, IncomingState, Item, ItemId, Metadata, OutgoingState, Progress,
};
use drift_files::ItemError;
use drift_integration_tests::test_helpers::{
    TestNode, config, config_with_cleanup, config_with_filter, deliver, header, text_item,
};
use drift_transport::{
    Advertisement, EndpointId, InboundEvent, MemoryNetwork, TransportAdapter, TransportError,
    TransportEvent,
};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Discovery
// ============================================================================

fn appeared(id: &str, name: &str) -> TransportEvent {
    TransportEvent::EndpointAppeared {
        id: EndpointId::new(id),
        display_name: name.to_string(),
    }
}

fn disappeared(id: &str) -> TransportEvent {
    TransportEvent::EndpointDisappeared {
        id: EndpointId::new(id),
    }
}

#[tokio::test]
async fn test_duplicate_appearances_yield_one_found() {
    let network = MemoryNetwork::new();
    let mut node = TestNode::started(&network, config("Local")).await;
    let local = node.endpoint_id();

    for _ in 0..3 {
        network.inject(&local, appeared("phone", "Phone")).await.unwrap();
    }
    network.inject(&local, appeared("phone", "Renamed Phone")).await.unwrap();
    network.inject(&local, disappeared("phone")).await.unwrap();
    network.inject(&local, disappeared("phone")).await.unwrap();
    network.inject(&local, appeared("phone", "Phone")).await.unwrap();
    // Barrier: events are relayed in order
    network.inject(&local, appeared("sentinel", "Sentinel")).await.unwrap();

    let mut seen = Vec::new();
    loop {
        match node.next_event().await {
            EngineEvent::EndpointFound(e) if e.display_name() == "Sentinel" => break,
            EngineEvent::EndpointFound(e) => seen.push(format!("found {}", e.id())),
            EngineEvent::EndpointLost(e) => seen.push(format!("lost {}", e.id())),
            _ => {}
        }
    }

    assert_eq!(seen, vec!["found phone", "lost phone", "found phone"]);
    let endpoints = node.engine.endpoints().await.unwrap();
    assert_eq!(endpoints.len(), 2);
}

#[tokio::test]
async fn test_lost_for_unknown_identity_is_silent() {
    let network = MemoryNetwork::new();
    let mut node = TestNode::started(&network, config("Local")).await;
    let local = node.endpoint_id();

    network.inject(&local, disappeared("ghost")).await.unwrap();
    network.inject(&local, appeared("sentinel", "Sentinel")).await.unwrap();

    assert!(matches!(
        node.next_event().await,
        EngineEvent::EndpointFound(e) if e.display_name() == "Sentinel"
    ));
}

#[tokio::test]
async fn test_engines_discover_each_other() {
    let network = MemoryNetwork::new();
    let mut a = TestNode::started(&network, config("Alpha")).await;
    let mut b = TestNode::started(&network, config("Beta")).await;

    let beta = a.wait_for_endpoint("Beta").await;
    let alpha = b.wait_for_endpoint("Alpha").await;
    assert_eq!(beta.id().as_str(), b.engine.identifier());
    assert_eq!(alpha.id().as_str(), a.engine.identifier());

    b.engine.stop().await.unwrap();
    let lost = a
        .wait_for(|event| match event {
            EngineEvent::EndpointLost(endpoint) => Some(endpoint),
            _ => None,
        })
        .await;
    assert!(lost.same_device(&beta));
    assert!(a.engine.endpoints().await.unwrap().is_empty());
}

// ============================================================================
// Known items
// ============================================================================

#[tokio::test]
async fn test_added_item_visible_when_call_returns() {
    let network = MemoryNetwork::new();
    let node = TestNode::spawn(&network, config("Local")).await;
    let watch = node.engine.watch_known_items();

    let item = text_item("hello");
    assert!(node.engine.add_known_item(item.clone()).await.unwrap());

    let known = node.engine.known_items();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].id(), item.id());
    assert_eq!(watch.borrow().len(), 1);
}

#[tokio::test]
async fn test_remove_all_known_items_ignores_retains() {
    let network = MemoryNetwork::new();
    let mut node = TestNode::spawn(&network, config("Local")).await;

    node.engine.add_known_item(text_item("a")).await.unwrap();
    node.engine.retain_known_items().await.unwrap();
    node.engine.remove_all_known_items().await.unwrap();
    assert!(node.engine.known_items().is_empty());

    let changes: Vec<usize> = [node.next_event().await, node.next_event().await]
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::KnownItemsChanged(items) => Some(items.len()),
            _ => None,
        })
        .collect();
    assert_eq!(changes, vec![1, 0]);
}

#[tokio::test]
async fn test_retain_underflow_reported() {
    let network = MemoryNetwork::new();
    let node = TestNode::spawn(&network, config("Local")).await;

    assert_eq!(node.engine.retain_known_items().await.unwrap(), 1);
    assert_eq!(node.engine.release_known_items().await.unwrap(), 0);
    assert_eq!(
        node.engine.release_known_items().await,
        Err(EngineError::RetainUnderflow)
    );
    // Counter stays usable after an underflow
    assert_eq!(node.engine.retain_known_items().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retains_suppress_automatic_cleanup() {
    let network = MemoryNetwork::new();
    let config = config_with_cleanup("Local", Duration::from_secs(1), Duration::from_secs(2));
    let mut node = TestNode::spawn(&network, config).await;

    node.engine.add_known_item(text_item("a")).await.unwrap();
    node.engine.retain_known_items().await.unwrap();
    node.engine.retain_known_items().await.unwrap();
    node.engine.release_known_items().await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(node.engine.known_items().len(), 1);

    node.engine.release_known_items().await.unwrap();
    node.wait_for(|event| match event {
        EngineEvent::KnownItemsChanged(items) if items.is_empty() => Some(()),
        _ => None,
    })
    .await;
    assert!(node.engine.known_items().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_clears_despite_retains() {
    let network = MemoryNetwork::new();
    let config = config_with_cleanup("Local", Duration::from_secs(1), Duration::from_secs(2));
    let mut node = TestNode::started(&network, config).await;

    let kept = text_item("kept");
    node.engine.add_known_item(kept.clone()).await.unwrap();
    node.engine.retain_known_items().await.unwrap();
    node.engine.retain_known_items().await.unwrap();

    node.engine.stop().await.unwrap();
    assert!(node.engine.known_items().is_empty());
    // Item handles outlive the clear
    assert_eq!(kept.read_to_vec().unwrap(), b"kept");

    // The counter survived the stop: two releases are still owed
    node.engine.add_known_item(text_item("b")).await.unwrap();
    node.engine.release_known_items().await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(node.engine.known_items().len(), 1);

    node.engine.release_known_items().await.unwrap();
    node.wait_for(|event| match event {
        EngineEvent::KnownItemsChanged(items) if items.is_empty() => Some(()),
        _ => None,
    })
    .await;
}

// ============================================================================
// Item store
// ============================================================================

#[test]
fn test_adopt_twice_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.txt");
    let second = dir.path().join("second.txt");

    let item = text_item("content");
    assert!(item.is_temporary());
    item.adopt(&first).unwrap();
    assert!(!item.is_temporary());

    assert!(matches!(item.adopt(&second), Err(ItemError::AlreadyPersistent)));
    assert_eq!(std::fs::read(&first).unwrap(), b"content");
    assert!(!second.exists());
    assert_eq!(item.path().unwrap(), first);
}

#[test]
fn test_buffer_materialize_read_back() {
    let bytes: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let item = Item::from_buffer(bytes.clone(), "blob", "public.data", Metadata::new());

    let path = item.materialize().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
    assert_eq!(item.read_to_vec().unwrap(), bytes);
    assert_eq!(item.len().unwrap(), 10_000);

    drop(item);
    assert!(!path.exists());
}

// ============================================================================
// Incoming transfers
// ============================================================================

#[tokio::test]
async fn test_filtered_out_transfer_is_invisible() {
    let network = MemoryNetwork::new();
    let mut node = TestNode::started(&network, config_with_filter("Local", &["text/plain"])).await;
    let local = node.endpoint_id();

    let image = network.open_inbound(&local, EndpointId::new("remote")).await.unwrap();
    deliver(&image, "photo", "image/png", b"\x89PNG").await;

    let text = network.open_inbound(&local, EndpointId::new("remote")).await.unwrap();
    deliver(&text, "note", "text/plain", b"hi").await;

    let mut started = Vec::new();
    let item = loop {
        match node.next_event().await {
            EngineEvent::ReceiveStarted(t) => started.push(t.item_type()),
            EngineEvent::ReceiveFinished { result, .. } => break result.unwrap(),
            _ => {}
        }
    };

    assert_eq!(started, vec![Some("text/plain".to_string())]);
    assert_eq!(item.title(), "note");
    let known = node.engine.known_items();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].item_type(), "text/plain");
}

#[tokio::test]
async fn test_filter_rejects_subtypes_of_listed_types() {
    let network = MemoryNetwork::new();
    let filter = ["public.data", "public.image", "text/plain"];
    let mut node = TestNode::started(&network, config_with_filter("Local", &filter)).await;
    let local = node.endpoint_id();

    // Both conform to a listed supertype but neither is listed itself
    let png = network.open_inbound(&local, EndpointId::new("remote")).await.unwrap();
    deliver(&png, "photo", "image/png", b"\x89PNG").await;
    let jpeg = network.open_inbound(&local, EndpointId::new("remote")).await.unwrap();
    deliver(&jpeg, "photo", "image/jpeg", b"jpeg").await;

    let text = network.open_inbound(&local, EndpointId::new("remote")).await.unwrap();
    deliver(&text, "note", "text/plain", b"hi").await;

    let mut started = Vec::new();
    let item = loop {
        match node.next_event().await {
            EngineEvent::ReceiveStarted(t) => started.push(t.item_type()),
            EngineEvent::ReceiveFinished { result, .. } => break result.unwrap(),
            _ => {}
        }
    };

    assert_eq!(started, vec![Some("text/plain".to_string())]);
    assert_eq!(item.item_type(), "text/plain");
    assert_eq!(node.engine.known_items().len(), 1);
}

#[tokio::test]
async fn test_unfiltered_receive_starts_before_type_is_known() {
    let network = MemoryNetwork::new();
    let mut node = TestNode::started(&network, config("Local")).await;

    let tx = network
        .open_inbound(&node.endpoint_id(), EndpointId::new("remote"))
        .await
        .unwrap();

    let transfer = match node.next_event().await {
        EngineEvent::ReceiveStarted(transfer) => transfer,
        other => panic!("unexpected event: {other:?}"),
    };
    assert_eq!(transfer.item_type(), None);
    assert_eq!(transfer.state(), IncomingState::PendingClassification);
    assert!(transfer.progress().is_indeterminate());

    tx.send(InboundEvent::Header(header("photo", "image/png", Some(4))))
        .await
        .unwrap();
    tx.send(InboundEvent::Data(b"\x89PNG".to_vec())).await.unwrap();
    tx.send(InboundEvent::Finished).await.unwrap();

    let mut order = Vec::new();
    let item = loop {
        let event = node.next_event().await;
        order.push(event.kind());
        if let EngineEvent::ReceiveFinished { transfer: done, result } = event {
            assert_eq!(done, transfer);
            break result.unwrap();
        }
    };

    assert_eq!(order, vec!["known_items_changed", "receive_finished"]);
    assert_eq!(item.item_type(), "image/png");
    assert_eq!(item.read_to_vec().unwrap(), b"\x89PNG");
    assert!(item.is_temporary());
    assert_eq!(transfer.state(), IncomingState::Completed);
    assert_eq!(transfer.item_type().as_deref(), Some("image/png"));
    assert_eq!(transfer.progress(), Progress::Fraction(1.0));
    assert!(node.engine.known_items().iter().any(|k| k.id() == item.id()));
}

#[tokio::test]
async fn test_truncated_receive_fails() {
    let network = MemoryNetwork::new();
    let mut node = TestNode::started(&network, config("Local")).await;

    let tx = network
        .open_inbound(&node.endpoint_id(), EndpointId::new("remote"))
        .await
        .unwrap();
    tx.send(InboundEvent::Header(header("doc", "text/plain", Some(10))))
        .await
        .unwrap();
    tx.send(InboundEvent::Data(b"four".to_vec())).await.unwrap();
    tx.send(InboundEvent::Finished).await.unwrap();

    let (transfer, result) = node
        .wait_for(|event| match event {
            EngineEvent::ReceiveFinished { transfer, result } => Some((transfer, result)),
            _ => None,
        })
        .await;

    assert_eq!(
        result.unwrap_err(),
        EngineError::Transport(TransportError::Truncated {
            expected: 10,
            actual: 4
        })
    );
    assert_eq!(transfer.state(), IncomingState::Failed);
    assert!(node.engine.known_items().is_empty());
}

#[tokio::test]
async fn test_broken_stream_fails_announced_transfer() {
    let network = MemoryNetwork::new();
    let mut node = TestNode::started(&network, config("Local")).await;

    let tx = network
        .open_inbound(&node.endpoint_id(), EndpointId::new("remote"))
        .await
        .unwrap();
    tx.send(InboundEvent::Header(header("doc", "text/plain", None)))
        .await
        .unwrap();
    drop(tx);

    let result = node
        .wait_for(|event| match event {
            EngineEvent::ReceiveFinished { result, .. } => Some(result),
            _ => None,
        })
        .await;
    assert_eq!(result.unwrap_err(), EngineError::Transport(TransportError::Closed));
}

// ============================================================================
// Outgoing transfers
// ============================================================================

#[tokio::test]
async fn test_send_between_engines() {
    let network = MemoryNetwork::new();
    let mut alpha = TestNode::started(&network, config("Alpha")).await;
    let mut beta = TestNode::started(&network, config("Beta")).await;
    let to_beta = alpha.wait_for_endpoint("Beta").await;

    let mut metadata = Metadata::new();
    metadata.insert("note".to_string(), "for you".to_string());
    metadata.insert("MvrTitle".to_string(), "spoofed".to_string());
    let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let item = Item::from_buffer(content.clone(), "payload.bin", "public.data", metadata);

    let transfer = alpha.engine.send(item.clone(), &to_beta).await.unwrap();
    assert_eq!(transfer.destination(), &to_beta);

    let mut sender_events = Vec::new();
    let result = loop {
        let event = alpha.next_event().await;
        sender_events.push(event.kind());
        if let EngineEvent::SendFinished { transfer: done, result } = event {
            assert_eq!(done.id(), transfer.id());
            break result;
        }
    };
    result.unwrap();
    assert_eq!(sender_events, vec!["send_started", "send_finished"]);
    assert_eq!(transfer.state(), OutgoingState::Completed);
    assert_eq!(transfer.bytes_sent(), 200_000);
    assert_eq!(transfer.progress(), Progress::Fraction(1.0));

    let received = beta
        .wait_for(|event| match event {
            EngineEvent::ReceiveFinished { result, .. } => Some(result),
            _ => None,
        })
        .await
        .unwrap();
    assert_eq!(received.title(), "payload.bin");
    assert_eq!(received.metadata().get("note").map(String::as_str), Some("for you"));
    assert!(!received.metadata().contains_key("MvrTitle"));
    assert_eq!(received.read_to_vec().unwrap(), content);
    assert_ne!(received.id(), item.id());

    // The sent item is never mutated
    assert!(item.is_temporary());
    assert_eq!(item.metadata().get("MvrTitle").map(String::as_str), Some("spoofed"));
    assert!(alpha.engine.outgoing_transfers_to(&to_beta).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_sends_to_one_endpoint() {
    let network = MemoryNetwork::new();
    let mut alpha = TestNode::started(&network, config("Alpha")).await;
    let mut beta = TestNode::started(&network, config("Beta")).await;
    let to_beta = alpha.wait_for_endpoint("Beta").await;

    let first = alpha.engine.send(text_item("one"), &to_beta).await.unwrap();
    let second = alpha.engine.send(text_item("two"), &to_beta).await.unwrap();
    assert_ne!(first.id(), second.id());

    let mut finished = 0;
    while finished < 2 {
        if let EngineEvent::SendFinished { result, .. } = alpha.next_event().await {
            result.unwrap();
            finished += 1;
        }
    }

    let mut titles = Vec::new();
    while titles.len() < 2 {
        if let EngineEvent::ReceiveFinished { result, .. } = beta.next_event().await {
            titles.push(result.unwrap().title().to_string());
        }
    }
    titles.sort();
    assert_eq!(titles, vec!["one", "two"]);
    assert_eq!(beta.engine.known_items().len(), 2);
}

#[tokio::test]
async fn test_failed_open_reports_send_failure() {
    let network = MemoryNetwork::new();
    let transport = Arc::new(network.transport());
    let engine = drift_core::Engine::spawn(config("Alpha"), transport.clone()).unwrap();
    let mut events = engine.subscribe().await.unwrap();
    engine.start().await.unwrap();
    let _beta = TestNode::started(&network, config("Beta")).await;

    let to_beta = loop {
        if let EngineEvent::EndpointFound(endpoint) =
            drift_integration_tests::test_helpers::next_event(&mut events).await
        {
            break endpoint;
        }
    };

    transport.fail_next_open();
    let item = text_item("doomed");
    let transfer = engine.send(item.clone(), &to_beta).await.unwrap();

    let result = loop {
        if let EngineEvent::SendFinished { result, .. } =
            drift_integration_tests::test_helpers::next_event(&mut events).await
        {
            break result;
        }
    };
    assert!(matches!(
        result,
        Err(EngineError::Transport(TransportError::ConnectionFailed(_)))
    ));
    assert_eq!(transfer.state(), OutgoingState::Failed);
    assert!(transfer.error().is_some());
    assert_eq!(item.read_to_vec().unwrap(), b"doomed");
}

#[tokio::test]
async fn test_stop_invalidates_endpoints() {
    let network = MemoryNetwork::new();
    let mut alpha = TestNode::started(&network, config("Alpha")).await;
    let _beta = TestNode::started(&network, config("Beta")).await;
    let stale = alpha.wait_for_endpoint("Beta").await;

    alpha.engine.stop().await.unwrap();
    assert!(alpha.engine.endpoints().await.unwrap().is_empty());

    alpha.engine.start().await.unwrap();
    let fresh = alpha.wait_for_endpoint("Beta").await;
    assert!(fresh.same_device(&stale));
    assert_ne!(fresh, stale);

    assert!(matches!(
        alpha.engine.send(text_item("x"), &stale).await,
        Err(EngineError::InvalidState(_))
    ));
    alpha.engine.send(text_item("x"), &fresh).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_transfer_holds_released_after_every_outcome() {
    let network = MemoryNetwork::new();
    let mut config = config_with_cleanup("Local", Duration::from_secs(1), Duration::from_secs(2));
    config.allowed_types = ["text/plain"].into_iter().collect();
    config.transfer.chunk_size = 1024;
    let mut node = TestNode::started(&network, config).await;
    let local = node.endpoint_id();

    // Completed receive
    let tx = network.open_inbound(&local, EndpointId::new("remote")).await.unwrap();
    deliver(&tx, "note", "text/plain", b"hi").await;
    node.wait_for(|event| match event {
        EngineEvent::ReceiveFinished { result, .. } => Some(result),
        _ => None,
    })
    .await
    .unwrap();
    assert_eq!(node.engine.known_items().len(), 1);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(node.engine.known_items().is_empty());

    // Rejected receive
    node.engine.add_known_item(text_item("a")).await.unwrap();
    let tx = network.open_inbound(&local, EndpointId::new("remote")).await.unwrap();
    deliver(&tx, "photo", "image/png", b"\x89PNG").await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(node.engine.known_items().is_empty());

    // A peer that never reads stalls the send once the stream buffer fills
    let stalled = network.transport();
    let _stalled_events = stalled
        .start(Advertisement {
            id: EndpointId::new("stalled"),
            display_name: "Stalled".to_string(),
        })
        .await
        .unwrap();
    let to_stalled = node.wait_for_endpoint("Stalled").await;

    node.engine.add_known_item(text_item("b")).await.unwrap();
    let big = Item::from_buffer(vec![7u8; 200_000], "big.bin", "public.data", Metadata::new());
    let transfer = node.engine.send(big, &to_stalled).await.unwrap();

    // The in-flight send keeps the registry alive
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transfer.state(), OutgoingState::Sending);
    assert!(transfer.bytes_sent() < 200_000);
    assert_eq!(node.engine.known_items().len(), 1);

    node.engine.stop().await.unwrap();
    node.wait_for(|event| matches!(event, EngineEvent::Stopping).then_some(()))
        .await;
    match node.next_event().await {
        EngineEvent::SendFinished { transfer: done, result } => {
            assert_eq!(done.id(), transfer.id());
            assert_eq!(result, Err(EngineError::Cancelled));
        }
        other => panic!("unexpected event after stopping: {other:?}"),
    }
    assert_eq!(transfer.state(), OutgoingState::Failed);
    assert_eq!(transfer.error(), Some(EngineError::Cancelled));

    // Nothing is left holding the registry once stopped
    node.engine.add_known_item(text_item("c")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(node.engine.known_items().is_empty());
}

#[test]
fn test_known_item_ids_are_unique() {
    let a = text_item("same");
    let b = text_item("same");
    assert_ne!(a.id(), b.id());
    assert_ne!(ItemId::random(), ItemId::random());
}
