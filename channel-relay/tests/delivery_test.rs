mod common;

use async_trait::async_trait;
use channel_relay::processing::build_payload;
use channel_relay::transports::send_parts;
use channel_relay::{
    DeliveryConfig, DeliveryOutcome, FanOut, Item, ItemKind, Payload, Result, Route, TransformedItem,
    Transport, TransportError,
};
use common::{init_tracing, text_item, RecordingTransport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

fn ready(item: Item) -> TransformedItem {
    let text = item.body().to_string();
    TransformedItem {
        payload: build_payload(&item, text.clone()),
        item,
        text,
        failed_chunks: 0,
        rate_limited: false,
    }
}

fn config(pacing_ms: u64, max_attempts: u32) -> DeliveryConfig {
    DeliveryConfig {
        pacing: Duration::from_millis(pacing_ms),
        max_attempts,
        retry_delay: Duration::from_millis(200),
    }
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_deliveries_respect_pacing() -> Result<()> {
    init_tracing();
    let transport = RecordingTransport::new("telegram");
    let routes = vec![Route::new(transport.clone(), "chat-1")];
    let items: Vec<TransformedItem> = (1..=4).map(|id| ready(text_item(id))).collect();

    let fanout = FanOut::new(config(2000, 3));
    let start = Instant::now();
    let report = fanout.deliver_all("news", &items, &routes).await;

    assert_eq!(report.delivered(), 4);
    let sent = transport.sent();
    let ids: Vec<String> = sent.iter().map(|s| s.text()).collect();
    assert_eq!(ids, vec!["post 1", "post 2", "post 3", "post 4"]);

    for pair in sent.windows(2) {
        let gap = pair[1].at - pair[0].at;
        info!("Gap between deliveries: {:?}", gap);
        assert!(gap >= Duration::from_millis(2000), "gap {gap:?} below pacing");
    }
    assert!(sent[0].at - start < Duration::from_millis(2000));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_routes_are_paced_independently() -> Result<()> {
    init_tracing();
    let transport = RecordingTransport::new("telegram");
    let routes = vec![
        Route::new(transport.clone(), "a"),
        Route::new(transport.clone(), "b"),
    ];
    let items: Vec<TransformedItem> = (1..=3).map(|id| ready(text_item(id))).collect();

    let start = Instant::now();
    FanOut::new(config(1000, 1)).deliver_all("news", &items, &routes).await;

    // Both routes run side by side, so the whole batch takes two pacing gaps, not four
    assert!(Instant::now() - start < Duration::from_millis(2500));
    assert_eq!(transport.sent_to("a").len(), 3);
    assert_eq!(transport.sent_to("b").len(), 3);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_recoverable_failures_are_bounded() -> Result<()> {
    init_tracing();
    let transport = RecordingTransport::new("telegram");
    transport.fail_always("chat-1", TransportError::Recoverable("timeout".to_string()));
    let route = Route::new(transport.clone(), "chat-1");

    let fanout = FanOut::new(config(0, 4));
    let outcome = fanout
        .deliver_with_retry(&route, &Payload::Text { body: "hello".to_string() })
        .await;

    match outcome {
        DeliveryOutcome::Dropped { attempts, reason } => {
            assert_eq!(attempts, 4);
            assert_eq!(reason, "timeout");
        }
        other => panic!("expected drop, got {other:?}"),
    }
    assert_eq!(transport.attempts(), 4);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retries_back_off() -> Result<()> {
    init_tracing();
    let transport = RecordingTransport::new("telegram");
    transport.fail_next("chat-1", 2, TransportError::Recoverable("HTTP 502".to_string()));
    let route = Route::new(transport.clone(), "chat-1");

    let start = Instant::now();
    let outcome = FanOut::new(config(0, 3))
        .deliver_with_retry(&route, &Payload::Text { body: "hello".to_string() })
        .await;

    assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
    // Two waits, each at least half the base delay once jitter is applied
    assert!(Instant::now() - start >= Duration::from_millis(200));

    Ok(())
}

#[tokio::test]
async fn test_malformed_payload_is_rejected_without_sending() -> Result<()> {
    init_tracing();
    let transport = RecordingTransport::new("telegram");
    let route = Route::new(transport.clone(), "chat-1");
    let fanout = FanOut::new(config(0, 3));

    let empty_text = fanout
        .deliver_with_retry(&route, &Payload::Text { body: "  ".to_string() })
        .await;
    assert!(matches!(empty_text, DeliveryOutcome::Rejected { .. }));

    let item = Item {
        media_url: None,
        ..Item::media(7, ItemKind::Image, "", Some("caption"))
    };
    let report = fanout.deliver_all("news", &[ready(item)], &[route]).await;
    assert_eq!(report.rejected(), 1);

    assert_eq!(transport.attempts(), 0);

    Ok(())
}

#[tokio::test]
async fn test_media_payload_keeps_caption() -> Result<()> {
    init_tracing();
    let transport = RecordingTransport::new("telegram");
    let route = Route::new(transport.clone(), "chat-1");
    let item = Item::media(3, ItemKind::Video, "https://cdn.example/3.mp4", Some("clip"));

    FanOut::new(config(0, 1)).deliver_all("news", &[ready(item)], &[route]).await;

    let sent = transport.sent();
    assert_eq!(
        sent[0].payload,
        Payload::Video {
            url: "https://cdn.example/3.mp4".to_string(),
            caption: Some("clip".to_string()),
        }
    );

    Ok(())
}

/// Splits text on `|` and sends each piece separately; one piece fails a set number of times.
struct SplitTransport {
    flaky_part: String,
    failures_left: AtomicUsize,
    sent: Mutex<Vec<String>>,
}

impl SplitTransport {
    fn failing(part: &str, times: usize) -> Arc<Self> {
        Arc::new(Self {
            flaky_part: part.to_string(),
            failures_left: AtomicUsize::new(times),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    async fn send_one(&self, part: String) -> std::result::Result<(), TransportError> {
        if part == self.flaky_part && self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::Recoverable("HTTP 502".to_string()));
        }
        self.sent.lock().unwrap().push(part);
        Ok(())
    }
}

#[async_trait]
impl Transport for SplitTransport {
    fn name(&self) -> &str {
        "split"
    }

    async fn deliver(&self, _target: &str, payload: &Payload) -> std::result::Result<(), TransportError> {
        let Payload::Text { body } = payload else {
            return Err(TransportError::Fatal("text only".to_string()));
        };
        let parts: Vec<&str> = body.split('|').collect();
        send_parts(&parts, |part: &str| self.send_one(part.to_string())).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_partly_sent_message_is_not_resent() -> Result<()> {
    init_tracing();
    let transport = SplitTransport::failing("second", 1);
    let route = Route::new(transport.clone(), "chat-1");

    let outcome = FanOut::new(config(0, 3))
        .deliver_with_retry(&route, &Payload::Text { body: "first|second|third".to_string() })
        .await;

    match outcome {
        DeliveryOutcome::Rejected { reason } => assert_eq!(reason, "sent 1 of 3 parts, then: HTTP 502"),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(transport.sent(), vec!["first"]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_first_part_is_retried() -> Result<()> {
    init_tracing();
    let transport = SplitTransport::failing("first", 1);
    let route = Route::new(transport.clone(), "chat-1");

    let outcome = FanOut::new(config(0, 3))
        .deliver_with_retry(&route, &Payload::Text { body: "first|second".to_string() })
        .await;

    assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 2 });
    assert_eq!(transport.sent(), vec!["first", "second"]);

    Ok(())
}
