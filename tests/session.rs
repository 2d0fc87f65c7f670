use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::lock::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status};

use optimum_p2p_client::{
    config::{Config, Mode},
    engine::{run_session, SessionExit},
    error::{ClientError, StreamError},
    message_gate::{Delivery, MessageGate, MessageGateChain},
    messages::{Command, Envelope},
    proto::{self, ResponseType},
    pump::PumpExit,
    stream_handle::CommandSink,
};

type Inbound = ReceiverStream<Result<proto::Response, Status>>;

fn inbound(capacity: usize) -> (mpsc::Sender<Result<proto::Response, Status>>, Inbound) {
    let (sender, receiver) = mpsc::channel(capacity);
    (sender, ReceiverStream::new(receiver))
}

fn message_frame(payload: &[u8]) -> Result<proto::Response, Status> {
    let envelope = Envelope {
        message_id: hex_id(payload),
        topic: "topicA".to_string(),
        message: payload.to_vec(),
        source_node_id: "node-1".to_string(),
    };
    Ok(proto::Response {
        command: ResponseType::Message as i32,
        data: serde_json::to_vec(&envelope).unwrap(),
    })
}

fn hex_id(payload: &[u8]) -> String {
    payload.iter().map(|b| format!("{:02x}", b)).collect()
}

fn subscriber() -> Config {
    Config::new("topicA").set_buffer_size(64).set_workers(4)
}

// - Sink: accepts everything and records it
// - Optionally echoes every publish back as an inbound message, like a node that is
//   subscribed to its own topic
struct RecordingSink {
    commands: std::sync::Mutex<Vec<Command>>,
    echo: Option<mpsc::Sender<Result<proto::Response, Status>>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    send_time: Duration,
    /// when set, sends go over the wire one at a time like frames on a single stream
    wire: Option<tokio::sync::Mutex<()>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            commands: std::sync::Mutex::new(Vec::new()),
            echo: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            send_time: Duration::ZERO,
            wire: None,
        }
    }

    fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    fn published(&self) -> usize {
        self.commands()
            .iter()
            .filter(|c| matches!(c, Command::Publish { .. }))
            .count()
    }
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn send(&self, command: Command) -> Result<(), StreamError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let _wire = match &self.wire {
            Some(wire) => Some(wire.lock().await),
            None => None,
        };
        if !self.send_time.is_zero() {
            tokio::time::sleep(self.send_time).await;
        }
        if let (Some(echo), Command::Publish { payload, .. }) = (&self.echo, &command) {
            let _ = echo.send(message_frame(payload)).await;
        }
        self.commands.lock().unwrap().push(command);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingSink {
    calls: AtomicUsize,
    error: StreamError,
}

impl FailingSink {
    fn closed() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            error: StreamError::Closed,
        }
    }

    fn busy() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            error: StreamError::Status {
                code: Code::Unavailable,
                message: "busy".to_string(),
            },
        }
    }
}

#[async_trait]
impl CommandSink for FailingSink {
    async fn send(&self, _command: Command) -> Result<(), StreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

// - Sink: a node that stopped reading, every send waits forever
struct StuckSink {
    calls: AtomicUsize,
}

#[async_trait]
impl CommandSink for StuckSink {
    async fn send(&self, _command: Command) -> Result<(), StreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[derive(Clone)]
pub struct MessageCounts {
    count: Arc<AtomicUsize>,
    last: Arc<Mutex<Vec<u8>>>,
    delay: Duration,
}

impl MessageCounts {
    fn new() -> Self {
        Self::slow(Duration::ZERO)
    }

    fn slow(delay: Duration) -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            last: Arc::new(Mutex::new(Vec::new())),
            delay,
        }
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn last(&self) -> Vec<u8> {
        self.last.lock().await.clone()
    }
}

#[async_trait]
impl MessageGate for MessageCounts {
    fn accepted(&self, delivery: &Delivery) -> bool {
        matches!(delivery, Delivery::Message { .. })
    }

    async fn process(&self, delivery: &Delivery) {
        if let Delivery::Message { envelope, .. } = delivery {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            *self.last.lock().await = envelope.message.clone();
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// - Node: pushes 50 messages, then closes the stream
// - Subscriber: buffer large enough for all of them
#[tokio::test]
async fn test_subscribe_no_loss_under_capacity() {
    let sink = Arc::new(RecordingSink::new());
    let counts = MessageCounts::new();
    let (frames, stream) = inbound(64);
    for i in 0..50u32 {
        frames.send(message_frame(&i.to_be_bytes())).await.unwrap();
    }
    drop(frames);

    let report = run_session(
        &subscriber(),
        sink.clone(),
        stream,
        MessageGateChain::new().append(counts.clone()),
        None,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.exit, SessionExit::StreamEnded(PumpExit::EndOfStream));
    assert_eq!(
        sink.commands()[0],
        Command::Subscribe {
            topic: "topicA".to_string()
        }
    );
    assert_eq!(report.stats.frames, 50);
    assert_eq!(report.stats.enqueued, 50);
    assert_eq!(report.stats.buffer_dropped, 0);
    assert_eq!(report.stats.processed, 50);
    assert_eq!(report.stats.received, 50);
    assert_eq!(counts.count(), 50);
    assert!(report.error().is_none());
}

// - Node: pushes 200 messages at once
// - Subscriber: one slot of buffer, one slow worker
#[tokio::test]
async fn test_subscribe_overflow_accounting() {
    let sink = Arc::new(RecordingSink::new());
    let counts = MessageCounts::slow(Duration::from_millis(5));
    let (frames, stream) = inbound(256);
    for i in 0..200u32 {
        frames.send(message_frame(&i.to_be_bytes())).await.unwrap();
    }
    drop(frames);

    let config = Config::new("topicA").set_buffer_size(1).set_workers(1);
    let report = run_session(
        &config,
        sink,
        stream,
        MessageGateChain::new().append(counts.clone()),
        None,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let stats = report.stats;
    assert_eq!(stats.frames, 200);
    assert!(stats.buffer_dropped > 0);
    assert_eq!(stats.enqueued + stats.buffer_dropped, 200);
    assert_eq!(stats.processed, stats.enqueued);
    assert_eq!(stats.received, stats.enqueued);
    assert_eq!(counts.count() as u64, stats.received);
    // buffer drops are not publish drops
    assert_eq!(stats.dropped, 0);
}

// - Node: delivers 3 messages, then rejects our keepalive pings
#[tokio::test]
async fn test_subscribe_ends_on_ping_limit() {
    let sink = Arc::new(RecordingSink::new());
    let counts = MessageCounts::new();
    let (frames, stream) = inbound(8);
    frames.send(message_frame(b"a")).await.unwrap();
    frames.send(message_frame(b"b")).await.unwrap();
    frames.send(message_frame(b"hello-keepalive")).await.unwrap();
    frames
        .send(Err(Status::new(
            Code::Unavailable,
            "received prior goaway: code: ENHANCE_YOUR_CALM, debug data: \"too_many_pings\"",
        )))
        .await
        .unwrap();

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        run_session(
            &Config::new("topicA").set_workers(1),
            sink,
            stream,
            MessageGateChain::new().append(counts.clone()),
            None,
            CancellationToken::new(),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(matches!(
        report.exit,
        SessionExit::StreamEnded(PumpExit::PingLimit(_))
    ));
    assert!(report.error().is_none());
    assert_eq!(report.stats.received, 3);
    assert_eq!(counts.last().await, b"hello-keepalive".to_vec());
}

#[tokio::test]
async fn test_subscribe_stream_error_is_reported() {
    let (frames, stream) = inbound(8);
    frames
        .send(Err(Status::new(Code::Internal, "boom")))
        .await
        .unwrap();

    let report = run_session(
        &subscriber(),
        Arc::new(RecordingSink::new()),
        stream,
        MessageGateChain::new(),
        None,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(matches!(
        report.error(),
        Some(StreamError::Status {
            code: Code::Internal,
            ..
        })
    ));
}

#[tokio::test]
async fn test_subscribe_failure_is_fatal() {
    let sink = Arc::new(FailingSink::closed());
    let (_frames, stream) = inbound(8);

    let result = run_session(
        &subscriber(),
        sink,
        stream,
        MessageGateChain::new(),
        None,
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(result, Err(ClientError::Stream(StreamError::Closed))));
}

// - Node: keeps the stream open and sends nothing
// - Interrupt arrives after 50ms
#[tokio::test]
async fn test_interrupt_terminates_session() {
    let sink = Arc::new(RecordingSink::new());
    let (_frames, stream) = inbound(8);
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        interrupt.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(1),
        run_session(
            &subscriber(),
            sink.clone(),
            stream,
            MessageGateChain::new(),
            None,
            cancel,
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(report.exit, SessionExit::Interrupted);
    assert_eq!(
        sink.commands(),
        vec![
            Command::Subscribe {
                topic: "topicA".to_string()
            },
            Command::Unsubscribe {
                topic: "topicA".to_string()
            },
        ]
    );
}

// - Publisher: 200 messages, with and without flow control
// - Both runs publish every message
#[tokio::test]
async fn test_publish_with_and_without_flow_control() {
    for enabled in [true, false] {
        let sink = Arc::new(RecordingSink::new());
        let (_frames, stream) = inbound(8);
        let config = Config::new("topicA")
            .set_mode(Mode::Publish)
            .set_message("m")
            .set_count(200)
            .set_flow_control(enabled)
            .set_initial_credits(50)
            .set_credit_increment(5)
            .set_pacing_delay(Duration::from_micros(100));

        let report = run_session(
            &config,
            sink.clone(),
            stream,
            MessageGateChain::new(),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.exit, SessionExit::Published);
        assert_eq!(report.publish.unwrap().sent, 200);
        assert_eq!(report.stats.sent, 200);
        assert_eq!(report.stats.dropped, 0);
        assert_eq!(sink.published(), 200);
    }
}

// - Sink: one send at a time over the wire, 1ms each
// - Pacing must not make flow control much slower than sending back to back
#[tokio::test]
async fn test_publish_pacing_overhead() {
    let mut elapsed = Vec::new();
    for enabled in [true, false] {
        let sink = Arc::new(RecordingSink {
            send_time: Duration::from_millis(1),
            wire: Some(tokio::sync::Mutex::new(())),
            ..RecordingSink::new()
        });
        let (_frames, stream) = inbound(8);
        let config = Config::new("topicA")
            .set_mode(Mode::Publish)
            .set_message("m")
            .set_count(200)
            .set_flow_control(enabled)
            .set_initial_credits(50)
            .set_credit_increment(5)
            .set_pacing_delay(Duration::from_micros(100));

        let report = run_session(
            &config,
            sink,
            stream,
            MessageGateChain::new(),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let publish = report.publish.unwrap();
        assert_eq!(publish.sent, 200);
        elapsed.push(publish.elapsed);
    }

    let (flow_controlled, unthrottled) = (elapsed[0], elapsed[1]);
    assert!(
        flow_controlled <= unthrottled * 2,
        "flow controlled {flow_controlled:?}, unthrottled {unthrottled:?}"
    );
}

// - Sink: every send takes 5ms
// - Flow control allows 3 sends in flight
#[tokio::test]
async fn test_publish_concurrency_bound() {
    let sink = Arc::new(RecordingSink {
        send_time: Duration::from_millis(5),
        ..RecordingSink::new()
    });
    let (_frames, stream) = inbound(8);
    let config = Config::new("topicA")
        .set_mode(Mode::Publish)
        .set_count(40)
        .set_max_concurrent_sends(3)
        .set_pacing_delay(Duration::ZERO);

    let report = run_session(
        &config,
        sink.clone(),
        stream,
        MessageGateChain::new(),
        None,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.stats.sent, 40);
    assert!(sink.peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_publish_retry_exhaustion() {
    let sink = Arc::new(FailingSink::busy());
    let (_frames, stream) = inbound(8);
    let config = Config::new("topicA")
        .set_mode(Mode::Publish)
        .set_message("never delivered")
        .set_retries(2, Duration::from_millis(10));

    let report = run_session(
        &config,
        sink.clone(),
        stream,
        MessageGateChain::new(),
        None,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.stats.dropped, 1);
    assert_eq!(report.stats.retried, 2);
    assert_eq!(report.stats.sent, 0);
    assert_eq!(report.publish.unwrap().dropped, 1);
}

// - Node: closes the stream before anything is published
// - Sink: the outbound half is gone, every send fails with Closed
// - Publishing stops at once instead of retrying every message
#[tokio::test]
async fn test_publish_stops_when_stream_ends() {
    let sink = Arc::new(FailingSink::closed());
    let (frames, stream) = inbound(8);
    drop(frames);
    let config = Config::new("topicA")
        .set_mode(Mode::Publish)
        .set_message("m")
        .set_count(100);

    let report = tokio::time::timeout(
        Duration::from_secs(1),
        run_session(
            &config,
            sink.clone(),
            stream,
            MessageGateChain::new(),
            None,
            CancellationToken::new(),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(report.exit, SessionExit::StreamEnded(PumpExit::EndOfStream));
    assert_eq!(report.stats.retried, 0);
    assert_eq!(report.stats.sent, 0);
    assert!(sink.calls.load(Ordering::SeqCst) <= 100);
    let publish = report.publish.unwrap();
    assert_eq!(publish.dropped + publish.cancelled, 100);
}

// - Node: stops reading, so every send hangs
// - Interrupt arrives after 100ms, with and without flow control
#[tokio::test]
async fn test_publish_interrupted_mid_send() {
    for enabled in [true, false] {
        let sink = Arc::new(StuckSink {
            calls: AtomicUsize::new(0),
        });
        let (_frames, stream) = inbound(8);
        let config = Config::new("topicA")
            .set_mode(Mode::Publish)
            .set_message("m")
            .set_count(5)
            .set_flow_control(enabled);
        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            interrupt.cancel();
        });

        let report = tokio::time::timeout(
            Duration::from_secs(3),
            run_session(
                &config,
                sink.clone(),
                stream,
                MessageGateChain::new(),
                None,
                cancel,
            ),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(report.exit, SessionExit::Interrupted);
        assert!(sink.calls.load(Ordering::SeqCst) >= 1);
        let publish = report.publish.unwrap();
        assert_eq!(publish.sent, 0);
        assert_eq!(publish.cancelled, 5);
    }
}

// - Node: never takes the subscription
// - Interrupt arrives after 100ms
#[tokio::test]
async fn test_subscribe_interrupted_mid_send() {
    let sink = Arc::new(StuckSink {
        calls: AtomicUsize::new(0),
    });
    let (_frames, stream) = inbound(8);
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        interrupt.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(3),
        run_session(
            &subscriber(),
            sink.clone(),
            stream,
            MessageGateChain::new(),
            None,
            cancel,
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(report.exit, SessionExit::Interrupted);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
}

// - Node: echoes every publish back on the same stream
// - Client publishes 20 messages and receives them all before the linger ends
#[tokio::test]
async fn test_publish_loopback() {
    let (frames, stream) = inbound(64);
    let sink = Arc::new(RecordingSink {
        echo: Some(frames),
        ..RecordingSink::new()
    });
    let counts = MessageCounts::new();
    let config = Config::new("topicA")
        .set_mode(Mode::Publish)
        .set_message("loop")
        .set_count(20);

    let report = run_session(
        &config,
        sink,
        stream,
        MessageGateChain::new().append(counts.clone()),
        None,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.stats.sent, 20);
    assert_eq!(report.stats.received, 20);
    assert_eq!(counts.count(), 20);
    assert!(String::from_utf8(counts.last().await).unwrap().ends_with(" loop"));
}

// - Publisher waits for credits that never come
// - Interrupt must stop it within a few poll intervals
#[tokio::test]
async fn test_publish_interrupted_without_credits() {
    let sink = Arc::new(RecordingSink::new());
    let (_frames, stream) = inbound(8);
    let config = Config::new("topicA")
        .set_mode(Mode::Publish)
        .set_count(10)
        .set_initial_credits(0);
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        interrupt.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(1),
        run_session(
            &config,
            sink.clone(),
            stream,
            MessageGateChain::new(),
            None,
            cancel,
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(report.exit, SessionExit::Interrupted);
    assert_eq!(report.publish.unwrap().cancelled, 10);
    assert_eq!(sink.published(), 0);
}
