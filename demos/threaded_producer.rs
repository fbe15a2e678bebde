//! Several threads producing through one shared producer.
//!
//! Uses the in-memory engine, so no broker is needed. Every fifth message is
//! failed by the engine to show failure reports, and one batch carries an
//! oversized payload to show synchronous batch errors.
//!
//! Run with: cargo run --example threaded_producer --features test-utilities
//!
//! Set `LOG_FORMAT=json` or `RUST_LOG=debug` to change the log output.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use kafkaesque_bridge::mock_engine::{MockConfig, MockEngine};
use kafkaesque_bridge::prelude::*;
use kafkaesque_bridge::telemetry::{LogFormat, init_logging};
use tracing::{info, warn};

const THREADS: usize = 4;
const MESSAGES_PER_THREAD: usize = 250;

fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging(LogFormat::from_env())?;

    let failures = Arc::new(AtomicU64::new(0));
    let failed = failures.clone();
    let handler = delivery_fn(move |report| {
        if !report.is_success() {
            failed.fetch_add(1, Ordering::Relaxed);
            let request = report
                .userdata
                .map(|u| String::from_utf8_lossy(u).into_owned())
                .unwrap_or_else(|| format!("batch slot {}", report.index()));
            warn!(request = %request, code = %report.code, "Delivery failed");
        }
    });

    let engine = MockConfig::default()
        .with_partitions("orders", 6)
        .with_delivery_delay(Duration::from_micros(50))
        .with_outcome(|message| {
            if message.seq % 5 == 0 {
                KafkaCode::MessageTimedOut
            } else {
                KafkaCode::None
            }
        });

    let settings = ProducerConfig {
        client_id: "threaded-demo".to_string(),
        poll_interval: Duration::from_millis(20),
        message_max_bytes: 4096,
        ..ProducerConfig::from_env()?
    };
    let producer: Arc<Producer<MockEngine>> = Arc::new(Producer::new(settings, engine, handler)?);
    let topic = producer.add_topic("orders")?;
    let poller = producer.spawn_poller()?;

    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let producer = producer.clone();
            thread::spawn(move || -> Result<()> {
                for i in 0..MESSAGES_PER_THREAD {
                    let key = format!("customer-{}", i % 17);
                    let payload = format!("{{\"worker\":{},\"order\":{}}}", worker, i);
                    let request = format!("req-{}-{}", worker, i);
                    producer.submit(
                        topic,
                        key.as_bytes(),
                        payload.as_bytes(),
                        Some(request.as_bytes()),
                    )?;
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        if let Err(e) = worker.join().map_err(|_| "worker panicked")? {
            warn!(error = %e, "Worker stopped early");
        }
    }

    let oversized = vec![b'x'; 8192];
    let batch = producer.submit_batch(
        topic,
        &[
            BatchItem::new(b"a", b"small").with_userdata(b"batch-0"),
            BatchItem::new(b"b", &oversized).with_userdata(b"batch-1"),
            BatchItem::new(b"c", b"small").with_userdata(b"batch-2"),
        ],
    )?;
    for error in producer.scan_errors(&batch) {
        let request = error.userdata.map(String::from_utf8_lossy);
        warn!(index = error.index, code = %error.code, request = ?request, "Batch member rejected");
    }

    producer.flush(Duration::from_secs(5))?;
    drop(batch);
    poller.stop();

    let stats = producer.topic_stats(topic);
    info!(
        delivered = stats.delivered,
        failed = stats.failed,
        handler_failures = failures.load(Ordering::Relaxed),
        avg_round_trip = ?stats.avg_round_trip(),
        "Done"
    );

    producer.close()?;
    info!(live_allocations = allocation_count(), "Producer closed");
    Ok(())
}
