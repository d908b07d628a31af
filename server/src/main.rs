//! Stand-in for "the numerical consumer" (trainer host) described in
//! spec.md §4.F/§4.G: wires a `CollectorContext` over a toy two-field batch
//! (`s`, `a`), drains it from a `BatchContext` waiter loop, and separately
//! demonstrates the record plane (`WriterClient` / `DataOnlineLoader` /
//! `ReplayBuffer`) over a loopback TCP connection. Game logic itself stays
//! out of scope (spec.md §1); the worker threads below only exercise the
//! client-side interfaces with a trivial "double the input" computation.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use harness_core::collector::CollectorContext;
use harness_core::extractor::Extractor;
use harness_core::logging;
use harness_core::record::{Record, Records};
use harness_core::remote::{RemoteReceiver, RemoteSender};
use harness_core::replay::{ReplayBuffer, ReplayBufferOptions};
use harness_core::sharedmem::TransferType;
use harness_core::writer::{DataOnlineLoader, GuardedRecords, WriterClient};

#[derive(Clone)]
struct GameState {
    s: f32,
    a: f32,
}

fn run_batching_demo(logger: &slog::Logger) {
    let mut extractor: Extractor<GameState> = Extractor::new();
    extractor.add_field("s", |g: &GameState| g.s, |g: &mut GameState, v| g.s = v);
    extractor.add_field("a", |g: &GameState| g.a, |g: &mut GameState, v| g.a = v);

    let collector: Arc<CollectorContext<GameState>> = Arc::new(CollectorContext::new(extractor));
    let batch_ctx = Arc::new(collector.allocate_shared_mem("play", TransferType::Server, 2, 2, -1));
    let comm = collector.comm();

    let consumer_batch_ctx = batch_ctx.clone();
    let consumer_logger = logger.clone();
    let consumer = thread::spawn(move || {
        let handle = consumer_batch_ctx.wait();
        {
            let mut data = consumer_batch_ctx.shared_mem().data.lock();
            let n = data.batchsize();
            for i in 0..n {
                let s: f32 = data.field("s").read(i);
                data.field("a").write(i, s * 2.0);
            }
        }
        slog::info!(consumer_logger, "batch filled and replied"; "batchsize" => handle.len());
        handle.step();
    });

    let workers: Vec<_> = (0..2)
        .map(|i| {
            let c = comm.clone();
            thread::spawn(move || c.send_wait("play", GameState { s: i as f32, a: 0.0 }))
        })
        .collect();

    for w in workers {
        let reply = w.join().expect("worker thread panicked");
        slog::info!(logger, "worker observed reply"; "s" => reply.s, "a" => reply.a);
    }
    consumer.join().expect("consumer thread panicked");
}

fn run_record_plane_demo(logger: &slog::Logger) {
    let receiver = RemoteReceiver::bind("127.0.0.1:0").expect("bind loader receiver");
    let addr = receiver.local_addr();

    let replay: Arc<ReplayBuffer<Record>> =
        Arc::new(ReplayBuffer::new(ReplayBufferOptions { num_shards: 4, shard_capacity: 1_000, queue_min_size: 0 }));
    let loader_replay = replay.clone();
    let loader_logger = logger.clone();
    let loader = thread::spawn(move || {
        let loader = DataOnlineLoader::new(receiver, loader_logger);
        let mut parity = false;
        loop {
            let still_connected = loader.on_receive(|record| {
                loader_replay.push(record, parity);
                parity = !parity;
            });
            if !still_connected || loader.stats.records.load(Ordering::Relaxed) >= 3 {
                break;
            }
        }
    });

    let sender = RemoteSender::connect(addr).expect("connect writer sender");
    let guarded = Arc::new(GuardedRecords::new());
    let writer = WriterClient::new(sender, 1, guarded, logger.clone());

    let mut records = Records::new();
    records.push(Record { state: vec![0.1, 0.2], action: 1, value: 0.5, reward: 1.0 });
    records.push(Record { state: vec![0.3, 0.4], action: 0, value: -0.5, reward: -1.0 });
    records.push(Record { state: vec![0.5, 0.6], action: 1, value: 0.2, reward: 1.0 });
    let result = writer.on_send(records).expect("writer send failed");
    slog::info!(logger, "loader acknowledged writer batch"; "accepted" => result.accepted);

    loader.join().expect("loader thread panicked");

    let sample = replay.get_sampler();
    slog::info!(logger, "sampled one record from replay buffer"; "action" => sample.item().action);
}

fn main() {
    let logger = logging::root();
    slog::info!(logger, "server starting");

    run_batching_demo(&logger);
    run_record_plane_demo(&logger);

    thread::sleep(Duration::from_millis(10));
    slog::info!(logger, "server exiting");
}
