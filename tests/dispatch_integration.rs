//! Integration tests: send → schedule → route → correlate, against a
//! recording mock router.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use nclink::{
    AllocMode, DeliveryConfig, Engine, EngineConfig, ErrorSink, ExtractFn, FaultKind, Metadata,
    PacketFlags, PacketTypeConfig, PreTxHook, ReplyTarget, RouteId, RouteOutcome, Router, RxKey,
    SendRequest, TxHandle, TxStatus,
};

// ── Test wire format ──────────────────────────────────────────
//
// [type LE u16][id LE u16][body...] — the engine never interprets frames
// itself; these helpers are the caller-supplied extraction and stamping.

fn extractor() -> ExtractFn {
    Arc::new(|bytes: &[u8]| {
        if bytes.len() < 4 {
            return None;
        }
        Some(RxKey {
            packet_type: u16::from_le_bytes([bytes[0], bytes[1]]),
            packet_id: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    })
}

/// Pre-TX hook that stamps type and id into the frame header.
fn stamp_hook() -> PreTxHook {
    Arc::new(|meta: &mut Metadata| {
        let ty = meta.packet_type.to_le_bytes();
        let id = meta.packet_id.to_le_bytes();
        if let Some(payload) = meta.payload.as_mut() {
            let bytes = payload.bytes_mut();
            if bytes.len() >= 4 {
                bytes[0] = ty[0];
                bytes[1] = ty[1];
                bytes[2] = id[0];
                bytes[3] = id[1];
            }
        }
        Ok(())
    })
}

// ── Mock router ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Done,
    InProgress,
    Failed,
}

struct MockRouter {
    mode: Mutex<Mode>,
    calls: Mutex<Vec<(RouteId, Vec<u8>)>>,
    held: Mutex<Vec<TxHandle>>,
}

impl MockRouter {
    fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            calls: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn frames(&self) -> Vec<Vec<u8>> {
        self.calls.lock().unwrap().iter().map(|(_, f)| f.clone()).collect()
    }

    fn routes(&self) -> Vec<RouteId> {
        self.calls.lock().unwrap().iter().map(|(r, _)| *r).collect()
    }

    fn take_held(&self) -> Vec<TxHandle> {
        std::mem::take(&mut self.held.lock().unwrap())
    }
}

impl Router for MockRouter {
    fn route(&self, route: RouteId, tx: TxHandle) -> RouteOutcome {
        self.calls.lock().unwrap().push((route, tx.frame().to_vec()));
        match *self.mode.lock().unwrap() {
            Mode::Done => RouteOutcome::Done(tx),
            Mode::InProgress => {
                self.held.lock().unwrap().push(tx);
                RouteOutcome::InProgress
            }
            Mode::Failed => RouteOutcome::Failed(tx),
        }
    }
}

// ── Harness helpers ───────────────────────────────────────────

fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for: {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

fn command_type(route: RouteId, limit: u16) -> (PacketTypeConfig, DeliveryConfig) {
    let delivery = DeliveryConfig::new(8, 8);
    let mut cfg = PacketTypeConfig::new(route, delivery.clone());
    cfg.inflight_limit = limit;
    cfg.pending_depth = 64;
    cfg.pre_tx = Some(stamp_hook());
    (cfg, delivery)
}

fn engine_with(router: Arc<MockRouter>, static_types: Vec<PacketTypeConfig>) -> Engine {
    let config = EngineConfig::new("test", extractor());
    Engine::init(config, static_types, router).unwrap()
}

/// Build a command request with a 4-byte header placeholder plus `body`.
fn command_req(engine: &Engine, ty: u16, body: &[u8]) -> SendRequest {
    let mut frame = vec![0u8; 4];
    frame.extend_from_slice(body);
    let payload = engine.pool().with_payload(&frame, AllocMode::NoWait).unwrap();
    SendRequest::command(ty, payload)
}

fn respond(engine: &Engine, header: &[u8], body: &[u8]) {
    let mut frame = header[..4].to_vec();
    frame.extend_from_slice(body);
    let buf = engine.pool().with_payload(&frame, AllocMode::NoWait).unwrap();
    engine.inbound().submit(buf).unwrap();
}

// ── Scenarios ─────────────────────────────────────────────────

#[test]
fn fire_and_forget_creates_no_inflight_entry() {
    let router = MockRouter::new(Mode::Done);
    let (cfg, _delivery) = command_type(1, 0);
    let engine = engine_with(router.clone(), vec![cfg]);

    let payload = engine
        .pool()
        .with_payload(&[0, 0, 0, 0, 42], AllocMode::NoWait)
        .unwrap();
    engine.send(SendRequest::event(0, payload)).unwrap();

    wait_for("event transmitted", || router.call_count() == 1);
    wait_for("engine idle again", || engine.is_idle());

    let stats = engine.stats();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.types[0].inflight, 0);
    assert_eq!(stats.types[0].inflight_count, 0);
}

#[test]
fn sync_command_round_trip_delivers_exact_payload() {
    let router = MockRouter::new(Mode::Done);
    let (cfg, _delivery) = command_type(1, 0);
    let engine = engine_with(router.clone(), vec![cfg]);

    let response_body = [9u8, 8, 7, 6];
    let meta = thread::scope(|s| {
        let handle = s.spawn(|| {
            engine
                .send_and_wait(command_req(&engine, 0, b"ping"), Duration::from_secs(2))
                .unwrap()
        });

        wait_for("command transmitted", || router.call_count() == 1);
        // In-flight entry exists until the response lands.
        wait_for("command parked in-flight", || {
            engine.stats().types[0].inflight_count == 1
        });

        let header = router.frames()[0].clone();
        respond(&engine, &header, &response_body);
        handle.join().unwrap()
    });

    let payload = meta.payload.expect("response payload attached");
    assert_eq!(&payload[4..], &response_body);
    assert_eq!(payload.len(), 4 + response_body.len());

    let stats = engine.stats();
    assert_eq!(stats.matched, 1);
    // The in-flight slot was retired exactly once.
    assert_eq!(stats.types[0].inflight_count, 0);
    assert!(engine.is_idle());
}

#[test]
fn inflight_ceiling_gates_second_send() {
    let router = MockRouter::new(Mode::Done);
    let engine = engine_with(router.clone(), Vec::new());

    let (cfg, _delivery) = command_type(3, 1);
    engine.register_packet_type(10, cfg).unwrap();

    engine.send(command_req(&engine, 10, b"first")).unwrap();
    engine.send(command_req(&engine, 10, b"second")).unwrap();

    wait_for("first command transmitted", || router.call_count() == 1);
    // The ceiling holds the second packet back.
    thread::sleep(Duration::from_millis(30));
    assert_eq!(router.call_count(), 1);

    // A matching response retires the slot; the second send goes out.
    let header = router.frames()[0].clone();
    respond(&engine, &header, &[]);
    wait_for("second command transmitted", || router.call_count() == 2);
    assert_eq!(router.routes(), vec![3, 3]);
}

#[test]
fn unsolicited_frame_delivered_async_and_signaled_once() {
    let router = MockRouter::new(Mode::Done);
    let (cfg, delivery) = command_type(1, 0);
    let engine = engine_with(router.clone(), vec![cfg]);

    // Frame whose id matches nothing in flight.
    let frame = [0u8, 0, 0x34, 0x12, 0xAA, 0xBB];
    let buf = engine.pool().with_payload(&frame, AllocMode::NoWait).unwrap();
    engine.inbound().submit(buf).unwrap();

    wait_for("async delivery signaled", || {
        delivery.flags.peek(delivery.async_bit) != 0
    });
    assert!(!delivery.async_queue.is_empty());
    assert_eq!(
        delivery.flags.wait_any(delivery.async_bit, Some(Duration::ZERO)),
        delivery.async_bit
    );
    // Signaled exactly once.
    assert_eq!(
        delivery.flags.wait_any(delivery.async_bit, Some(Duration::ZERO)),
        0
    );

    let delivered = delivery.async_queue.dequeue().unwrap();
    assert_eq!(delivered.as_slice(), &frame);
    assert_eq!(engine.stats().unsolicited, 1);
}

#[test]
fn deinit_acknowledged_while_worker_blocked() {
    let router = MockRouter::new(Mode::Done);
    let (cfg, _delivery) = command_type(1, 0);
    let engine = engine_with(router, vec![cfg]);

    // The worker is parked in its group wait; deinit must still complete.
    thread::sleep(Duration::from_millis(10));
    engine.deinit().unwrap();
}

#[test]
fn expired_pending_command_never_reaches_transport() {
    let router = MockRouter::new(Mode::Done);
    let (cfg, _delivery) = command_type(1, 1);
    let engine = engine_with(router.clone(), vec![cfg]);

    // First command occupies the single in-flight slot.
    engine.send(command_req(&engine, 0, b"first")).unwrap();
    wait_for("first command transmitted", || router.call_count() == 1);

    // Second command ages out while the ceiling blocks it.
    let mut req = command_req(&engine, 0, b"second");
    req.timeout_ms = 30;
    engine.send(req).unwrap();
    thread::sleep(Duration::from_millis(60));

    let header = router.frames()[0].clone();
    respond(&engine, &header, &[]);

    wait_for("stale command dropped", || engine.stats().expired == 1);
    assert_eq!(router.call_count(), 1);
}

#[test]
fn zero_timeout_command_is_never_dropped_by_age() {
    let router = MockRouter::new(Mode::Done);
    let (cfg, _delivery) = command_type(1, 1);
    let engine = engine_with(router.clone(), vec![cfg]);

    engine.send(command_req(&engine, 0, b"first")).unwrap();
    wait_for("first command transmitted", || router.call_count() == 1);

    // timeout_ms = 0 — may wait indefinitely in the pending queue.
    engine.send(command_req(&engine, 0, b"second")).unwrap();
    thread::sleep(Duration::from_millis(60));

    let header = router.frames()[0].clone();
    respond(&engine, &header, &[]);

    wait_for("second command transmitted", || router.call_count() == 2);
    assert_eq!(engine.stats().expired, 0);
}

#[test]
fn async_completion_parks_command_inflight() {
    let router = MockRouter::new(Mode::InProgress);
    let (cfg, _delivery) = command_type(1, 0);
    let engine = engine_with(router.clone(), vec![cfg]);

    engine.send(command_req(&engine, 0, b"cmd")).unwrap();
    wait_for("command handed to transport", || router.call_count() == 1);

    // Nothing is in flight until the transport reports completion.
    assert_eq!(engine.stats().types[0].inflight, 0);

    let handle = router.take_held().pop().unwrap();
    let header = router.frames()[0].clone();
    handle.complete(TxStatus::Sent);

    wait_for("command parked in-flight", || {
        engine.stats().types[0].inflight == 1
    });
    assert_eq!(engine.stats().types[0].inflight_count, 1);

    respond(&engine, &header, &[1]);
    wait_for("response correlated", || engine.stats().matched == 1);
    assert_eq!(engine.stats().types[0].inflight_count, 0);
}

#[test]
fn failed_completion_releases_instead_of_parking() {
    let router = MockRouter::new(Mode::InProgress);
    let sink = ErrorSink::new(8, 1 << 4);
    let (cfg, _delivery) = command_type(1, 0);
    let mut config = EngineConfig::new("test", extractor());
    config.error_sink = Some(sink.clone());
    let engine = Engine::init(config, vec![cfg], router.clone()).unwrap();

    engine.send(command_req(&engine, 0, b"doomed")).unwrap();
    wait_for("command handed to transport", || router.call_count() == 1);

    let handle = router.take_held().pop().unwrap();
    handle.complete(TxStatus::Failed);

    wait_for("failure escalated", || sink.flags.peek(sink.bit) != 0);
    assert_eq!(sink.flags.wait_any(sink.bit, Some(Duration::ZERO)), sink.bit);
    let report = sink.queue.dequeue().unwrap();
    assert_eq!(report.kind, FaultKind::CommandTxFailed);
    assert_eq!(report.packet_type, Some(0));

    // Never parked: nothing awaits a response.
    assert_eq!(engine.stats().types[0].inflight, 0);
    wait_for("engine idle", || engine.is_idle());
}

#[test]
fn immediate_route_failure_reports_and_releases() {
    let router = MockRouter::new(Mode::Failed);
    let sink = ErrorSink::new(8, 1 << 4);
    let (cfg, _delivery) = command_type(1, 0);
    let mut config = EngineConfig::new("test", extractor());
    config.error_sink = Some(sink.clone());
    let engine = Engine::init(config, vec![cfg], router.clone()).unwrap();

    engine.send(command_req(&engine, 0, b"rejected")).unwrap();

    wait_for("rejection escalated", || !sink.queue.is_empty());
    let report = sink.queue.dequeue().unwrap();
    assert_eq!(report.kind, FaultKind::CommandTxFailed);
    wait_for("engine idle", || engine.is_idle());
    assert_eq!(engine.stats().types[0].inflight_count, 0);
}

#[test]
fn send_and_wait_times_out_without_response() {
    let router = MockRouter::new(Mode::Done);
    let (cfg, _delivery) = command_type(1, 0);
    let engine = engine_with(router, vec![cfg]);

    let err = engine
        .send_and_wait(command_req(&engine, 0, b"lost"), Duration::from_millis(50))
        .unwrap_err();
    assert_eq!(err, nclink::Error::ResponseTimeout);
}

#[test]
fn packet_ids_unique_under_concurrent_senders() {
    let router = MockRouter::new(Mode::Done);
    let (cfg, _delivery) = command_type(1, 0);
    let engine = engine_with(router.clone(), vec![cfg]);

    let ids = Arc::new(Mutex::new(Vec::new()));
    thread::scope(|s| {
        for _ in 0..4 {
            let engine = &engine;
            let ids = ids.clone();
            s.spawn(move || {
                for _ in 0..25 {
                    let payload = engine
                        .pool()
                        .with_payload(&[0, 0, 0, 0], AllocMode::Wait(Duration::from_secs(1)))
                        .unwrap();
                    let mut req = SendRequest::event(0, payload);
                    req.flags = PacketFlags::event();
                    let id = engine.send(req).unwrap();
                    ids.lock().unwrap().push(id);
                }
            });
        }
    });

    let mut ids = Arc::try_unwrap(ids).unwrap().into_inner().unwrap();
    assert_eq!(ids.len(), 100);
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 100, "correlation ids must be unique per type");

    wait_for("all events transmitted", || router.call_count() == 100);
}

#[test]
fn malformed_frames_are_dropped_silently() {
    let router = MockRouter::new(Mode::Done);
    let (cfg, _delivery) = command_type(1, 0);
    let engine = engine_with(router, vec![cfg]);

    // Too short for the extraction function.
    let runt = engine.pool().with_payload(&[0xFF], AllocMode::NoWait).unwrap();
    engine.inbound().submit(runt).unwrap();
    // Unknown packet type.
    let unknown = engine
        .pool()
        .with_payload(&[0xEE, 0xEE, 1, 0], AllocMode::NoWait)
        .unwrap();
    engine.inbound().submit(unknown).unwrap();

    wait_for("both frames dropped", || engine.stats().dropped == 2);
    assert!(engine.is_idle());
}

#[test]
fn group_reply_falls_back_to_type_delivery_flags() {
    let router = MockRouter::new(Mode::Done);
    let (cfg, delivery) = command_type(1, 0);
    let engine = engine_with(router.clone(), vec![cfg]);

    // Plain send with the default Group reply target: the response must
    // signal the type's shared sync bit instead of a thread flag.
    let mut req = command_req(&engine, 0, b"grouped");
    req.reply = ReplyTarget::Group;
    let id = engine.send(req).unwrap();

    wait_for("command transmitted", || router.call_count() == 1);
    let header = router.frames()[0].clone();
    respond(&engine, &header, &[0xCC]);

    wait_for("sync delivery signaled", || {
        delivery.flags.peek(delivery.sync_bit) != 0
    });
    assert_eq!(
        delivery.flags.wait_any(delivery.sync_bit, Some(Duration::ZERO)),
        delivery.sync_bit
    );
    let meta = delivery
        .sync_queue
        .remove_matching(|m| m.packet_id == id)
        .unwrap();
    assert_eq!(meta.payload.unwrap()[4..], [0xCC]);
}
