//! Integration tests for the protocol engine.
//!
//! The engine runs on a `MemoryTransport`; the test holds the matching
//! `MemoryPeer` and plays the server: it injects frames, drops the link
//! and inspects every record the engine sent. `sent()` also asserts that
//! each outbound envelope holds exactly one record.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tether::prelude::*;
use tether::transport::TransportError;

// =========================================================================
// Harness
// =========================================================================

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Item(ReceivedItem),
    Connected(SlotConfig),
    Disconnected(DisconnectReason),
    Death(String, String),
    Chat(String),
    Data(DataResponse),
}

struct Harness {
    engine: ProtocolEngine<MemoryTransport>,
    peer: MemoryPeer,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Harness {
    fn new(config: ClientConfig) -> Self {
        let (transport, peer) = MemoryTransport::pair();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (s1, s2, s3, s4, s5, s6) = (
            Arc::clone(&seen),
            Arc::clone(&seen),
            Arc::clone(&seen),
            Arc::clone(&seen),
            Arc::clone(&seen),
            Arc::clone(&seen),
        );
        let engine = ProtocolEngine::builder(transport)
            .config(config)
            .on_item_received(move |item| s1.lock().unwrap().push(Seen::Item(item.clone())))
            .on_connected(move |cfg| s2.lock().unwrap().push(Seen::Connected(cfg.clone())))
            .on_disconnected(move |reason| {
                s3.lock().unwrap().push(Seen::Disconnected(reason.clone()))
            })
            .on_death_link(move |source, cause| {
                s4.lock()
                    .unwrap()
                    .push(Seen::Death(source.to_string(), cause.to_string()))
            })
            .on_chat_message(move |msg| s5.lock().unwrap().push(Seen::Chat(msg.text.clone())))
            .on_data_retrieved(move |resp| s6.lock().unwrap().push(Seen::Data(resp.clone())))
            .build()
            .expect("valid config");

        Self { engine, peer, seen }
    }

    fn default_config() -> Self {
        Self::new(config())
    }

    /// Connects as Alice and completes the handshake in one poll.
    fn authenticate(&mut self, server_checked: &[i64]) {
        self.engine.connect("host:1234", "Alice", "").unwrap();
        push(&self.peer, &[room_info(), connected(server_checked)]);
        self.engine.poll().unwrap();
        assert!(self.engine.is_authenticated());
    }

    /// Records sent since the last call. Each envelope must hold one record.
    fn sent(&self) -> Vec<Value> {
        self.peer
            .take_sent()
            .into_iter()
            .map(|frame| {
                let value: Value = serde_json::from_slice(&frame).expect("sent frame is JSON");
                let array = value.as_array().expect("envelope is an array");
                assert_eq!(array.len(), 1, "exactly one record per envelope");
                array[0].clone()
            })
            .collect()
    }

    fn take_seen(&self) -> Vec<Seen> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }

    fn items_seen(&self) -> Vec<ReceivedItem> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Seen::Item(item) => Some(item.clone()),
                _ => None,
            })
            .collect()
    }
}

fn config() -> ClientConfig {
    ClientConfig::new("Test Game").with_reconnect_delay(Duration::ZERO)
}

fn push(peer: &MemoryPeer, records: &[Value]) {
    peer.push_text(&Value::Array(records.to_vec()).to_string());
}

fn room_info() -> Value {
    json!({"cmd": "RoomInfo", "games": ["Test Game"], "seed_name": "S1"})
}

fn connected(checked: &[i64]) -> Value {
    json!({
        "cmd": "Connected",
        "team": 0,
        "slot": 7,
        "checked_locations": checked,
        "missing_locations": [],
        "players": [
            {"team": 0, "slot": 7, "alias": "", "name": "Alice"},
            {"team": 0, "slot": 2, "alias": "", "name": "Bob"}
        ],
        "slot_data": {"goal": 1}
    })
}

fn items(index: u64, ids: &[i64]) -> Value {
    let items: Vec<Value> = ids
        .iter()
        .map(|id| json!({"item": id, "location": 500 + id, "player": 2, "flags": 0}))
        .collect();
    json!({"cmd": "ReceivedItems", "index": index, "items": items})
}

fn cmds(records: &[Value]) -> Vec<String> {
    records
        .iter()
        .map(|r| r["cmd"].as_str().unwrap_or("?").to_string())
        .collect()
}

fn records_named<'a>(records: &'a [Value], cmd: &str) -> Vec<&'a Value> {
    records.iter().filter(|r| r["cmd"] == cmd).collect()
}

fn loc(id: i64) -> LocationId {
    LocationId(id)
}

// =========================================================================
// Scenarios
// =========================================================================

#[test]
fn test_scenario_a_single_poll_authenticates() {
    let mut h = Harness::default_config();
    h.engine.connect("host:1234", "Alice", "").unwrap();
    assert_eq!(h.engine.phase(), Phase::Connecting);
    assert_eq!(h.peer.last_url().as_deref(), Some("ws://host:1234"));

    push(&h.peer, &[room_info(), connected(&[1, 2])]);
    h.engine.poll().unwrap();

    assert!(h.engine.is_authenticated());
    assert!(h.engine.is_connected());
    assert!(h.engine.is_location_checked(loc(1)));
    assert!(h.engine.is_location_checked(loc(2)));
    assert!(!h.engine.is_location_checked(loc(3)));
    assert_eq!(
        h.engine.identity(),
        Some(tether::session::SlotIdentity { team: 0, slot: SlotId(7) })
    );
    assert_eq!(h.engine.slot_config().get::<u32>("goal").unwrap(), Some(1));

    let sent = h.sent();
    assert_eq!(cmds(&sent), vec!["GetDataPackage", "Connect", "Sync"]);
    let connect = &sent[1];
    assert_eq!(connect["name"], "Alice");
    assert_eq!(connect["game"], "Test Game");
    assert_eq!(connect["password"], "");
    assert_eq!(connect["items_handling"], 7);
    assert_eq!(connect["version"]["class"], "Version");
    assert_eq!(connect["slot_data"], true);
    assert_eq!(connect["tags"], json!([]));
    assert_eq!(connect["uuid"].as_str().map(str::len), Some(32));

    match h.take_seen().as_slice() {
        [Seen::Connected(cfg)] => assert_eq!(cfg.raw("goal"), Some(&json!(1))),
        other => panic!("expected one Connected event, got {other:?}"),
    }
}

#[test]
fn test_scenario_b_pending_checks_flush_once_on_auth() {
    let mut h = Harness::default_config();

    h.engine.report_checks([loc(5), loc(6)]);
    assert_eq!(h.engine.pending_checks(), &[loc(5), loc(6)]);
    assert!(h.engine.is_location_checked(loc(5)));

    h.authenticate(&[]);

    let sent = h.sent();
    let checks = records_named(&sent, "LocationChecks");
    assert_eq!(checks.len(), 1, "exactly one batch record");
    assert_eq!(checks[0]["locations"], json!([5, 6]));
    assert!(h.engine.pending_checks().is_empty());
}

#[test]
fn test_scenario_c_duplicate_batch_applies_once() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);

    push(&h.peer, &[items(0, &[100, 101])]);
    h.engine.poll().unwrap();
    push(&h.peer, &[items(0, &[100, 101])]);
    h.engine.poll().unwrap();

    let received = h.items_seen();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].item, ItemId(100));
    assert_eq!(received[0].index, 0);
    assert_eq!(received[1].item, ItemId(101));
    assert_eq!(received[1].index, 1);
    assert_eq!(h.engine.next_item_index(), 2);
}

// =========================================================================
// Item delivery
// =========================================================================

#[test]
fn test_received_item_carries_names_and_origin() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);

    push(&h.peer, &[items(0, &[100])]);
    h.engine.poll().unwrap();

    let item = &h.items_seen()[0];
    assert_eq!(item.item_name, "Item 100");
    assert_eq!(item.sender, SlotId(2));
    assert_eq!(item.sender_name, "Bob");
    assert_eq!(item.location, loc(600));
}

#[test]
fn test_overlapping_batches_deliver_in_order_without_duplicates() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);

    push(&h.peer, &[items(0, &[1, 2])]);
    h.engine.poll().unwrap();
    push(&h.peer, &[items(1, &[2, 3])]);
    h.engine.poll().unwrap();

    let indexes: Vec<u64> = h.items_seen().iter().map(|i| i.index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
    let ids: Vec<ItemId> = h.items_seen().iter().map(|i| i.item).collect();
    assert_eq!(ids, vec![ItemId(1), ItemId(2), ItemId(3)]);
}

#[test]
fn test_batch_with_gap_is_dropped_and_resync_requested() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);
    h.sent();

    push(&h.peer, &[items(3, &[9])]);
    h.engine.poll().unwrap();

    assert!(h.items_seen().is_empty());
    assert_eq!(h.engine.next_item_index(), 0);
    assert_eq!(cmds(&h.sent()), vec!["Sync"]);
}

#[test]
fn test_items_before_auth_are_ignored() {
    let mut h = Harness::default_config();
    h.engine.connect("host:1234", "Alice", "").unwrap();
    push(&h.peer, &[items(0, &[1])]);
    h.engine.poll().unwrap();

    assert!(h.items_seen().is_empty());
    assert_eq!(h.engine.next_item_index(), 0);
}

#[test]
fn test_one_frame_per_poll() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);

    push(&h.peer, &[items(0, &[1])]);
    push(&h.peer, &[items(1, &[2])]);

    h.engine.poll().unwrap();
    assert_eq!(h.items_seen().len(), 1);
    h.engine.poll().unwrap();
    assert_eq!(h.items_seen().len(), 2);
}

// =========================================================================
// Location checks
// =========================================================================

#[test]
fn test_report_checks_twice_sends_once() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);
    h.sent();

    h.engine.report_checks([loc(10)]);
    h.engine.report_checks([loc(10)]);

    let sent = h.sent();
    assert_eq!(cmds(&sent), vec!["LocationChecks"]);
    assert_eq!(sent[0]["locations"], json!([10]));
}

#[test]
fn test_report_checks_authenticated_sends_new_ids_as_one_batch() {
    let mut h = Harness::default_config();
    h.authenticate(&[3]);
    h.sent();

    h.engine.report_checks([loc(10), loc(3), loc(11), loc(10)]);

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["locations"], json!([10, 11]));
}

#[test]
fn test_checks_reported_while_handshaking_flush_on_auth() {
    let mut h = Harness::default_config();
    h.engine.connect("host:1234", "Alice", "").unwrap();
    push(&h.peer, &[room_info()]);
    h.engine.poll().unwrap();
    assert_eq!(h.engine.phase(), Phase::AwaitingAuthResult);

    h.engine.report_checks([loc(8)]);
    assert_eq!(records_named(&h.sent(), "LocationChecks").len(), 0);

    push(&h.peer, &[connected(&[])]);
    h.engine.poll().unwrap();

    let sent = h.sent();
    let checks = records_named(&sent, "LocationChecks");
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0]["locations"], json!([8]));
}

#[test]
fn test_room_update_merges_checked_locations_and_names() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);

    push(
        &h.peer,
        &[json!({
            "cmd": "RoomUpdate",
            "checked_locations": [40, 41],
            "players": [{"team": 0, "slot": 2, "alias": "Bobby", "name": "Bob"}]
        })],
    );
    h.engine.poll().unwrap();

    assert!(h.engine.is_location_checked(loc(40)));
    assert!(h.engine.is_location_checked(loc(41)));
    assert_eq!(h.engine.player_name(SlotId(2)), "Bobby");
    assert_eq!(h.engine.player_name(SlotId(9)), "Slot 9");
}

// =========================================================================
// Reconnect
// =========================================================================

#[test]
fn test_reconnect_resyncs_without_redelivery() {
    let mut h = Harness::default_config();
    h.authenticate(&[1]);
    h.engine.report_checks([loc(2)]);
    push(&h.peer, &[items(0, &[100])]);
    h.engine.poll().unwrap();
    h.sent();
    h.take_seen();

    // --- Server restarts ---
    h.peer.drop_connection("server restart");
    h.engine.poll().unwrap();
    assert_eq!(h.engine.phase(), Phase::Disconnected);
    assert!(h.engine.has_connection_info());
    assert!(h.engine.is_location_checked(loc(2)));
    assert_eq!(h.engine.next_item_index(), 1);
    match h.take_seen().as_slice() {
        [Seen::Disconnected(DisconnectReason::ConnectionLost(TransportError::ConnectionClosed(r)))] => {
            assert_eq!(r, "server restart");
        }
        other => panic!("expected ConnectionLost, got {other:?}"),
    }

    // --- Supervisor reconnects on the next poll ---
    h.engine.poll().unwrap();
    assert_eq!(h.peer.open_count(), 2);
    assert_eq!(h.engine.phase(), Phase::AwaitingRoomInfo);

    // The server never recorded location 2.
    push(&h.peer, &[room_info(), connected(&[1])]);
    h.engine.poll().unwrap();
    assert!(h.engine.is_authenticated());

    let sent = h.sent();
    let checks = records_named(&sent, "LocationChecks");
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0]["locations"], json!([2]), "unconfirmed check is re-sent");
    assert!(cmds(&sent).contains(&"Sync".to_string()));

    // Full resync from index 0: only the new item surfaces.
    push(&h.peer, &[items(0, &[100, 101])]);
    h.engine.poll().unwrap();
    let received = h.items_seen();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].index, 1);
    assert_eq!(received[0].item, ItemId(101));
}

#[test]
fn test_reconnect_waits_for_delay() {
    let mut h = Harness::new(config().with_reconnect_delay(Duration::from_secs(60)));
    h.authenticate(&[]);

    h.peer.drop_connection("gone");
    h.engine.poll().unwrap();
    h.engine.poll().unwrap();
    h.engine.poll().unwrap();

    assert_eq!(h.peer.open_count(), 1);
    assert_eq!(h.engine.phase(), Phase::Disconnected);
}

#[test]
fn test_failed_reopen_is_rescheduled() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);

    h.peer.drop_connection("gone");
    h.engine.poll().unwrap();

    h.peer
        .fail_next_open(TransportError::ConnectFailed("refused".into()));
    h.engine.poll().unwrap();
    assert_eq!(h.peer.open_count(), 1);
    assert_eq!(h.engine.phase(), Phase::Disconnected);

    h.engine.poll().unwrap();
    assert_eq!(h.peer.open_count(), 2);
    assert_eq!(h.engine.phase(), Phase::AwaitingRoomInfo);
}

#[test]
fn test_handshake_failure_schedules_reconnect() {
    let mut h = Harness::default_config();
    h.engine.connect("host:1234", "Alice", "").unwrap();
    h.peer.drop_connection("handshake timed out");

    // Opened, then Closed in the same poll.
    h.engine.poll().unwrap();
    assert_eq!(h.engine.phase(), Phase::Disconnected);

    h.engine.poll().unwrap();
    assert_eq!(h.peer.open_count(), 2);
}

// =========================================================================
// Refusal and disconnect
// =========================================================================

#[test]
fn test_refusal_is_returned_and_not_retried() {
    let mut h = Harness::default_config();
    h.engine.connect("host:1234", "Alice", "wrong").unwrap();
    push(
        &h.peer,
        &[room_info(), json!({"cmd": "ConnectionRefused", "errors": ["InvalidPassword"]})],
    );

    match h.engine.poll() {
        Err(ClientError::AuthenticationRefused { errors }) => {
            assert_eq!(errors, vec!["InvalidPassword".to_string()]);
        }
        other => panic!("expected AuthenticationRefused, got {other:?}"),
    }
    assert_eq!(h.engine.phase(), Phase::Disconnected);
    assert_eq!(
        h.take_seen(),
        vec![Seen::Disconnected(DisconnectReason::Refused(vec![
            "InvalidPassword".to_string()
        ]))]
    );

    for _ in 0..3 {
        h.engine.poll().unwrap();
    }
    assert_eq!(h.peer.open_count(), 1, "refusal is never retried");
    assert!(h.take_seen().is_empty(), "late close is a no-op");
}

#[test]
fn test_disconnect_is_synchronous_and_final() {
    let mut h = Harness::default_config();
    h.authenticate(&[1]);
    h.take_seen();

    h.engine.disconnect();
    assert_eq!(h.engine.phase(), Phase::Disconnected);
    assert!(!h.engine.has_connection_info());
    assert!(!h.engine.is_location_checked(loc(1)));
    assert_eq!(
        h.take_seen(),
        vec![Seen::Disconnected(DisconnectReason::Requested)]
    );

    for _ in 0..3 {
        h.engine.poll().unwrap();
    }
    assert!(h.take_seen().is_empty(), "transport close after disconnect is ignored");
    assert_eq!(h.peer.open_count(), 1);
}

#[test]
fn test_disconnect_when_idle_is_silent() {
    let mut h = Harness::default_config();
    h.engine.disconnect();
    assert!(h.take_seen().is_empty());
}

#[test]
fn test_connect_rejects_malformed_address() {
    let mut h = Harness::default_config();
    let err = h.engine.connect("http://host", "Alice", "").unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::InvalidAddress { .. })
    ));
    assert_eq!(h.engine.phase(), Phase::Disconnected);

    h.engine.poll().unwrap();
    assert_eq!(h.peer.open_count(), 0, "no retry after a rejected connect");
}

#[test]
fn test_connect_with_bad_address_keeps_live_session() {
    let mut h = Harness::default_config();
    h.authenticate(&[1]);
    push(&h.peer, &[items(0, &[100])]);
    h.engine.poll().unwrap();
    h.sent();
    h.take_seen();

    let err = h.engine.connect("http://host:1234", "Alice", "").unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::InvalidAddress { .. })
    ));
    assert!(h.engine.is_authenticated());
    assert!(h.engine.is_location_checked(loc(1)));
    assert_eq!(h.engine.next_item_index(), 1);
    assert_eq!(h.engine.connection_info().unwrap().address, "host:1234");
    assert!(h.take_seen().is_empty());
    assert!(h.sent().is_empty());

    push(&h.peer, &[items(0, &[100, 101])]);
    h.engine.poll().unwrap();
    let indexes: Vec<u64> = h.items_seen().iter().map(|i| i.index).collect();
    assert_eq!(indexes, vec![1]);
}

#[test]
fn test_connect_replacing_live_connection_reports_disconnect() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);
    h.take_seen();

    h.engine.connect("host:1234", "Alice", "").unwrap();
    assert_eq!(h.engine.phase(), Phase::Connecting);
    assert_eq!(
        h.take_seen(),
        vec![Seen::Disconnected(DisconnectReason::Requested)]
    );

    push(&h.peer, &[room_info(), connected(&[])]);
    h.engine.poll().unwrap();
    assert!(h.engine.is_authenticated());
    match h.take_seen().as_slice() {
        [Seen::Connected(_)] => {}
        other => panic!("expected only Connected, got {other:?}"),
    }
    assert_eq!(h.peer.open_count(), 2);
}

#[test]
fn test_connect_same_slot_keeps_ledger_other_slot_resets() {
    let mut h = Harness::default_config();
    h.authenticate(&[1]);
    push(&h.peer, &[items(0, &[100])]);
    h.engine.poll().unwrap();

    h.engine.connect("host:1234", "Alice", "new-password").unwrap();
    assert_eq!(h.engine.next_item_index(), 1);
    assert!(h.engine.is_location_checked(loc(1)));

    h.engine.connect("host:1234", "Carol", "").unwrap();
    assert_eq!(h.engine.next_item_index(), 0);
    assert!(!h.engine.is_location_checked(loc(1)));
    assert_eq!(h.engine.connection_info().unwrap().slot_name, "Carol");
}

// =========================================================================
// Tolerance
// =========================================================================

#[test]
fn test_unknown_record_leaves_state_untouched() {
    let mut h = Harness::default_config();
    h.authenticate(&[1]);
    h.sent();
    h.take_seen();
    let before = h.engine.sync_snapshot();

    push(&h.peer, &[json!({"cmd": "SetReply", "key": "x", "value": 3})]);
    h.engine.poll().unwrap();

    assert!(h.engine.is_authenticated());
    assert_eq!(h.engine.sync_snapshot(), before);
    assert!(h.take_seen().is_empty());
    assert!(h.sent().is_empty());
}

#[test]
fn test_unknown_record_does_not_affect_neighbours() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);

    push(&h.peer, &[json!({"cmd": "Tick", "a": 1}), items(0, &[5])]);
    h.engine.poll().unwrap();

    assert_eq!(h.items_seen().len(), 1);
}

#[test]
fn test_malformed_frame_is_dropped() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);

    h.peer.push_text("{not json");
    h.engine.poll().unwrap();
    push(&h.peer, &[json!({"cmd": "ReceivedItems", "index": "zero"}), items(0, &[5])]);
    h.engine.poll().unwrap();

    assert!(h.engine.is_authenticated());
    assert_eq!(h.items_seen().len(), 1);
}

#[test]
fn test_out_of_phase_accept_is_ignored() {
    let mut h = Harness::default_config();
    h.engine.connect("host:1234", "Alice", "").unwrap();

    push(&h.peer, &[connected(&[1])]);
    h.engine.poll().unwrap();

    assert_eq!(h.engine.phase(), Phase::AwaitingRoomInfo);
    assert!(!h.engine.is_location_checked(loc(1)));
}

#[test]
fn test_invalid_packet_is_logged_only() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);
    h.sent();

    push(
        &h.peer,
        &[json!({"cmd": "InvalidPacket", "type": "cmd", "original_cmd": "Say", "text": "no"})],
    );
    h.engine.poll().unwrap();

    assert!(h.engine.is_authenticated());
    assert!(h.sent().is_empty(), "no retry");
}

// =========================================================================
// Death link
// =========================================================================

#[test]
fn test_death_link_own_echo_suppressed() {
    let mut h = Harness::new(config().with_death_link(true));
    h.authenticate(&[]);
    let sent = h.sent();
    assert_eq!(records_named(&sent, "Connect")[0]["tags"], json!(["DeathLink"]));

    h.engine.send_death("test");
    let sent = h.sent();
    assert_eq!(cmds(&sent), vec!["Bounce"]);
    let bounce = &sent[0];
    assert_eq!(bounce["tags"], json!(["DeathLink"]));
    assert_eq!(bounce["data"]["source"], "Alice");
    assert_eq!(bounce["data"]["cause"], "test");
    assert!(bounce["data"]["time"].is_f64());

    // The server echoes the bounce back to us.
    push(
        &h.peer,
        &[json!({"cmd": "Bounced", "tags": ["DeathLink"], "data": bounce["data"].clone()})],
    );
    h.engine.poll().unwrap();
    assert!(h.take_seen().iter().all(|s| !matches!(s, Seen::Death(..))));

    // Someone else's death gets through.
    push(
        &h.peer,
        &[json!({
            "cmd": "Bounced",
            "tags": ["DeathLink"],
            "data": {"time": 1.5, "source": "Bob", "cause": "lava"}
        })],
    );
    h.engine.poll().unwrap();
    assert_eq!(
        h.take_seen(),
        vec![Seen::Death("Bob".into(), "lava".into())]
    );
}

#[test]
fn test_death_link_every_own_echo_suppressed() {
    let mut h = Harness::new(config().with_death_link(true));
    h.authenticate(&[]);
    h.sent();
    h.take_seen();

    for _ in 0..500 {
        h.engine.send_death("test");
        let sent = h.sent();
        let data = sent[0]["data"].clone();
        push(
            &h.peer,
            &[json!({"cmd": "Bounced", "tags": ["DeathLink"], "data": data})],
        );
        h.engine.poll().unwrap();
    }

    let delivered = h
        .take_seen()
        .iter()
        .filter(|s| matches!(s, Seen::Death(..)))
        .count();
    assert_eq!(delivered, 0);
}

#[test]
fn test_death_link_toggled_during_handshake_is_announced() {
    let mut h = Harness::default_config();
    h.engine.connect("host:1234", "Alice", "").unwrap();
    push(&h.peer, &[room_info()]);
    h.engine.poll().unwrap();
    assert_eq!(h.engine.phase(), Phase::AwaitingAuthResult);

    h.engine.set_death_link_enabled(true);
    push(&h.peer, &[connected(&[])]);
    h.engine.poll().unwrap();

    let sent = h.sent();
    assert_eq!(records_named(&sent, "Connect")[0]["tags"], json!([]));
    let updates = records_named(&sent, "ConnectUpdate");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["tags"], json!(["DeathLink"]));
}

#[test]
fn test_death_link_toggled_back_during_handshake_sends_nothing() {
    let mut h = Harness::default_config();
    h.engine.connect("host:1234", "Alice", "").unwrap();
    push(&h.peer, &[room_info()]);
    h.engine.poll().unwrap();

    h.engine.set_death_link_enabled(true);
    h.engine.set_death_link_enabled(false);
    push(&h.peer, &[connected(&[])]);
    h.engine.poll().unwrap();

    assert!(records_named(&h.sent(), "ConnectUpdate").is_empty());
}

#[test]
fn test_death_link_disabled_ignores_and_does_not_send() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);
    h.sent();
    h.take_seen();

    h.engine.send_death("fell");
    assert!(h.sent().is_empty());

    push(
        &h.peer,
        &[json!({"cmd": "Bounced", "tags": ["DeathLink"], "data": {"time": 2.0, "source": "Bob", "cause": "x"}})],
    );
    h.engine.poll().unwrap();
    assert!(h.take_seen().is_empty());
}

#[test]
fn test_bounce_without_death_link_tag_is_ignored() {
    let mut h = Harness::new(config().with_death_link(true));
    h.authenticate(&[]);
    h.take_seen();

    push(
        &h.peer,
        &[json!({"cmd": "Bounced", "tags": ["Tracker"], "data": {"source": "Bob"}})],
    );
    h.engine.poll().unwrap();
    assert!(h.take_seen().is_empty());
}

#[test]
fn test_toggle_death_link_sends_connect_update() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);
    h.sent();

    h.engine.set_death_link_enabled(true);
    h.engine.set_death_link_enabled(true);
    assert!(h.engine.death_link_enabled());

    let sent = h.sent();
    assert_eq!(cmds(&sent), vec!["ConnectUpdate"]);
    assert_eq!(sent[0]["tags"], json!(["DeathLink"]));
    assert_eq!(sent[0]["items_handling"], 7);
}

#[test]
fn test_toggle_death_link_offline_only_updates_flag() {
    let mut h = Harness::default_config();
    h.engine.set_death_link_enabled(true);
    assert!(h.engine.death_link_enabled());
    assert!(h.sent().is_empty());

    h.authenticate(&[]);
    let sent = h.sent();
    assert_eq!(records_named(&sent, "Connect")[0]["tags"], json!(["DeathLink"]));
}

// =========================================================================
// Goal, chat, data storage, names
// =========================================================================

#[test]
fn test_goal_sent_once_per_connection() {
    let mut h = Harness::default_config();
    h.engine.send_goal_complete();
    assert!(h.sent().is_empty());

    h.authenticate(&[]);
    let sent = h.sent();
    let status = records_named(&sent, "StatusUpdate");
    assert_eq!(status.len(), 1);
    assert_eq!(status[0]["status"], 30);

    h.engine.send_goal_complete();
    assert!(h.sent().is_empty(), "idempotent within a connection");

    h.peer.drop_connection("gone");
    h.engine.poll().unwrap();
    h.engine.poll().unwrap();
    push(&h.peer, &[room_info(), connected(&[])]);
    h.engine.poll().unwrap();
    assert_eq!(records_named(&h.sent(), "StatusUpdate").len(), 1);
}

#[test]
fn test_chat_text_joins_parts() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);
    h.take_seen();

    push(
        &h.peer,
        &[json!({
            "cmd": "PrintJSON",
            "type": "Chat",
            "data": [{"text": "Bob: "}, {"type": "color", "color": "red", "text": "hello"}]
        })],
    );
    h.engine.poll().unwrap();

    assert_eq!(h.take_seen(), vec![Seen::Chat("Bob: hello".into())]);
}

#[test]
fn test_say_and_fetch_require_auth() {
    let mut h = Harness::default_config();
    assert!(matches!(h.engine.say("hi"), Err(ClientError::NotAuthenticated)));
    assert!(matches!(
        h.engine.fetch(["key"]),
        Err(ClientError::NotAuthenticated)
    ));

    h.authenticate(&[]);
    h.sent();
    h.engine.say("hi").unwrap();
    let sent = h.sent();
    assert_eq!(sent[0], json!({"cmd": "Say", "text": "hi"}));
}

#[test]
fn test_fetch_resolves_by_request_id() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);
    h.sent();
    h.take_seen();

    let id = h.engine.fetch(["goal_count"]).unwrap();
    let sent = h.sent();
    assert_eq!(sent[0]["cmd"], "Get");
    assert_eq!(sent[0]["keys"], json!(["goal_count"]));
    assert_eq!(sent[0]["request_id"], id);

    let reply = json!({"cmd": "Retrieved", "keys": {"goal_count": 4}, "request_id": id});
    push(&h.peer, &[reply.clone()]);
    h.engine.poll().unwrap();
    push(&h.peer, &[reply]);
    h.engine.poll().unwrap();

    match h.take_seen().as_slice() {
        [Seen::Data(response)] => {
            assert_eq!(response.request_id, id);
            assert_eq!(response.keys["goal_count"], 4);
        }
        other => panic!("expected one Data event, got {other:?}"),
    }
}

#[test]
fn test_pending_fetch_dropped_on_disconnect() {
    let mut h = Harness::default_config();
    h.authenticate(&[]);
    let id = h.engine.fetch(["k"]).unwrap();

    h.peer.drop_connection("gone");
    h.engine.poll().unwrap();
    h.engine.poll().unwrap();
    push(
        &h.peer,
        &[room_info(), connected(&[]), json!({"cmd": "Retrieved", "keys": {}, "request_id": id})],
    );
    h.engine.poll().unwrap();

    assert!(h.take_seen().iter().all(|s| !matches!(s, Seen::Data(_))));
}

#[test]
fn test_data_package_supplies_item_names() {
    let mut h = Harness::default_config();
    h.engine.connect("host:1234", "Alice", "").unwrap();
    push(
        &h.peer,
        &[
            json!({"cmd": "RoomInfo", "datapackage_checksums": {"Test Game": "abc"}}),
            json!({"cmd": "DataPackage", "data": {"games": {"Test Game": {
                "item_name_to_id": {"Sword": 100},
                "location_name_to_id": {},
                "checksum": "abc"
            }}}}),
            connected(&[]),
        ],
    );
    h.engine.poll().unwrap();
    assert_eq!(
        cmds(&h.sent()),
        vec!["GetDataPackage", "Connect", "Sync"]
    );

    push(&h.peer, &[items(0, &[100])]);
    h.engine.poll().unwrap();
    assert_eq!(h.items_seen()[0].item_name, "Sword");

    // Same checksum after a reconnect: no new request.
    h.peer.drop_connection("gone");
    h.engine.poll().unwrap();
    h.engine.poll().unwrap();
    push(
        &h.peer,
        &[json!({"cmd": "RoomInfo", "datapackage_checksums": {"Test Game": "abc"}})],
    );
    h.engine.poll().unwrap();
    assert_eq!(cmds(&h.sent()), vec!["Connect"]);
}

// =========================================================================
// Snapshots and config
// =========================================================================

#[test]
fn test_restored_snapshot_skips_items_and_resends_checks() {
    let mut h = Harness::default_config();
    h.engine.restore_sync(&SyncSnapshot {
        next_item_index: 2,
        checked_locations: vec![loc(9)],
    });
    assert!(h.engine.is_location_checked(loc(9)));

    h.authenticate(&[]);
    let sent = h.sent();
    assert_eq!(records_named(&sent, "LocationChecks")[0]["locations"], json!([9]));

    push(&h.peer, &[items(0, &[1, 2, 3])]);
    h.engine.poll().unwrap();
    let received = h.items_seen();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].index, 2);
}

#[test]
fn test_builder_rejects_invalid_config() {
    let (transport, _peer) = MemoryTransport::pair();
    let result = ProtocolEngine::builder(transport)
        .config(ClientConfig::new(""))
        .build();
    assert!(matches!(result, Err(ClientError::InvalidConfig(_))));
}
