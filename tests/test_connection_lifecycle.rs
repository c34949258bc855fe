//! Connection lifecycle: state transitions, idempotent connect, the
//! reconnect/backoff policy, exhaustion, and disconnect ordering.

mod common;

use common::{dead_url, unique_bus, wait_for_state, MockServer};
use pulse_link::{ClientOptions, ConnectionState, PulseLinkClient};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;

fn fast_options(bus_prefix: &str) -> ClientOptions {
    ClientOptions::new()
        .with_reconnect_delay_ms(50)
        .with_max_reconnect_attempts(3)
        .with_connection_timeout_ms(2000)
        .with_cross_tab_bus(unique_bus(bus_prefix))
}

fn client_for(url: &str, options: ClientOptions) -> PulseLinkClient {
    PulseLinkClient::builder()
        .url(url)
        .options(options)
        .build()
        .unwrap()
}

/// Record every state transition into a shared vector.
fn record_states(client: &PulseLinkClient) -> (Arc<Mutex<Vec<ConnectionState>>>, pulse_link::StateListenerGuard) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let guard = client.on_state_change(move |state| sink.lock().unwrap().push(state));
    (states, guard)
}

#[tokio::test]
async fn test_connect_reaches_connected() {
    let server = MockServer::start().await;
    let client = client_for(&server.url(), fast_options("lc_connect"));

    client.connect().await;

    assert!(wait_for_state(&client, ConnectionState::Connected, Duration::from_secs(2)).await);
    assert_eq!(server.connection_count(), 1);
    client.close().await;
}

#[tokio::test]
async fn test_repeated_connect_never_opens_a_second_socket() {
    let server = MockServer::start().await;
    let client = client_for(&server.url(), fast_options("lc_idempotent"));

    client.connect().await;
    client.connect().await;
    client.connect().await;

    assert!(wait_for_state(&client, ConnectionState::Connected, Duration::from_secs(2)).await);
    client.connect().await;
    sleep(Duration::from_millis(200)).await;

    assert_eq!(server.connection_count(), 1);
    client.close().await;
}

#[tokio::test]
async fn test_observers_see_transitions_in_order() {
    let server = MockServer::start().await;
    let client = client_for(&server.url(), fast_options("lc_observer"));
    let (states, _guard) = record_states(&client);

    client.connect().await;
    assert!(wait_for_state(&client, ConnectionState::Connected, Duration::from_secs(2)).await);
    client.disconnect().await;

    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ]
    );
    client.close().await;
}

#[tokio::test]
async fn test_closed_observer_guard_stops_notifications() {
    let server = MockServer::start().await;
    let client = client_for(&server.url(), fast_options("lc_guard"));
    let (states, guard) = record_states(&client);

    client.connect().await;
    assert!(wait_for_state(&client, ConnectionState::Connected, Duration::from_secs(2)).await);
    guard.close();
    client.disconnect().await;

    assert_eq!(states.lock().unwrap().last(), Some(&ConnectionState::Connected));
    client.close().await;
}

#[tokio::test]
async fn test_server_close_triggers_reconnect() {
    let server = MockServer::start().await;
    let client = client_for(&server.url(), fast_options("lc_reconnect"));

    client.connect().await;
    assert!(wait_for_state(&client, ConnectionState::Connected, Duration::from_secs(2)).await);

    server.kill_connections();

    // The client schedules a 50ms reconnect and opens a second socket
    let end = tokio::time::Instant::now() + Duration::from_secs(2);
    while server.connection_count() < 2 && tokio::time::Instant::now() < end {
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.connection_count(), 2);
    assert!(wait_for_state(&client, ConnectionState::Connected, Duration::from_secs(2)).await);
    client.close().await;
}

#[tokio::test]
async fn test_exhaustion_is_terminal() {
    let client = client_for(&dead_url(), fast_options("lc_exhaust"));
    let (states, _guard) = record_states(&client);

    client.connect().await;

    assert!(wait_for_state(&client, ConnectionState::Disconnected, Duration::from_secs(3)).await);
    let attempts_seen = states
        .lock()
        .unwrap()
        .iter()
        .filter(|s| **s == ConnectionState::Connecting)
        .count();

    // No further timers fire after the terminal transition
    sleep(Duration::from_millis(400)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    let attempts_after = states
        .lock()
        .unwrap()
        .iter()
        .filter(|s| **s == ConnectionState::Connecting)
        .count();
    assert_eq!(attempts_seen, attempts_after);
    // Initial attempt plus max_reconnect_attempts retries
    assert_eq!(attempts_seen, 4);
    client.close().await;
}

#[tokio::test]
async fn test_disconnect_during_backoff_cancels_the_timer() {
    let server = MockServer::start().await;
    let options = ClientOptions::new()
        .with_reconnect_delay_ms(500)
        .with_max_reconnect_attempts(5)
        .with_cross_tab_bus(unique_bus("lc_cancel"));
    let client = client_for(&server.url(), options);

    client.connect().await;
    assert!(wait_for_state(&client, ConnectionState::Connected, Duration::from_secs(2)).await);
    assert_eq!(server.connection_count(), 1);

    server.kill_connections();
    assert!(wait_for_state(&client, ConnectionState::Reconnecting, Duration::from_secs(2)).await);

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // Well past the 500ms the cancelled timer would have fired at
    sleep(Duration::from_millis(800)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(server.connection_count(), 1);
    client.close().await;
}

#[tokio::test]
async fn test_backoff_gaps_double() {
    let options = ClientOptions::new()
        .with_reconnect_delay_ms(100)
        .with_max_reconnect_attempts(2)
        .with_cross_tab_bus(unique_bus("lc_backoff"));
    let client = client_for(&dead_url(), options);

    let attempt_times = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&attempt_times);
    let _guard = client.on_state_change(move |state| {
        if state == ConnectionState::Connecting {
            sink.lock().unwrap().push(Instant::now());
        }
    });

    client.connect().await;
    assert!(wait_for_state(&client, ConnectionState::Disconnected, Duration::from_secs(3)).await);

    let times = attempt_times.lock().unwrap();
    assert_eq!(times.len(), 3, "initial attempt plus two retries");
    let gap1 = times[1] - times[0];
    let gap2 = times[2] - times[1];
    // 100ms then 200ms, measured loosely from below
    assert!(gap1 >= Duration::from_millis(90), "first gap was {:?}", gap1);
    assert!(gap2 >= Duration::from_millis(180), "second gap was {:?}", gap2);
    assert!(gap2 > gap1);
    client.close().await;
}

#[tokio::test]
async fn test_manual_connect_after_exhaustion_runs_one_attempt() {
    let options = ClientOptions::new()
        .with_reconnect_delay_ms(50)
        .with_max_reconnect_attempts(1)
        .with_cross_tab_bus(unique_bus("lc_manual"));
    let client = client_for(&dead_url(), options);
    let (states, _guard) = record_states(&client);

    client.connect().await;
    assert!(wait_for_state(&client, ConnectionState::Disconnected, Duration::from_secs(2)).await);
    let exhausted_len = states.lock().unwrap().len();

    // The attempt budget only re-arms on a successful open, so an explicit
    // connect gets one attempt and fails straight back to disconnected
    client.connect().await;
    assert!(wait_for_state(&client, ConnectionState::Disconnected, Duration::from_secs(2)).await);
    sleep(Duration::from_millis(200)).await;

    let states = states.lock().unwrap();
    let tail: Vec<ConnectionState> = states[exhausted_len..].to_vec();
    assert_eq!(tail, vec![ConnectionState::Connecting, ConnectionState::Disconnected]);
    client.close().await;
}
