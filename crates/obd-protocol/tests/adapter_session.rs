//! End-to-end sessions against the simulated adapter.

use obd_protocol::mock::{MockReply, MockTransport};
use obd_protocol::{
    AdapterConfig, AdapterConnection, ConnectionState, ObdError, SensorRegistry, Value,
};

fn connect(mock: MockTransport) -> AdapterConnection<MockTransport> {
    AdapterConnection::new(mock, "/dev/ttyUSB0", AdapterConfig::default())
}

#[tokio::test(start_paused = true)]
async fn echoing_adapter_is_silenced_by_handshake() {
    // Echo stays on until ATE0 is processed, so the ATZ and ATE0 replies carry it.
    let mut conn = connect(MockTransport::elm327().with_echo(true));
    conn.initialize().await.unwrap();

    assert_eq!(conn.version(), Some("ELM327 v1.5"));
    assert_eq!(conn.state(), ConnectionState::Connected);

    let registry = SensorRegistry::standard();
    let speed = conn.query_key(registry, "speed").await.unwrap();
    assert_eq!(speed.unit, "MPH");
    assert!((speed.value.as_f64().unwrap() - 50.0 / 1.609).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn dashboard_sensors_decode() {
    let mut conn = connect(MockTransport::elm327());
    conn.initialize().await.unwrap();
    let registry = SensorRegistry::standard();

    let temp = conn.query_key(registry, "temp").await.unwrap();
    assert!((temp.value.as_f64().unwrap() - 32.0).abs() < 1e-9);

    let trim = conn
        .query_key(registry, "short_term_fuel_trim_1")
        .await
        .unwrap();
    assert!((trim.value.as_f64().unwrap() - 12.5).abs() < 1e-9);

    let throttle = conn.query_key(registry, "throttle_pos").await.unwrap();
    assert!((throttle.value.as_f64().unwrap() - 20.0).abs() < 1e-9);

    let pids = conn.query_key(registry, "pids").await.unwrap();
    assert_eq!(
        pids.value,
        Value::Bits("10111110001111101011100000010001".to_string())
    );

    match conn.query_key(registry, "dtc_status").await.unwrap().value {
        Value::DtcStatus(status) => {
            assert!(status.mil_on);
            assert_eq!(status.dtc_count, 3);
        }
        other => panic!("unexpected value {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn reset_timeout_stops_handshake() {
    let mock = MockTransport::elm327().with_reply("ATZ", MockReply::Silent);
    let mut conn = connect(mock);

    assert!(matches!(
        conn.initialize().await,
        Err(ObdError::ConnectionFailed(_))
    ));
    assert_eq!(conn.state(), ConnectionState::Failed);

    let registry = SensorRegistry::standard();
    assert!(conn.query_key(registry, "rpm").await.is_err());
    assert_eq!(conn.transport().commands(), ["ATZ"]);

    conn.close().await;
    conn.close().await;
    assert!(conn.transport().is_closed());
}

#[tokio::test(start_paused = true)]
async fn echo_off_without_reply_fails() {
    let mock = MockTransport::elm327().with_reply("ATE0", MockReply::Silent);
    let mut conn = connect(mock);

    assert!(conn.initialize().await.is_err());
    assert_eq!(conn.state(), ConnectionState::Failed);
    assert_eq!(conn.transport().commands(), ["ATZ", "ATE0"]);
    assert!(conn.version().is_some());
}

#[tokio::test(start_paused = true)]
async fn garbage_payload_is_reported_not_fatal() {
    let mock = MockTransport::elm327().with_reply("010C1", MockReply::Text("41 0C ZZ".into()));
    let mut conn = connect(mock);
    conn.initialize().await.unwrap();
    let registry = SensorRegistry::standard();

    assert!(matches!(
        conn.query_key(registry, "rpm").await,
        Err(ObdError::InvalidHex(_))
    ));
    assert!(conn.is_connected());
    assert!(conn.query_key(registry, "speed").await.is_ok());
}
