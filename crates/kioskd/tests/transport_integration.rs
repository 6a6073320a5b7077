//! Integration tests for the serial transport worker.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::time::Duration;

use kiosk_protocol::{CommandResponse, SerialCommand, ACK_LINE};
use kioskd::serial::{spawn_transport, MemoryLink, TransportError, DEFAULT_RESPONSE_TIMEOUT};

/// Answers queries with `<echo>=ON` and sets with `ACK`.
fn echoing_link() -> MemoryLink {
    MemoryLink::new(|line| {
        if line.contains('=') {
            Some(ACK_LINE.to_string())
        } else {
            Some(format!("{}=ON\r", line.trim_end_matches('?')))
        }
    })
}

#[tokio::test]
async fn test_query_scenario() {
    let link = echoing_link();
    let transport = spawn_transport(link.clone(), DEFAULT_RESPONSE_TIMEOUT);

    let response = transport
        .execute(SerialCommand::query("display.power"))
        .await
        .unwrap();

    assert_eq!(response, CommandResponse::Value("ON".to_string()));
    assert_eq!(link.received(), vec!["opA1display.power?".to_string()]);
    assert_eq!(link.opened(), 1);
}

#[tokio::test]
async fn test_concurrent_commands_never_overlap() {
    let link = echoing_link();
    let transport = spawn_transport(link.clone(), DEFAULT_RESPONSE_TIMEOUT);

    let mut handles = Vec::new();
    for i in 0..24 {
        let transport = transport.clone();
        handles.push(tokio::spawn(async move {
            let command = if i % 3 == 0 {
                SerialCommand::set("display.power", "ON")
            } else {
                SerialCommand::query(format!("sensor{i}.level"))
            };
            transport.execute(command).await
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(link.opened(), 24);
    assert_eq!(link.max_concurrent(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_silent_controller_times_out() {
    let link = MemoryLink::new(|_| None);
    let transport = spawn_transport(link.clone(), DEFAULT_RESPONSE_TIMEOUT);

    let started = tokio::time::Instant::now();
    let err = transport
        .execute(SerialCommand::query("display.power"))
        .await
        .unwrap_err();

    assert_eq!(err, TransportError::Timeout(DEFAULT_RESPONSE_TIMEOUT));
    assert!(started.elapsed() >= DEFAULT_RESPONSE_TIMEOUT);

    // The worker is still serving after a timeout.
    assert_eq!(link.opened(), 1);
    let err = transport
        .execute(SerialCommand::set("display.power", "OFF"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout(_)));
    assert_eq!(link.opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_never_waits_for_reply() {
    let link = MemoryLink::new(|_| None);
    let transport = spawn_transport(link.clone(), DEFAULT_RESPONSE_TIMEOUT);

    let started = tokio::time::Instant::now();
    let response = transport
        .execute(SerialCommand::set("display.power", "OFF").with_selector("*"))
        .await
        .unwrap();

    assert_eq!(response, CommandResponse::NoReply);
    assert!(started.elapsed() < DEFAULT_RESPONSE_TIMEOUT);
}

#[tokio::test]
async fn test_set_requires_literal_ack() {
    let link = MemoryLink::new(|_| Some("opA1display.power=ON\r".to_string()));
    let transport = spawn_transport(link, DEFAULT_RESPONSE_TIMEOUT);

    let err = transport
        .execute(SerialCommand::set("display.power", "ON"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::ProtocolMismatch(_)));
}

#[tokio::test]
async fn test_query_reply_without_value() {
    let link = MemoryLink::new(|line| match line {
        "opA1display.power?" => Some(ACK_LINE.to_string()),
        _ => Some("garbage\r".to_string()),
    });
    let transport = spawn_transport(link, DEFAULT_RESPONSE_TIMEOUT);

    let ack = transport
        .execute(SerialCommand::query("display.power"))
        .await
        .unwrap_err();
    assert!(matches!(ack, TransportError::ProtocolMismatch(_)));

    let garbage = transport
        .execute(SerialCommand::query("display.input"))
        .await
        .unwrap_err();
    assert!(matches!(garbage, TransportError::ProtocolMismatch(_)));
}

#[tokio::test]
async fn test_unavailable_link_is_connection_error() {
    let transport = spawn_transport(MemoryLink::unavailable(), DEFAULT_RESPONSE_TIMEOUT);

    let err = transport
        .execute(SerialCommand::query("display.power"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Connection(_)));
}

#[tokio::test]
async fn test_dropped_caller_does_not_stop_worker() {
    let transport = spawn_transport(echoing_link(), Duration::from_millis(500));

    let pending = transport.clone();
    let abandoned = tokio::spawn(async move {
        pending.execute(SerialCommand::query("display.power")).await
    });
    abandoned.abort();

    let response = transport
        .execute(SerialCommand::query("display.input"))
        .await
        .unwrap();
    assert_eq!(response, CommandResponse::Value("ON".to_string()));
}
