//! End-to-end tests over the loopback transport.
//!
//! These drive the full inbound pipeline (transport -> framer -> codecs ->
//! correlator -> callbacks) and the outbound pipeline (encoders -> framing
//! -> transport) the way an embedding application would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use bytes::Bytes;

use actisense_sdk::protocol::bdtp::BdtpFramer;
use actisense_sdk::protocol::bst::{self, Bst94Frame};
use actisense_sdk::{
    ErrorKind, LoopbackTransport, MessagePayload, SdkEvent, Session,
};

/// Build the wire bytes of a BEM response datagram (Type 1 envelope with
/// checksum, DLE framing).
fn device_response_frame(bst_id: u8, body: &[u8]) -> Vec<u8> {
    BdtpFramer::encode_bst_datagram(&actisense_sdk::BstDatagram {
        id: bst_id,
        length: body.len() as u16,
        body: Bytes::copy_from_slice(body),
    })
    .unwrap()
}

/// Session over a loopback with echo disabled, so injected bytes are the
/// only receive-side traffic. Returns collected events and errors.
#[allow(clippy::type_complexity)]
fn spawn_session() -> (
    Session<LoopbackTransport>,
    Arc<Mutex<Vec<SdkEvent>>>,
    Arc<Mutex<Vec<(ErrorKind, String)>>>,
) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let transport = LoopbackTransport::open_with_defaults();
    transport.set_loopback_enabled(false);

    let events_sink = events.clone();
    let errors_sink = errors.clone();
    let session = Session::new(
        transport,
        Arc::new(move |event| events_sink.lock().unwrap().push(event)),
        Arc::new(move |kind, message| {
            errors_sink.lock().unwrap().push((kind, message.to_string()))
        }),
    );

    (session, events, errors)
}

/// Wait until `predicate` holds or the deadline passes.
async fn wait_for(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within deadline");
}

fn parsed_messages(events: &Mutex<Vec<SdkEvent>>) -> Vec<actisense_sdk::ParsedMessageEvent> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            SdkEvent::ParsedMessage(msg) => Some(msg.clone()),
            SdkEvent::DeviceStatus(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn test_bst93_frame_flows_to_event_callback() {
    let (session, events, errors) = spawn_session();

    // BST-93: priority 6, PGN 0x1F801, source 0x23, broadcast, t=1000ms.
    let body = [
        0x06, 0x01, 0xF8, 0x01, 0xFF, 0x23, 0xE8, 0x03, 0x00, 0x00, 0x03, 0x11, 0x22, 0x33,
    ];
    let frame = device_response_frame(0x93, &body);
    assert_eq!(session.transport().inject(&frame), frame.len());

    wait_for(|| session.frames_received() == 1).await;

    let messages = parsed_messages(&events);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].protocol, "bst");
    assert_eq!(messages[0].message_type, "BST-93 (N2K Gateway-PC)");
    match &messages[0].payload {
        MessagePayload::Bst(bst::BstFrame::Bst93(frame)) => {
            assert_eq!(frame.priority, 6);
            assert_eq!(frame.pgn, 0x1F801);
            assert_eq!(frame.source, 0x23);
            assert_eq!(frame.destination, 0xFF);
            assert_eq!(frame.timestamp_ms, 1000);
            assert_eq!(&frame.data[..], &[0x11, 0x22, 0x33]);
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert!(errors.lock().unwrap().is_empty());

    session.close().await;
}

#[tokio::test]
async fn test_send_bst94_roundtrip_through_loopback() {
    // With echo enabled, a transmitted frame comes straight back and must
    // decode to the same record.
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_sink = events.clone();
    let session = Session::new(
        LoopbackTransport::open_with_defaults(),
        Arc::new(move |event| events_sink.lock().unwrap().push(event)),
        Arc::new(|kind, message| panic!("unexpected error {kind}: {message}")),
    );

    let outbound = Bst94Frame {
        priority: 6,
        pgn: 0x1F801,
        source: 0,
        destination: 0xFF,
        data: Bytes::from_static(&[0x11, 0x22, 0x33]),
    };
    let mut payload = bst::encode_94(&outbound).unwrap();
    payload.push(BdtpFramer::checksum(&payload).wrapping_neg());
    session.send("bst", &payload).await.unwrap();

    wait_for(|| session.frames_received() == 1).await;

    let messages = parsed_messages(&events);
    match &messages[0].payload {
        MessagePayload::Bst(bst::BstFrame::Bst94(frame)) => assert_eq!(frame, &outbound),
        other => panic!("unexpected payload {other:?}"),
    }

    session.close().await;
}

#[tokio::test]
async fn test_get_operating_mode_correlates_response() {
    let (session, _events, errors) = spawn_session();

    let (tx, mut rx) = mpsc::unbounded_channel();
    session
        .get_operating_mode(
            Duration::from_secs(5),
            Box::new(move |response, kind, _msg| {
                tx.send((response, kind)).unwrap();
            }),
        )
        .await;
    assert_eq!(session.pending_requests(), 1);

    // Device reply on A0: bem 0x11, seq 0, model NGT-1, serial 1, no
    // error, mode payload 0x0201 little-endian.
    let body = [
        0x11, 0x00, 0x0E, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02,
    ];
    session
        .transport()
        .inject(&device_response_frame(0xA0, &body));

    let (response, kind) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kind, ErrorKind::Ok);
    let response = response.unwrap();
    assert_eq!(&response.data[..], &[0x01, 0x02]);
    assert_eq!(response.operating_mode().unwrap().0, 0x0201);
    assert_eq!(response.model_name(), "NGT-1");

    assert_eq!(session.pending_requests(), 0);
    assert_eq!(session.bem_responses_received(), 1);
    // Correlated responses never double-deliver as events.
    assert!(errors.lock().unwrap().is_empty());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    session.close().await;
}

#[tokio::test]
async fn test_request_times_out_without_response() {
    let (session, _events, _errors) = spawn_session();

    let completions = Arc::new(AtomicUsize::new(0));
    let completions_in_cb = completions.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();

    session
        .get_operating_mode(
            Duration::from_millis(100),
            Box::new(move |response, kind, _msg| {
                assert!(response.is_none());
                completions_in_cb.fetch_add(1, Ordering::SeqCst);
                tx.send(kind).unwrap();
            }),
        )
        .await;

    // The session's own sweep must fire the completion; no manual nudge.
    let kind = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kind, ErrorKind::Timeout);
    assert_eq!(session.pending_requests(), 0);

    // A late reply is unsolicited, not a second completion.
    let body = [
        0x11, 0x00, 0x0E, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02,
    ];
    session
        .transport()
        .inject(&device_response_frame(0xA0, &body));
    wait_for(|| session.bem_responses_received() == 1).await;
    assert_eq!(completions.load(Ordering::SeqCst), 1);

    session.close().await;
}

#[tokio::test]
async fn test_unsolicited_system_status_surfaces_as_event() {
    let (session, events, errors) = spawn_session();

    // BEM header for id 0xF2 followed by a system status payload with one
    // individual buffer, one unified buffer, CAN status, and mode 512.
    let mut body = vec![
        0xF2, 0x07, 0x0E, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    body.extend_from_slice(&[
        0x01, 10, 20, 30, 40, 50, 60, // individual buffers
        0x01, 11, 22, 33, 44, // unified buffers
        0, 0, 0x00, // CAN status
        0x00, 0x02, // operating mode 512 LE
    ]);
    session
        .transport()
        .inject(&device_response_frame(0xA0, &body));

    wait_for(|| session.bem_responses_received() == 1).await;

    let messages = parsed_messages(&events);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].protocol, "bem");
    assert_eq!(messages[0].message_type, "BEM_Response_F2");
    match &messages[0].payload {
        MessagePayload::Bem(response) => {
            assert_eq!(response.bem_id, 0xF2);
            assert_eq!(response.error_code, 0);
        }
        other => panic!("unexpected payload {other:?}"),
    }

    // The embedded operating mode also surfaces as a device status pair.
    wait_for(|| {
        events.lock().unwrap().iter().any(|e| {
            matches!(e, SdkEvent::DeviceStatus(s)
                if s.key == "operating_mode" && s.value.contains("512"))
        })
    })
    .await;

    assert!(errors.lock().unwrap().is_empty());
    session.close().await;
}

#[tokio::test]
async fn test_device_error_code_reaches_completion() {
    let (session, _events, _errors) = spawn_session();

    let (tx, mut rx) = mpsc::unbounded_channel();
    session
        .get_operating_mode(
            Duration::from_secs(5),
            Box::new(move |response, kind, msg| {
                tx.send((response.is_some(), kind, msg.to_string())).unwrap();
            }),
        )
        .await;

    // Error code 5 in the response header.
    let body = [
        0x11, 0x00, 0x0E, 0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00,
    ];
    session
        .transport()
        .inject(&device_response_frame(0xA0, &body));

    let (has_response, kind, msg) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(has_response);
    assert_eq!(kind, ErrorKind::UnsupportedOperation);
    assert!(msg.contains('5'));

    session.close().await;
}

#[tokio::test]
async fn test_aborted_frame_recovery_through_session() {
    let (session, events, errors) = spawn_session();

    // A frame cut off by a new DLE STX, followed by a complete BST-93.
    let body = [
        0x06, 0x01, 0xF8, 0x01, 0xFF, 0x23, 0xE8, 0x03, 0x00, 0x00, 0x00,
    ];
    let mut stream = vec![0x10, 0x02, 0xAA, 0xBB];
    stream.extend_from_slice(&device_response_frame(0x93, &body));
    session.transport().inject(&stream);

    wait_for(|| session.frames_received() == 1).await;

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorKind::MalformedFrame);
    assert!(errors[0].1.contains("aborted"));

    assert_eq!(parsed_messages(&events).len(), 1);
    session.close().await;
}

#[tokio::test]
async fn test_corrupt_frame_reports_error_and_stream_continues() {
    let (session, _events, errors) = spawn_session();

    // Valid framing, bad checksum.
    let mut bad = device_response_frame(0x93, &[0x06, 0x01, 0xF8, 0x01, 0xFF, 0x23, 0xE8, 0x03, 0x00, 0x00, 0x00]);
    let last = bad.len() - 3; // checksum byte sits before DLE ETX
    bad[last] = bad[last].wrapping_add(1);
    session.transport().inject(&bad);

    wait_for(|| !errors.lock().unwrap().is_empty()).await;
    assert_eq!(errors.lock().unwrap()[0].0, ErrorKind::MalformedFrame);

    // The parser recovered; a good frame still decodes.
    let good = device_response_frame(
        0x93,
        &[0x06, 0x01, 0xF8, 0x01, 0xFF, 0x23, 0xE8, 0x03, 0x00, 0x00, 0x00],
    );
    session.transport().inject(&good);
    wait_for(|| session.frames_received() == 1).await;

    session.close().await;
}

#[tokio::test]
async fn test_chunked_delivery_reassembles_frames() {
    let (session, _events, errors) = spawn_session();

    let frame = device_response_frame(
        0x93,
        &[0x06, 0x01, 0xF8, 0x01, 0xFF, 0x23, 0xE8, 0x03, 0x00, 0x00, 0x02, 0xAA, 0xBB],
    );

    // Deliver the frame one byte per transport chunk, yielding so the
    // receive task drains the queue between injections.
    for &byte in &frame {
        while session.transport().inject(&[byte]) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::task::yield_now().await;
    }

    wait_for(|| session.frames_received() == 1).await;
    assert!(errors.lock().unwrap().is_empty());
    session.close().await;
}

#[tokio::test]
async fn test_connected_status_events_bracket_the_session() {
    let (session, events, _errors) = spawn_session();

    wait_for(|| {
        events.lock().unwrap().iter().any(|e| {
            matches!(e, SdkEvent::DeviceStatus(s) if s.key == "connected" && s.value == "true")
        })
    })
    .await;

    session.close().await;

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| {
        matches!(e, SdkEvent::DeviceStatus(s) if s.key == "connected" && s.value == "false")
    }));
}
