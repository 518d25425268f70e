//! Codec behaviour over a byte stream

use bytes::BytesMut;
use proptest::prelude::*;
use ziapi_protocol::*;

fn demod_event(n: usize) -> ServerMessage {
    let samples = (0..n)
        .map(|i| DemodSample {
            timestamp: Timestamp(i as u64 * 100),
            x: i as f64,
            y: -(i as f64),
            frequency: 1e5,
            phase: 0.0,
            dio_bits: 0,
            trigger: 0,
            aux_in: [0.0; 2],
        })
        .collect();
    ServerMessage::Event {
        event: Event::new(
            NodePath::new("/dev1234/demods/0/sample").unwrap(),
            Payload::DemodSample(samples),
        ),
        solicited: false,
    }
}

#[test]
fn test_byte_by_byte_delivery() {
    let codec = FrameCodec::default();
    let mut wire = BytesMut::new();
    codec.encode(&demod_event(16), &mut wire).unwrap();
    codec
        .encode(
            &ServerMessage::Reply {
                id: 3,
                body: Reply::Effective(Value::Double(1.5)),
            },
            &mut wire,
        )
        .unwrap();

    let mut rx = BytesMut::new();
    let mut decoded = Vec::new();
    for byte in wire.iter() {
        rx.extend_from_slice(&[*byte]);
        while let Some(msg) = codec.decode::<ServerMessage>(&mut rx).unwrap() {
            decoded.push(msg);
        }
    }

    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0], demod_event(16));
    match &decoded[1] {
        ServerMessage::Reply { id, body } => {
            assert_eq!(*id, 3);
            assert_eq!(body, &Reply::Effective(Value::Double(1.5)));
        },
        other => panic!("unexpected message: {:?}", other),
    }
}

#[test]
fn test_event_kind_survives_wire() {
    let codec = FrameCodec::default();
    let mut wire = BytesMut::new();
    codec.encode(&demod_event(3), &mut wire).unwrap();
    match codec.decode::<ServerMessage>(&mut wire).unwrap() {
        Some(ServerMessage::Event { event, solicited }) => {
            assert!(!solicited);
            assert_eq!(event.kind(), EventKind::DemodSample);
            assert_eq!(event.count(), 3);
        },
        other => panic!("unexpected message: {:?}", other),
    }
}

proptest! {
    /// Arbitrary garbage never panics the decoder.
    #[test]
    fn prop_decode_garbage_does_not_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let codec = FrameCodec::with_max_frame(1024);
        let mut buf = BytesMut::from(&bytes[..]);
        let _ = codec.decode::<ServerMessage>(&mut buf);
    }
}
