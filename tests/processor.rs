//! Message processor envelopes as seen from outside the crate

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use leafnet::core::merge_bytes;
use leafnet::core::serialization::SerializationFormat;
use leafnet::core::ByteOrder;
use leafnet::protocol::{Decoded, Dispatcher, MsgProcessor, Payload, Processor};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Chat {
    room: u32,
    text: String,
}

#[test]
fn test_ping_envelope_restores_message() {
    let mut processor = MsgProcessor::new();
    processor.register::<Ping>(5).unwrap();

    let parts = processor.marshal(&Ping {}).unwrap();
    assert_eq!(&parts[0][..], &[0x00, 0x05]);
    let expected_payload = SerializationFormat::Bincode.serialize(&Ping {}).unwrap();
    assert_eq!(&parts[1][..], &expected_payload[..]);

    let decoded = processor.unmarshal(merge_bytes(&parts)).unwrap();
    assert_eq!(decoded.id(), 5);
    assert_eq!(decoded.downcast_ref::<Ping>(), Some(&Ping {}));
}

#[test]
fn test_router_delivers_to_dispatcher() {
    let received: Arc<Mutex<Vec<(u32, String)>>> = Arc::default();
    let dispatcher = Arc::new(Dispatcher::new());
    let sink = received.clone();
    dispatcher.register(std::any::type_name::<Chat>(), move |args: Vec<Payload>| {
        let chat = args[0].downcast_ref::<Chat>().expect("chat payload");
        let session = args[1].downcast_ref::<String>().expect("session context");
        sink.lock().unwrap().push((chat.room, format!("{session}:{}", chat.text)));
        Ok(())
    })
    .unwrap();

    let mut processor = MsgProcessor::new().with_format(SerializationFormat::MessagePack);
    processor.register::<Chat>(1).unwrap();
    processor.set_router::<Chat>(dispatcher).unwrap();

    let chat = Chat {
        room: 7,
        text: "hello".into(),
    };
    let decoded = processor
        .unmarshal(merge_bytes(&processor.marshal(&chat).unwrap()))
        .unwrap();
    processor
        .route(decoded, Arc::new(String::from("player-1")))
        .unwrap();

    assert_eq!(*received.lock().unwrap(), vec![(7, "player-1:hello".to_string())]);
}

#[test]
fn test_raw_registration_keeps_bytes() {
    let mut processor = MsgProcessor::new().with_byte_order(ByteOrder::Little);
    processor.register::<Chat>(0x0102).unwrap();
    processor
        .set_raw_handler(0x0102, |_id, _data, _ctx| {})
        .unwrap();

    let decoded = processor
        .unmarshal(Bytes::from_static(&[0x02, 0x01, 0xde, 0xad]))
        .unwrap();
    match decoded {
        Decoded::Raw { id, data } => {
            assert_eq!(id, 0x0102);
            assert_eq!(&data[..], &[0xde, 0xad]);
        }
        other => panic!("expected raw message, got {other:?}"),
    }
}

fn format() -> impl Strategy<Value = SerializationFormat> {
    prop_oneof![
        Just(SerializationFormat::Bincode),
        Just(SerializationFormat::Json),
        Just(SerializationFormat::MessagePack),
    ]
}

// Property: any registered message survives marshal + unmarshal under every
// format, byte order and ID
proptest! {
    #[test]
    fn prop_envelope_preserves_message(
        fmt in format(),
        little in any::<bool>(),
        id in any::<u16>(),
        room in any::<u32>(),
        text in ".{0,64}",
    ) {
        let mut processor = MsgProcessor::new()
            .with_format(fmt)
            .with_byte_order(ByteOrder::from_little_endian(little));
        processor.register::<Chat>(id).unwrap();

        let chat = Chat { room, text };
        let parts = processor.marshal(&chat).unwrap();
        prop_assert_eq!(processor.byte_order().read_u16([parts[0][0], parts[0][1]]), id);

        let decoded = processor.unmarshal(merge_bytes(&parts)).unwrap();
        prop_assert_eq!(decoded.id(), id);
        prop_assert_eq!(decoded.downcast_ref::<Chat>(), Some(&chat));
    }
}
