#![no_main]
use libfuzzer_sys::fuzz_target;

use lifx_core::Message;
use lifx_core::RawMessage;

fuzz_target!(|data: &[u8]| {
    // anything may arrive on the wire; decoding must never panic
    let raw = match RawMessage::unpack(data) {
        Ok(raw) => raw,
        Err(_) => return,
    };

    // the header survives a round trip untouched
    let repacked = raw.pack().unwrap();
    assert_eq!(&repacked[..], &data[..raw.frame.size as usize]);

    let msg = match Message::from_raw(&raw) {
        Ok(msg) => msg,
        Err(_) => return,
    };

    // once normalized (label padding, trailing bytes), a payload re-encodes to itself
    let payload = msg.pack_payload().unwrap();
    let normalized = RawMessage {
        payload: payload.clone(),
        ..raw
    };
    let reparsed = Message::from_raw(&normalized).unwrap();
    assert_eq!(reparsed.pack_payload().unwrap(), payload);
});
