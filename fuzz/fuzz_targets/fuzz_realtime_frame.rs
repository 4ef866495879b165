#![no_main]

use dead_card_lobby::realtime::{ChangesPayload, RealtimeMessage, ReplyPayload};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = serde_json::from_slice::<RealtimeMessage>(data) else {
        return;
    };

    // Payload decoding is what the connection loop does next.
    let _ = serde_json::from_value::<ReplyPayload>(frame.payload.clone());
    let _ = serde_json::from_value::<ChangesPayload>(frame.payload);
});
