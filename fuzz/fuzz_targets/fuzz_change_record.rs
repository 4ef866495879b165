#![no_main]

use dead_card_lobby::protocol::{ChangeEvent, ChangeFilter, Player, Room, RoomId};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(event) = serde_json::from_slice::<ChangeEvent>(data) else {
        return;
    };

    let room = RoomId::from_u128(0x5eed);
    let _ = ChangeFilter::players_of(room).matches(&event);
    let _ = ChangeFilter::room(room).matches(&event);
    let _ = event.decode_record::<Room>();
    let _ = event.decode_record::<Player>();
});
