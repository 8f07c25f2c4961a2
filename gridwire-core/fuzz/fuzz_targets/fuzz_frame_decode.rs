#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

use gridwire_core::protocol::Frame;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    while let Ok(Some(frame)) = Frame::read_from(&mut buf) {
        let _ = frame.is_begin_frame();
        let _ = frame.is_end_frame();
        let _ = frame.is_null_frame();
        let _ = frame.is_final_frame();
        let _ = frame.is_unfragmented();
        assert!(frame.wire_size() >= 6);
    }
});
