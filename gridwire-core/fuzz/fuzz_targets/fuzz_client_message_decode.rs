#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use gridwire_core::protocol::messages::{authentication, cluster_view, distributed_object, error};
use gridwire_core::protocol::{ClientMessageCodec, FragmentAssembler};

fuzz_target!(|data: &[u8]| {
    let mut codec = ClientMessageCodec::with_max_frame_length(1 << 20);
    let mut assembler = FragmentAssembler::new();
    let mut buf = BytesMut::from(data);

    while let Ok(Some(wire)) = codec.decode(&mut buf) {
        let message = match assembler.accept(wire) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(_) => break,
        };

        let _ = message.message_type();
        let _ = message.correlation_id();
        let _ = message.partition_id();
        let _ = authentication::decode_response(&message);
        let _ = authentication::decode_request(&message);
        let _ = cluster_view::decode_event(&message);
        let _ = distributed_object::decode_event(&message);
        let _ = error::decode_error_holders(&message);
    }
});
