// tests/property/framing_test.rs

//! Framing properties: chunked decoding equals whole-frame decoding,
//! and encode/decode round-trips for any payload under the sanity
//! bound.

use bytes::BytesMut;
use opaldb_client::core::protocol::{QueryFrame, QueryFrameCodec};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

fn xorshift(mut x: u64) -> u64 {
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn chunked_decoding_matches_whole_frames(
        frames in prop::collection::vec(
            (any::<u64>(), prop::collection::vec(any::<u8>(), 0..300)),
            1..20,
        ),
        seed in any::<u64>(),
    ) {
        // Encode the frames into one contiguous byte stream.
        let mut encoder = QueryFrameCodec::new();
        let mut wire = BytesMut::new();
        for (token, payload) in &frames {
            encoder
                .encode(QueryFrame::new(*token, payload.clone()), &mut wire)
                .unwrap();
        }

        // Feed the stream in pseudo-random chunk sizes derived from
        // the seed, draining completed frames after every chunk.
        let mut decoder = QueryFrameCodec::new();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        let mut rng = seed | 1;
        let mut offset = 0;
        while offset < wire.len() {
            rng = xorshift(rng);
            let step = 1 + (rng as usize % 17);
            let end = (offset + step).min(wire.len());
            buf.extend_from_slice(&wire[offset..end]);
            offset = end;
            while let Some(frame) = decoder.decode(&mut buf).unwrap() {
                decoded.push(frame);
            }
        }

        prop_assert_eq!(decoded.len(), frames.len());
        for (frame, (token, payload)) in decoded.iter().zip(frames.iter()) {
            prop_assert_eq!(frame.token, *token);
            prop_assert_eq!(frame.payload.as_ref(), &payload[..]);
        }
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn roundtrip_single_frame(
        token in any::<u64>(),
        payload in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let mut buf = BytesMut::new();
        QueryFrameCodec::new()
            .encode(QueryFrame::new(token, payload.clone()), &mut buf)
            .unwrap();

        let frame = QueryFrameCodec::new().decode(&mut buf).unwrap().unwrap();
        prop_assert_eq!(frame.token, token);
        prop_assert_eq!(frame.payload.as_ref(), &payload[..]);
        prop_assert!(buf.is_empty());
    }
}
