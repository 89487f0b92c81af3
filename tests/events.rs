use std::time::Duration;

use halolog::event::words;
use halolog::{EventDecoder, SeizureRange, Timestamp};

use pretty_assertions::assert_eq;
use rstest::rstest;

use shared::setup_tracing;

const TYPE_OPEN: u32 = 0b10;
const TYPE_CLOSE: u32 = 0b01;
const BASE: Timestamp = 1_700_000_000_000;

/// Mirrors the packing the detection hardware does.
fn pack(ticks: u32, channel: u32, event_type: u32) -> u32 {
    ((ticks & ((1 << 25) - 1)) << 7) | ((channel & 0x1f) << 2) | (event_type & 0b11)
}

fn decode_all(stream: &[u32]) -> Vec<SeizureRange> {
    let mut decoder = EventDecoder::new(BASE, "hour_14_detections.bin");
    let mut out = Vec::new();
    decoder.decode(stream.iter().copied(), &mut out);
    out
}

#[test]
fn open_close_pair_becomes_one_range() {
    setup_tracing();

    let ranges = decode_all(&[pack(10, 3, TYPE_OPEN), pack(40, 3, TYPE_CLOSE)]);

    assert_eq!(ranges.len(), 1);
    let range = &ranges[0];
    assert_eq!(range.channel, 2); // channel ids on the wire are 1 based
    assert_eq!(range.start, BASE + 10);
    assert_eq!(range.end, BASE + 40);
    assert_eq!(range.duration(), Duration::from_millis(30));
    assert_eq!(range.duration().as_secs_f64(), 0.030);
}

#[rstest]
#[case::orphan_close(&[pack(10, 5, TYPE_CLOSE)])]
#[case::dangling_open(&[pack(10, 5, TYPE_OPEN)])]
#[case::channel_zero_is_noise(&[pack(10, 0, TYPE_OPEN), pack(40, 0, TYPE_CLOSE)])]
#[case::undefined_type_bits(&[pack(10, 5, 0b00), pack(40, 5, 0b11)])]
#[case::close_on_other_channel(&[pack(10, 5, TYPE_OPEN), pack(40, 6, TYPE_CLOSE)])]
fn tolerated_losses_yield_no_ranges(#[case] stream: &[u32]) {
    setup_tracing();
    assert_eq!(decode_all(stream), Vec::new());
}

#[test]
fn second_open_replaces_the_first() {
    setup_tracing();

    let ranges = decode_all(&[
        pack(10, 1, TYPE_OPEN),
        pack(20, 1, TYPE_OPEN),
        pack(30, 1, TYPE_CLOSE),
    ]);

    // last open wins, the first open is dropped
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].start, BASE + 20);
    assert_eq!(ranges[0].end, BASE + 30);
}

#[test]
fn close_consumes_the_open_state() {
    setup_tracing();

    let ranges = decode_all(&[
        pack(10, 4, TYPE_OPEN),
        pack(20, 4, TYPE_CLOSE),
        pack(30, 4, TYPE_CLOSE), // now an orphan again
    ]);
    assert_eq!(ranges.len(), 1);
}

#[test]
fn noise_words_leave_decoder_state_alone() {
    setup_tracing();

    let mut decoder = EventDecoder::new(BASE, "noise.bin");
    assert!(decoder.push(pack(10, 7, TYPE_OPEN)).is_none());
    assert_eq!(decoder.open_channels(), 1);

    // channel 0 words of any type must not touch channel state
    assert!(decoder.push(pack(20, 0, TYPE_CLOSE)).is_none());
    assert!(decoder.push(pack(20, 0, TYPE_OPEN)).is_none());
    assert_eq!(decoder.open_channels(), 1);

    let range = decoder.push(pack(50, 7, TYPE_CLOSE)).unwrap();
    assert_eq!(range.start, BASE + 10);
    assert_eq!(decoder.open_channels(), 0);
}

#[test]
fn ticks_are_masked_to_25_bits() {
    setup_tracing();

    const MAX_TICK: u32 = (1 << 25) - 1;
    let ranges = decode_all(&[pack(0, 2, TYPE_OPEN), pack(MAX_TICK, 2, TYPE_CLOSE)]);
    assert_eq!(ranges[0].end, BASE + u64::from(MAX_TICK));
}

#[test]
fn wrapped_tick_clamps_duration_to_zero() {
    setup_tracing();

    // the 25 bit counter wrapped between open and close
    let ranges = decode_all(&[pack((1 << 25) - 100, 2, TYPE_OPEN), pack(5, 2, TYPE_CLOSE)]);
    assert_eq!(ranges.len(), 1);
    assert!(ranges[0].end < ranges[0].start);
    assert_eq!(ranges[0].duration(), Duration::ZERO);
}

#[test]
fn state_carries_across_chunked_streams() {
    setup_tracing();

    let mut decoder = EventDecoder::new(BASE, "chunked.bin");
    let mut out = Vec::new();
    decoder.decode([pack(10, 9, TYPE_OPEN)], &mut out);
    assert!(out.is_empty());
    decoder.decode([pack(60, 9, TYPE_CLOSE)], &mut out);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].start, BASE + 10);
}

#[test]
fn word_splitting_drops_a_trailing_partial_word() {
    setup_tracing();

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&pack(10, 3, TYPE_OPEN).to_le_bytes());
    bytes.extend_from_slice(&pack(40, 3, TYPE_CLOSE).to_le_bytes());
    bytes.extend_from_slice(&[0xde, 0xad]); // torn tail

    let stream: Vec<u32> = words(&bytes).collect();
    assert_eq!(stream.len(), 2);
    assert_eq!(stream[0], pack(10, 3, TYPE_OPEN));
}

#[test]
fn ranges_serialize_for_the_display_layer() {
    setup_tracing();

    let ranges = decode_all(&[pack(10, 3, TYPE_OPEN), pack(40, 3, TYPE_CLOSE)]);
    let encoded = ron::to_string(&ranges[0]).unwrap();
    assert!(encoded.contains("channel:2"));
}
