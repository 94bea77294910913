//! Block decoding over a live in-memory stream with arbitrary fragmentation.

use daq_driver_rigol::{
    BlockDecoder, FrameError, HeaderFault, Transport, WaveformPreamble, END_MARKER,
};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};

const PAYLOAD: [u8; 5] = [0x01, 0x02, 0x03, 0x04, 0x05];

/// Write `fragments` one at a time with a yield in between so the reader sees
/// them as separate receives.
async fn feed(mut writer: DuplexStream, fragments: Vec<Vec<u8>>, close: bool) -> DuplexStream {
    for fragment in fragments {
        writer.write_all(&fragment).await.unwrap();
        writer.flush().await.unwrap();
        tokio::task::yield_now().await;
    }
    if close {
        writer.shutdown().await.unwrap();
    }
    writer
}

fn transport(stream: DuplexStream) -> Transport<DuplexStream> {
    Transport::new(stream, Duration::from_secs(2))
}

#[tokio::test]
async fn test_valid_block_in_single_write() {
    let (reader, writer) = tokio::io::duplex(1024);
    let mut block = b"#9000000005".to_vec();
    block.extend_from_slice(&PAYLOAD);
    block.push(END_MARKER);
    let feeder = tokio::spawn(feed(writer, vec![block], false));

    let mut transport = transport(reader);
    let mut decoder = BlockDecoder::new(1024);
    let frame = decoder.decode(&mut transport).await.unwrap();

    assert_eq!(frame.declared_len, 5);
    assert_eq!(frame.payload, &PAYLOAD);
    feeder.await.unwrap();
}

#[tokio::test]
async fn test_byte_at_a_time_delivery() {
    let (reader, writer) = tokio::io::duplex(16);
    let mut block = b"#9000000005".to_vec();
    block.extend_from_slice(&PAYLOAD);
    block.push(END_MARKER);
    let fragments = block.iter().map(|b| vec![*b]).collect();
    let feeder = tokio::spawn(feed(writer, fragments, false));

    let mut transport = transport(reader);
    let mut decoder = BlockDecoder::new(64);
    let frame = decoder.decode(&mut transport).await.unwrap();

    assert_eq!(frame.payload, &PAYLOAD);
    assert_eq!(decoder.counters().total_bytes, 5);
    feeder.await.unwrap();
}

#[tokio::test]
async fn test_bad_terminator_discards_payload() {
    let (reader, writer) = tokio::io::duplex(1024);
    let mut block = b"#9000000005".to_vec();
    block.extend_from_slice(&PAYLOAD);
    block.push(0xFF);
    let feeder = tokio::spawn(feed(writer, vec![block], false));

    let mut transport = transport(reader);
    let mut decoder = BlockDecoder::new(64).with_drain_timeout(Duration::from_millis(20));
    let err = decoder.decode(&mut transport).await.unwrap_err();

    assert!(matches!(err, FrameError::Desynchronized { found: 0xFF, .. }));
    assert!(err.is_recoverable());
    feeder.await.unwrap();
}

#[tokio::test]
async fn test_negative_length_reads_only_the_header() {
    let (reader, writer) = tokio::io::duplex(1024);
    let mut bytes = b"#9-00000001".to_vec();
    bytes.extend_from_slice(b"#9000000000\n");
    let feeder = tokio::spawn(feed(writer, vec![bytes], false));

    let mut transport = transport(reader);
    let mut decoder = BlockDecoder::new(64);
    let err = decoder.decode(&mut transport).await.unwrap_err();
    assert!(matches!(
        err,
        FrameError::HeaderInvalid {
            fault: HeaderFault::Negative(-1),
            ..
        }
    ));

    // Nothing past the header was consumed, so the next block still decodes.
    let frame = decoder.decode(&mut transport).await.unwrap();
    assert_eq!(frame.declared_len, 0);
    feeder.await.unwrap();
}

#[tokio::test]
async fn test_close_mid_payload_is_incomplete() {
    let (reader, writer) = tokio::io::duplex(1024);
    let feeder = tokio::spawn(feed(
        writer,
        vec![b"#9000000005".to_vec(), vec![0x01, 0x02]],
        true,
    ));

    let mut transport = transport(reader);
    let mut decoder = BlockDecoder::new(64);
    let err = decoder.decode(&mut transport).await.unwrap_err();

    assert!(matches!(
        err,
        FrameError::Incomplete {
            declared: 5,
            received: 2,
            ..
        }
    ));
    feeder.await.unwrap();
}

#[tokio::test]
async fn test_large_block_in_uneven_fragments() {
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i * 7 % 251) as u8).collect();
    let mut block = format!("#9{:09}", payload.len()).into_bytes();
    block.extend_from_slice(&payload);
    block.push(END_MARKER);
    let mut fragments = Vec::new();
    let mut rest = block.as_slice();
    let mut size = 1;
    while !rest.is_empty() {
        let take = size.min(rest.len());
        fragments.push(rest[..take].to_vec());
        rest = &rest[take..];
        size = size * 3 % 4093 + 1;
    }
    let (reader, writer) = tokio::io::duplex(4096);
    let feeder = tokio::spawn(feed(writer, fragments, false));

    let mut transport = transport(reader);
    let mut decoder = BlockDecoder::new(200_000);
    let frame = decoder.decode(&mut transport).await.unwrap();

    assert_eq!(frame.payload, payload.as_slice());
    assert!(decoder.counters().packets > 1);
    feeder.await.unwrap();
}

#[test]
fn test_reference_preamble() {
    let preamble: WaveformPreamble = "0,1,1000,0,1.0e-9,0.0,0.0,0.04,0.0,0.0".parse().unwrap();

    assert_eq!(preamble.points, 1000);
    assert_eq!(preamble.x_increment, 1.0e-9);
}
