// tests/transport_framing.rs

mod common;
use crate::common::builders::sample_message;
use crate::common::{init_tracing, with_timeout};

use std::error::Error;

use tokio::io::AsyncWriteExt;

use calcnode::errors::CalcNodeError;
use calcnode::protocol::{MessageType, ProtocolError, decode_message};
use calcnode::transport::{FrameReader, FrameWriter};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn frames_arrive_in_order() -> TestResult {
    init_tracing();

    let (client, server) = tokio::io::duplex(64 * 1024);
    let mut writer = FrameWriter::new(client);
    let mut reader = FrameReader::new(server, 1024 * 1024);

    let sent = [MessageType::Ready, MessageType::Execute, MessageType::Failure];
    for t in sent {
        writer.send(&sample_message(t)).await?;
    }
    drop(writer);

    let mut received = Vec::new();
    while let Some(frame) = with_timeout(reader.next_frame()).await? {
        received.push(decode_message(&frame)?.message_type());
    }
    assert_eq!(received, sent);
    Ok(())
}

#[tokio::test]
async fn oversized_frame_is_rejected() -> TestResult {
    init_tracing();

    let (mut client, server) = tokio::io::duplex(1024);
    let mut reader = FrameReader::new(server, 16);

    client.write_u32(17).await?;
    client.write_all(&[0u8; 17]).await?;

    match with_timeout(reader.next_frame()).await {
        Err(CalcNodeError::Protocol(ProtocolError::FrameTooLarge { size: 17, max: 16 })) => {}
        other => panic!("expected FrameTooLarge, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn eof_between_frames_is_a_clean_close() -> TestResult {
    let (client, server) = tokio::io::duplex(1024);
    let mut reader = FrameReader::new(server, 1024);
    drop(client);

    assert!(with_timeout(reader.next_frame()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn eof_inside_a_frame_is_an_error() -> TestResult {
    let (mut client, server) = tokio::io::duplex(1024);
    let mut reader = FrameReader::new(server, 1024);

    client.write_u32(10).await?;
    client.write_all(&[1, 2, 3]).await?;
    drop(client);

    assert!(matches!(
        with_timeout(reader.next_frame()).await,
        Err(CalcNodeError::IoError(_))
    ));
    Ok(())
}
