//! Batched frame writer
//!
//! Drains the connection's outbound queue and flushes whatever is ready in
//! a single vectored write. Frames arrive already encoded, so the writer
//! never touches the codec.

use crate::connection::ConnectionStats;
use bytes::Bytes;
use kanal::AsyncReceiver;
use std::io::{self, IoSlice};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const MAX_BATCH_SIZE: usize = 32;
/// Bound on flushing queued frames once the connection is closing
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Write queued frames until the queue closes or `cancel` fires.
///
/// On cancellation, frames already queued are still written before the
/// stream is shut down, so a final AUTH_FAILURE reaches the peer.
pub async fn run_writer<W>(
    frame_rx: AsyncReceiver<Bytes>,
    mut writer: W,
    stats: Arc<ConnectionStats>,
    cancel: CancellationToken,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        batch.clear();

        // recv first: a frame handed to the parked recv future is lost if
        // that future is dropped in favour of the cancel branch
        let first = tokio::select! {
            biased;
            frame = frame_rx.recv() => match frame {
                Ok(frame) => frame,
                Err(_) => break,
            },
            () = cancel.cancelled() => break,
        };
        batch.push(first);
        fill_batch(&frame_rx, &mut batch);

        write_batch(&mut writer, &batch).await?;
        record_sent(&stats, &batch);
    }

    let drain = async {
        loop {
            batch.clear();
            fill_batch(&frame_rx, &mut batch);
            if batch.is_empty() {
                break;
            }
            write_batch(&mut writer, &batch).await?;
            record_sent(&stats, &batch);
        }
        writer.shutdown().await
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
        Ok(result) => result,
        Err(_) => {
            debug!("Gave up draining outbound queue");
            Ok(())
        }
    }
}

fn fill_batch(frame_rx: &AsyncReceiver<Bytes>, batch: &mut Vec<Bytes>) {
    while batch.len() < MAX_BATCH_SIZE {
        match frame_rx.try_recv() {
            Ok(Some(frame)) => batch.push(frame),
            _ => break,
        }
    }
}

/// Write every buffer completely, retrying partial vectored writes
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut slices: Vec<IoSlice<'_>> = batch.iter().map(|b| IoSlice::new(b)).collect();
    let mut bufs = &mut slices[..];

    while !bufs.is_empty() {
        let n = writer.write_vectored(bufs).await?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        IoSlice::advance_slices(&mut bufs, n);
    }

    writer.flush().await
}

fn record_sent(stats: &ConnectionStats, batch: &[Bytes]) {
    let bytes: usize = batch.iter().map(Bytes::len).sum();
    stats.record_sent(batch.len() as u64, bytes as u64);

    #[cfg(feature = "metrics")]
    if let Some(m) = netconduit_observability::conduit_metrics() {
        m.record_send(batch.len(), bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kanal::bounded_async;
    use netconduit_protocol::{ConduitCodec, Frame, FrameBuffer, MessageType};
    use serde_json::json;
    use tokio::io::{duplex, AsyncReadExt};

    fn encoded(kind: &str) -> Bytes {
        ConduitCodec::new()
            .encode_frame(&Frame::message(kind, json!({"n": 1})).unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_writer_preserves_order() {
        let (tx, rx) = bounded_async::<Bytes>(16);
        let (writer, mut reader) = duplex(64 * 1024);
        let stats = Arc::new(ConnectionStats::default());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_writer(rx, writer, stats.clone(), cancel.clone()));

        let mut expected = 0;
        for i in 0..5 {
            let frame = encoded(&format!("kind-{i}"));
            expected += frame.len();
            tx.send(frame).await.unwrap();
        }

        let mut raw = vec![0u8; expected];
        reader.read_exact(&mut raw).await.unwrap();
        cancel.cancel();
        task.await.unwrap().unwrap();

        let mut buffer = FrameBuffer::default();
        buffer.feed(&raw);
        let frames = buffer.decode_all().unwrap();
        assert_eq!(frames.len(), 5);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.message_type, MessageType::Message);
            let body: netconduit_protocol::AppMessage = frame.body().unwrap();
            assert_eq!(body.kind, format!("kind-{i}"));
        }
        assert_eq!(stats.bytes_sent(), expected as u64);
    }

    #[tokio::test]
    async fn test_cancel_drains_queued_frames() {
        let (tx, rx) = bounded_async::<Bytes>(16);
        let (writer, mut reader) = duplex(64 * 1024);
        let cancel = CancellationToken::new();

        let frame = encoded("last-words");
        tx.send(frame.clone()).await.unwrap();
        cancel.cancel();

        run_writer(rx, writer, Arc::new(ConnectionStats::default()), cancel)
            .await
            .unwrap();

        let mut raw = Vec::new();
        reader.read_to_end(&mut raw).await.unwrap();
        assert_eq!(raw, frame.to_vec());
    }

    #[tokio::test]
    async fn test_frame_queued_while_parked_survives_cancel() {
        let (tx, rx) = bounded_async::<Bytes>(16);
        let (writer, mut reader) = duplex(64 * 1024);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_writer(
            rx,
            writer,
            Arc::new(ConnectionStats::default()),
            cancel.clone(),
        ));
        // let the writer park on an empty queue
        tokio::task::yield_now().await;

        let frame = encoded("auth-failure");
        tx.send(frame.clone()).await.unwrap();
        cancel.cancel();
        task.await.unwrap().unwrap();

        let mut raw = Vec::new();
        reader.read_to_end(&mut raw).await.unwrap();
        assert_eq!(raw, frame.to_vec());
    }

    #[tokio::test]
    async fn test_write_error_surfaces() {
        let (tx, rx) = bounded_async::<Bytes>(16);
        let (writer, reader) = duplex(64);
        drop(reader);

        tx.send(encoded("lost")).await.unwrap();
        let result = run_writer(
            rx,
            writer,
            Arc::new(ConnectionStats::default()),
            CancellationToken::new(),
        )
        .await;
        assert!(result.is_err());
    }
}
