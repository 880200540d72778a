use std::time::Duration;

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::watch,
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, trace};

use crate::error::SinkOp;
use crate::sink::RotatingSink;

pub const BUFFER_SIZE: usize = 10 * 1024;
const READ_COOLDOWN: Duration = Duration::from_micros(100);

/// Tells a running pump to let go of its stream at the next read boundary.
/// A write already in progress always completes first.
pub type PumpStop = watch::Receiver<bool>;

/*
    @@@
    @pump();
    . Drains reader into sink until end of stream, then closes the sink.
    . Every chunk read is forwarded as-is and in order, there is no batching.
    . A failed read is reported through the sink's dedup and retried after a short cooldown.
*/
pub async fn pump<R>(reader: R, sink: RotatingSink) -> RotatingSink
where
    R: AsyncRead + Unpin,
{
    pump_until(reader, sink, None).await
}

/*
    @@@
    @pump_until();
    . Same as pump, but also returns once stop turns true, without waiting for end of stream.
    . The stream is dropped and the sink closed either way, so the sink has no writer left afterwards.
*/
pub async fn pump_until<R>(mut reader: R, mut sink: RotatingSink, mut stop: Option<PumpStop>) -> RotatingSink
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let read = tokio::select! {
            biased;
            _ = stop_requested(&mut stop) => {
                debug!(path = %sink.path().display(), "pipe still open, releasing it");
                break;
            }
            read = reader.read(&mut buf) => read,
        };
        match read {
            Ok(0) => {
                trace!(path = %sink.path().display(), "pipe closed");
                break;
            }
            Ok(n) => sink.write(&buf[..n]).await,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                sink.clear_error();
                sleep(READ_COOLDOWN).await;
            }
            Err(e) => {
                sink.report(SinkOp::Read, e);
                sleep(READ_COOLDOWN).await;
            }
        }
    }
    sink.close().await;
    sink
}

async fn stop_requested(stop: &mut Option<PumpStop>) {
    if let Some(rx) = stop {
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // sender gone without asking, run until end of stream
                break;
            }
        }
    }
    std::future::pending::<()>().await
}

/// Runs [`pump`] as its own task.
pub fn spawn_pump<R>(reader: R, sink: RotatingSink) -> JoinHandle<RotatingSink>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(pump(reader, sink))
}

/// Runs [`pump_until`] as its own task.
pub fn spawn_stoppable_pump<R>(reader: R, sink: RotatingSink, stop: PumpStop) -> JoinHandle<RotatingSink>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(pump_until(reader, sink, Some(stop)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        pin::Pin,
        task::{Context, Poll},
    };
    use tempfile::tempdir;
    use tokio::io::{AsyncWriteExt, ReadBuf};

    /// Fails a fixed number of reads before yielding its data.
    struct Flaky {
        failures: usize,
        data: &'static [u8],
    }

    impl AsyncRead for Flaky {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.failures > 0 {
                self.failures -= 1;
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "flaky pipe")));
            }
            let n = self.data.len().min(buf.remaining());
            buf.put_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn forwards_until_eof_and_closes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.log");
        let sink = RotatingSink::open(&path, 0, 0).await.unwrap();

        let (mut tx, rx) = tokio::io::duplex(64);
        let handle = spawn_pump(rx, sink);
        tx.write_all(b"hello ").await.unwrap();
        tx.write_all(b"world\n").await.unwrap();
        drop(tx);

        let sink = handle.await.unwrap();
        assert_eq!(sink.size(), 12);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world\n");
    }

    #[tokio::test]
    async fn read_errors_are_retried() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.log");
        let sink = RotatingSink::open(&path, 0, 0).await.unwrap();

        let sink = pump(
            Flaky {
                failures: 3,
                data: b"survived",
            },
            sink,
        )
        .await;
        assert_eq!(std::fs::read(&path).unwrap(), b"survived");
        assert_eq!(sink.last_error(), None);
    }

    #[tokio::test]
    async fn large_stream_keeps_order_across_rotations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.log");
        let sink = RotatingSink::open(&path, 4096, 8).await.unwrap();

        let input: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let sink = pump(&input[..], sink).await;

        let mut joined = Vec::new();
        for i in (1..=8).rev() {
            if let Ok(bytes) = std::fs::read(sink.backup_path(i)) {
                joined.extend(bytes);
            }
        }
        joined.extend(std::fs::read(&path).unwrap());
        assert_eq!(joined, input);
    }

    #[tokio::test]
    async fn stop_releases_an_open_pipe() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.log");
        let sink = RotatingSink::open(&path, 0, 0).await.unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let (mut tx, rx) = tokio::io::duplex(64);
        let handle = spawn_stoppable_pump(rx, sink, stop_rx);
        tx.write_all(b"early").await.unwrap();
        while std::fs::read(&path).unwrap().len() < 5 {
            tokio::task::yield_now().await;
        }

        stop_tx.send(true).unwrap();
        let sink = handle.await.unwrap();
        assert_eq!(sink.size(), 5);

        // nobody reads the pipe any more
        assert!(tx.write_all(b"late").await.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"early");
    }

    #[tokio::test]
    async fn dropped_stop_sender_runs_to_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.log");
        let sink = RotatingSink::open(&path, 0, 0).await.unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        drop(stop_tx);
        let (mut tx, rx) = tokio::io::duplex(64);
        let handle = spawn_stoppable_pump(rx, sink, stop_rx);
        tx.write_all(b"all of it").await.unwrap();
        drop(tx);

        handle.await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"all of it");
    }
}
