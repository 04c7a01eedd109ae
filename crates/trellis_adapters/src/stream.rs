//! Chunked frame streaming.
//!
//! A [`FrameStream`] is the consumer half of a bounded channel fed by a
//! producer task. The bound keeps peak memory proportional to one chunk;
//! dropping the stream closes the channel, which stops the producer at its
//! next send. Chunks arrive strictly in offset order and `is_last_chunk` is
//! true exactly once.

use tokio::sync::mpsc;
use trellis_frame::Frame;
use trellis_protocol::{AdapterError, StreamChunk};

/// Channel capacity: the producer may run at most one chunk ahead.
const CHANNEL_DEPTH: usize = 1;

/// A finite, non-restartable sequence of `(Frame, StreamChunk)` pairs.
#[derive(Debug)]
pub struct FrameStream {
    rx: mpsc::Receiver<Result<(Frame, StreamChunk), AdapterError>>,
}

impl FrameStream {
    /// Create a stream plus the sender its producer task feeds.
    pub fn channel() -> (
        mpsc::Sender<Result<(Frame, StreamChunk), AdapterError>>,
        FrameStream,
    ) {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        (tx, FrameStream { rx })
    }

    /// A stream that yields exactly one terminal chunk.
    pub fn single(frame: Frame, duration_ms: f64) -> FrameStream {
        let (tx, stream) = Self::channel();
        let rows = frame.height();
        let chunk = StreamChunk {
            chunk_index: 0,
            rows_in_chunk: rows,
            total_rows_so_far: rows,
            is_last_chunk: true,
            chunk_duration_ms: duration_ms,
        };
        // Capacity 1 guarantees this send succeeds without a task.
        let _ = tx.try_send(Ok((frame, chunk)));
        stream
    }

    /// Receive the next chunk. `None` means the stream is exhausted (or the
    /// producer stopped after an error chunk).
    pub async fn next_chunk(&mut self) -> Option<Result<(Frame, StreamChunk), AdapterError>> {
        self.rx.recv().await
    }

    /// Drain the stream and diagonally concatenate every chunk.
    pub async fn collect_all(mut self) -> Result<Frame, AdapterError> {
        let mut frames = Vec::new();
        while let Some(item) = self.next_chunk().await {
            let (frame, _) = item?;
            frames.push(frame);
        }
        Ok(Frame::concat_diagonal(&frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_frame::{Column, Scalar};

    #[tokio::test]
    async fn test_single_chunk_stream() {
        let frame = Frame::from_columns(vec![Column::new(
            "a",
            vec![Scalar::Int(1), Scalar::Int(2)],
        )])
        .unwrap();
        let mut stream = FrameStream::single(frame, 0.0);
        let (chunk_frame, meta) = stream.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk_frame.height(), 2);
        assert!(meta.is_last_chunk);
        assert_eq!(meta.chunk_index, 0);
        assert!(stream.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_producer_chunks_in_order() {
        let (tx, mut stream) = FrameStream::channel();
        tokio::spawn(async move {
            for i in 0..3usize {
                let frame =
                    Frame::from_columns(vec![Column::new("n", vec![Scalar::Int(i as i64)])])
                        .unwrap();
                let chunk = StreamChunk {
                    chunk_index: i,
                    rows_in_chunk: 1,
                    total_rows_so_far: i + 1,
                    is_last_chunk: i == 2,
                    chunk_duration_ms: 0.0,
                };
                if tx.send(Ok((frame, chunk))).await.is_err() {
                    return;
                }
            }
        });

        let mut seen = Vec::new();
        while let Some(item) = stream.next_chunk().await {
            let (_, meta) = item.unwrap();
            seen.push((meta.chunk_index, meta.is_last_chunk));
        }
        assert_eq!(seen, vec![(0, false), (1, false), (2, true)]);
    }
}
