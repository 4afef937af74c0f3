//! Stream consumer: relay bytes in, `StreamEvent` callbacks out.
//!
//! Bytes may arrive split anywhere, including inside a multi-byte character or
//! a JSON payload. Decoding is incremental and only complete frames are
//! delivered. A cancelled token stops delivery before the next callback and
//! drops the reader.

use bytes::Bytes;
use chatrelay_contracts::{SseDecoder, StreamEvent, parse_event_frame};
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The stream ended on its own.
    Completed,
    Cancelled,
}

/// Read `stream` to the end, calling `on_event` once per decoded event in
/// arrival order.
///
/// The stream is owned here and dropped on every exit path. A trailing partial
/// frame at end of stream is discarded, never force-parsed.
pub async fn consume_event_stream<S, F>(
    stream: S,
    cancel: &CancellationToken,
    mut on_event: F,
) -> Result<ConsumeOutcome, ClientError>
where
    S: Stream<Item = Result<Bytes, ClientError>>,
    F: FnMut(StreamEvent),
{
    if cancel.is_cancelled() {
        tracing::debug!("Stream cancelled before the first read");
        return Ok(ConsumeOutcome::Cancelled);
    }

    let mut stream = std::pin::pin!(stream);
    let mut decoder = SseDecoder::new();
    let mut delivered = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(delivered, "Stream cancelled while waiting for data");
                return Ok(ConsumeOutcome::Cancelled);
            }
            next = stream.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                if cancel.is_cancelled() {
                    return Ok(ConsumeOutcome::Cancelled);
                }
                tracing::warn!(error = %err, delivered, "Stream read failed");
                return Err(err);
            }
            None => {
                if !decoder.buffered().trim().is_empty() {
                    tracing::debug!(
                        pending = decoder.buffered().len(),
                        "Discarding partial frame at end of stream"
                    );
                }
                return Ok(ConsumeOutcome::Completed);
            }
        };

        for frame in decoder.push(&chunk) {
            if cancel.is_cancelled() {
                tracing::debug!(delivered, "Stream cancelled mid-chunk");
                return Ok(ConsumeOutcome::Cancelled);
            }
            match parse_event_frame(&frame) {
                Some(Ok(event)) => {
                    delivered += 1;
                    on_event(event);
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, data = %frame.data, "Skipping malformed event frame");
                }
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts polls that produced an item and flags when it is dropped.
    struct Probe {
        reads: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    impl Probe {
        fn hit(&self) {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn probed(
        chunks: Vec<&'static str>,
    ) -> (
        impl Stream<Item = Result<Bytes, ClientError>>,
        Arc<AtomicUsize>,
        Arc<AtomicBool>,
    ) {
        let reads = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicBool::new(false));
        let probe = Probe {
            reads: reads.clone(),
            dropped: dropped.clone(),
        };
        let stream = stream::iter(chunks).map(move |chunk| {
            probe.hit();
            Ok(Bytes::from_static(chunk.as_bytes()))
        });
        (stream, reads, dropped)
    }

    const THREE_FRAMES: &str = concat!(
        "data: {\"type\":\"content\",\"content\":\"a\"}\n\n",
        "data: {\"type\":\"content\",\"content\":\"b\"}\n\n",
        "data: {\"type\":\"done\"}\n\n",
    );

    #[tokio::test]
    async fn test_pre_cancelled_token_reads_nothing() {
        let (stream, reads, dropped) = probed(vec![THREE_FRAMES]);
        let token = CancellationToken::new();
        token.cancel();

        let mut calls = 0;
        let outcome = consume_event_stream(stream, &token, |_| calls += 1)
            .await
            .unwrap();

        assert_eq!(outcome, ConsumeOutcome::Cancelled);
        assert_eq!(calls, 0);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_from_callback_suppresses_rest_of_chunk() {
        let (stream, _reads, dropped) = probed(vec![THREE_FRAMES]);
        let token = CancellationToken::new();

        let mut events = Vec::new();
        let outcome = consume_event_stream(stream, &token, |event| {
            events.push(event);
            token.cancel();
        })
        .await
        .unwrap();

        assert_eq!(outcome, ConsumeOutcome::Cancelled);
        assert_eq!(events, vec![StreamEvent::content("a")]);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let (stream, _, _) = probed(vec![
            "data: {not json}\n\n",
            ": keep-alive\n\n",
            "data: {\"type\":\"done\"}\n\n",
        ]);
        let mut events = Vec::new();
        let outcome = consume_event_stream(stream, &CancellationToken::new(), |e| events.push(e))
            .await
            .unwrap();

        assert_eq!(outcome, ConsumeOutcome::Completed);
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[tokio::test]
    async fn test_trailing_partial_frame_is_not_flushed() {
        let (stream, _, _) = probed(vec![
            "data: {\"type\":\"content\",\"content\":\"a\"}\n\n",
            "data: {\"type\":\"done\"}",
        ]);
        let mut events = Vec::new();
        consume_event_stream(stream, &CancellationToken::new(), |e| events.push(e))
            .await
            .unwrap();

        assert_eq!(events, vec![StreamEvent::content("a")]);
    }

    #[tokio::test]
    async fn test_read_error_is_transport_failure() {
        let chunks: Vec<Result<Bytes, ClientError>> = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"content\",\"content\":\"a\"}\n\n")),
            Err(ClientError::Transport("connection reset".to_string())),
        ];
        let mut events = Vec::new();
        let result =
            consume_event_stream(stream::iter(chunks), &CancellationToken::new(), |e| {
                events.push(e)
            })
            .await;

        assert_eq!(
            result,
            Err(ClientError::Transport("connection reset".to_string()))
        );
        assert_eq!(events, vec![StreamEvent::content("a")]);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_drops_reader() {
        let dropped = Arc::new(AtomicBool::new(false));
        let probe = Probe {
            reads: Arc::new(AtomicUsize::new(0)),
            dropped: dropped.clone(),
        };
        let first = stream::iter(vec![Ok(Bytes::from_static(
            b"data: {\"type\":\"content\",\"content\":\"a\"}\n\n",
        ))]);
        let stalled = stream::pending::<Result<Bytes, ClientError>>().map(move |item| {
            probe.hit();
            item
        });

        let token = CancellationToken::new();
        let canceller = token.clone();
        let mut events = Vec::new();
        let consume = consume_event_stream(first.chain(stalled), &token, |e| events.push(e));
        let cancel_later = async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        };

        let (outcome, ()) = tokio::join!(consume, cancel_later);
        assert_eq!(outcome.unwrap(), ConsumeOutcome::Cancelled);
        assert_eq!(events, vec![StreamEvent::content("a")]);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
