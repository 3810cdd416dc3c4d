//! Non-destructive peek on top of an `AsyncRead`. Bytes returned by `peek`
//! stay buffered and are replayed to the first `read` calls, so a detector
//! can preview a connection's opening bytes without consuming them.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

pub struct PeekableConnection<T> {
    inner: T,
    peeked: Vec<u8>,
    peeked_pos: usize,
}

impl<T: AsyncRead + Unpin> PeekableConnection<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            peeked: Vec::new(),
            peeked_pos: 0,
        }
    }

    /// Read up to `n` bytes without consuming them. The buffer grows
    /// monotonically across calls: `peek(k)` followed by `peek(n)` for
    /// `n > k` only reads the additional `n - k` bytes from the socket.
    /// Returns fewer than `n` bytes on EOF.
    pub async fn peek(&mut self, n: usize) -> std::io::Result<&[u8]> {
        while self.peeked.len() < n {
            let mut chunk = vec![0u8; n - self.peeked.len()];
            let read = self.inner.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            self.peeked.extend_from_slice(&chunk[..read]);
        }
        let end = self.peeked.len().min(n);
        Ok(&self.peeked[..end])
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for PeekableConnection<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.peeked_pos < this.peeked.len() {
            let remaining = &this.peeked[this.peeked_pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.peeked_pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn peek_does_not_consume_bytes() {
        let mut conn = PeekableConnection::new(Cursor::new(b"hello world".to_vec()));
        assert_eq!(conn.peek(5).await.unwrap(), b"hello");
        assert_eq!(conn.peek(5).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn growing_peek_only_reads_the_delta() {
        let mut conn = PeekableConnection::new(Cursor::new(b"hello world".to_vec()));
        assert_eq!(conn.peek(5).await.unwrap(), b"hello");
        assert_eq!(conn.peek(11).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn read_after_peek_replays_then_continues() {
        let mut conn = PeekableConnection::new(Cursor::new(b"hello world".to_vec()));
        let _ = conn.peek(5).await.unwrap();

        let mut buf = vec![0u8; 11];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[tokio::test]
    async fn peek_beyond_available_returns_short_slice() {
        let mut conn = PeekableConnection::new(Cursor::new(b"hi".to_vec()));
        assert_eq!(conn.peek(10).await.unwrap(), b"hi");
    }
}
