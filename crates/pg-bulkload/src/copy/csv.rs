//! CSV record counting for COPY output.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

/// Counts CSV records in bytes as they pass through to an inner writer.
///
/// Newlines inside quoted fields do not end a record. An escaped quote (`""`)
/// toggles the quote state twice, so it needs no special case. The first
/// record is treated as the header and excluded from [`records`](Self::records).
pub struct CsvRecordCounter<W> {
    inner: W,
    in_quotes: bool,
    line_has_data: bool,
    lines: u64,
}

impl<W> CsvRecordCounter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            in_quotes: false,
            line_has_data: false,
            lines: 0,
        }
    }

    fn observe(&mut self, buf: &[u8]) {
        for &b in buf {
            match b {
                b'"' => {
                    self.in_quotes = !self.in_quotes;
                    self.line_has_data = true;
                }
                b'\n' if !self.in_quotes => {
                    self.lines += 1;
                    self.line_has_data = false;
                }
                b'\r' if !self.in_quotes => {}
                _ => self.line_has_data = true,
            }
        }
    }

    /// Data records seen so far, header excluded.
    pub fn records(&self) -> u64 {
        let lines = self.lines + u64::from(self.line_has_data);
        lines.saturating_sub(1)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CsvRecordCounter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            self.observe(&buf[..n]);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
