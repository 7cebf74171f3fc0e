//! Bridges an async byte-chunk producer (e.g. a Smart-HTTP response body) into the synchronous
//! `BufRead` that [`super::Pack::decode`] expects, for use from a blocking task.

use std::io::{self, BufRead, Read};

use bytes::Bytes;
use tokio::sync::mpsc::Receiver;

/// A blocking `Read`/`BufRead` over a tokio channel of byte chunks. Must be driven from a
/// blocking context (e.g. `tokio::task::spawn_blocking`); `blocking_recv` panics if called from
/// a current-thread runtime.
pub struct ChannelReader {
    receiver: Receiver<Bytes>,
    buf: Bytes,
    pos: usize,
}

impl ChannelReader {
    pub fn new(receiver: Receiver<Bytes>) -> Self {
        Self {
            receiver,
            buf: Bytes::new(),
            pos: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let avail = self.fill_buf()?;
        let n = avail.len().min(out.len());
        out[..n].copy_from_slice(&avail[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for ChannelReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.buf.len() {
            match self.receiver.blocking_recv() {
                Some(chunk) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                None => {
                    self.buf = Bytes::new();
                    self.pos = 0;
                }
            }
        }
        Ok(&self.buf[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.buf.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_across_chunk_boundaries() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.try_send(Bytes::from_static(b"hel")).unwrap();
        tx.try_send(Bytes::from_static(b"lo, ")).unwrap();
        tx.try_send(Bytes::from_static(b"world")).unwrap();
        drop(tx);

        let mut reader = ChannelReader::new(rx);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello, world");
    }

    #[test]
    fn empty_channel_reads_as_eof() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(1);
        drop(tx);

        let mut reader = ChannelReader::new(rx);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
