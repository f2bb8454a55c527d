//! Minimal HTTP/1.0 client surface: request formatting and header skip.
//!
//! This is deliberately not an HTTP parser. The stations speak plain
//! shoutcast-style HTTP; the response status line and headers are discarded
//! unseen and the stream is handed to the decoder at the first body byte.

use core::fmt::Write as _;

use embedded_io_async::Read;
use heapless::String;

/// Capacity for one outbound request; sized for the catalog's bounded
/// host/path strings plus the literal framing.
pub const REQUEST_BYTES: usize = 192;

const HEADER_TERMINATOR: [u8; 4] = *b"\r\n\r\n";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestError {
    /// host + path exceed [`REQUEST_BYTES`].
    TooLong,
}

/// Failure while locating the start of the media body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamError<E> {
    /// Peer closed the stream before the end-of-headers marker.
    ClosedBeforeBody,
    Io(E),
}

/// Build the literal `GET {path} HTTP/1.0` request with a lone `Host`
/// header. No keep-alive, no user-agent: anything more is wasted bytes on
/// this link.
pub fn format_request(host: &str, path: &str) -> Result<String<REQUEST_BYTES>, RequestError> {
    let mut request = String::new();
    write!(request, "GET {path} HTTP/1.0\r\nHost: {host}\r\n\r\n")
        .map_err(|_| RequestError::TooLong)?;
    Ok(request)
}

/// Sliding four-byte window over the response bytes; only ever looks for the
/// end-of-headers marker, so nothing before it needs to be retained.
#[derive(Debug, Default)]
pub struct HeaderBoundary {
    window: [u8; 4],
    filled: u8,
}

impl HeaderBoundary {
    pub const fn new() -> Self {
        Self {
            window: [0; 4],
            filled: 0,
        }
    }

    /// Feed one byte; true once the last four bytes form `\r\n\r\n`.
    pub fn push(&mut self, byte: u8) -> bool {
        self.window.rotate_left(1);
        self.window[3] = byte;
        if self.filled < 4 {
            self.filled += 1;
        }
        self.filled == 4 && self.window == HEADER_TERMINATOR
    }
}

/// Consume the response one byte at a time until just past `\r\n\r\n`,
/// leaving the stream positioned at the first media byte.
pub async fn skip_response_headers<R: Read>(stream: &mut R) -> Result<(), StreamError<R::Error>> {
    let mut boundary = HeaderBoundary::new();
    let mut byte = [0u8; 1];
    loop {
        let read = stream.read(&mut byte).await.map_err(StreamError::Io)?;
        if read == 0 {
            return Err(StreamError::ClosedBeforeBody);
        }
        if boundary.push(byte[0]) {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    /// Replays a response split into caller-chosen chunks; reads never cross
    /// a chunk boundary, mimicking arbitrary TCP segmentation.
    struct ChunkedStream<'a> {
        chunks: &'a [&'a [u8]],
        chunk: usize,
        offset: usize,
    }

    impl<'a> ChunkedStream<'a> {
        const fn new(chunks: &'a [&'a [u8]]) -> Self {
            Self {
                chunks,
                chunk: 0,
                offset: 0,
            }
        }

        fn read_to_end(&mut self, out: &mut [u8]) -> usize {
            let mut total = 0;
            loop {
                let mut byte = [0u8; 1];
                match block_on(embedded_io_async::Read::read(self, &mut byte)) {
                    Ok(0) | Err(_) => return total,
                    Ok(_) => {
                        out[total] = byte[0];
                        total += 1;
                    }
                }
            }
        }
    }

    impl embedded_io_async::ErrorType for ChunkedStream<'_> {
        type Error = core::convert::Infallible;
    }

    impl embedded_io_async::Read for ChunkedStream<'_> {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            while self.chunk < self.chunks.len() {
                let current = self.chunks[self.chunk];
                if self.offset < current.len() {
                    let take = buf.len().min(current.len() - self.offset);
                    buf[..take].copy_from_slice(&current[self.offset..self.offset + take]);
                    self.offset += take;
                    return Ok(take);
                }
                self.chunk += 1;
                self.offset = 0;
            }
            Ok(0)
        }
    }

    #[test]
    fn request_is_the_exact_minimal_literal() {
        let request = format_request("ice1.somafm.com", "/groovesalad-128-mp3").unwrap();
        assert_eq!(
            request.as_str(),
            "GET /groovesalad-128-mp3 HTTP/1.0\r\nHost: ice1.somafm.com\r\n\r\n"
        );
    }

    #[test]
    fn oversized_request_is_rejected() {
        let long_path = core::str::from_utf8(&[b'a'; 200]).unwrap();
        assert_eq!(
            format_request("host.example", long_path),
            Err(RequestError::TooLong)
        );
    }

    #[test]
    fn boundary_matches_only_the_terminator() {
        let mut boundary = HeaderBoundary::new();
        for byte in b"HTTP/1.0 200 OK\r\ncontent-type: audio/mpeg\r\n" {
            assert!(!boundary.push(*byte));
        }
        assert!(!boundary.push(b'\r'));
        assert!(boundary.push(b'\n'));
    }

    #[test]
    fn skip_terminates_on_marker_regardless_of_chunking() {
        let whole: &[&[u8]] = &[b"HTTP/1.0 200 OK\r\n\r\n"];
        let byte_at_a_time: &[&[u8]] = &[b"X", b"\r", b"\n", b"\r", b"\n"];
        let split_inside_marker: &[&[u8]] = &[b"HTTP/1.0 200 OK\r\n\r", b"\n"];

        for chunks in [whole, byte_at_a_time, split_inside_marker] {
            let mut stream = ChunkedStream::new(chunks);
            assert!(block_on(skip_response_headers(&mut stream)).is_ok());
        }
    }

    #[test]
    fn skip_consumes_nothing_past_the_marker() {
        // 30-byte response split 10/20 with the marker mid-second-chunk: the
        // six media bytes after the marker must be left for the decoder.
        let first: &[u8] = b"HTTP/1.0 2";
        let second: &[u8] = b"00 OK\r\nok!\r\n\r\nMEDIA!";
        assert_eq!(first.len() + second.len(), 30);

        let chunks: &[&[u8]] = &[first, second];
        let mut stream = ChunkedStream::new(chunks);
        assert!(block_on(skip_response_headers(&mut stream)).is_ok());

        let mut rest = [0u8; 32];
        let read = stream.read_to_end(&mut rest);
        assert_eq!(&rest[..read], b"MEDIA!");
    }

    #[test]
    fn close_before_marker_is_reported() {
        let no_marker: &[&[u8]] = &[b"HTTP/1.0 200 OK\r\n"];
        let mut stream = ChunkedStream::new(no_marker);
        assert_eq!(
            block_on(skip_response_headers(&mut stream)),
            Err(StreamError::ClosedBeforeBody)
        );
    }

    #[test]
    fn close_with_under_four_bytes_is_reported() {
        let tiny: &[&[u8]] = &[b"\r\n\r"];
        let mut stream = ChunkedStream::new(tiny);
        assert_eq!(
            block_on(skip_response_headers(&mut stream)),
            Err(StreamError::ClosedBeforeBody)
        );
    }

    #[test]
    fn empty_stream_is_reported() {
        let empty: &[&[u8]] = &[];
        let mut stream = ChunkedStream::new(empty);
        assert_eq!(
            block_on(skip_response_headers(&mut stream)),
            Err(StreamError::ClosedBeforeBody)
        );
    }
}
