use std::io;

use tokio_util::bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::header::{ContentLength, HeaderParse};

// The transport is stream oriented, frames are delimited by the header
// terminator plus Content-Length.
#[derive(Default)]
pub(crate) struct StreamingDecoder;

impl Decoder for StreamingDecoder {
    type Error = io::Error;
    type Item = Bytes;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Check if is keep-alive.
        if is_keep_alive(src) {
            src.advance(src.len());
            return Ok(None);
        }

        // Find header end.
        let hdr_end = b"\n\r\n";
        let pos = find_subslice(src, hdr_end);
        let Some(pos) = pos else {
            return Ok(None);
        };
        let body_start = pos + 3;
        let hdr_end = pos + 1;

        // Find "Content-Length" header
        let mut content_length = None;

        let lines = src[..hdr_end].split(|&b| b == b'\n');
        for line in lines {
            let mut split = line.splitn(2, |&c| c == b':');
            let Some(name) = split.next() else {
                continue;
            };
            if ContentLength::matches_name(name.trim_ascii()) {
                let Some(value) = split.next() else {
                    continue;
                };
                let Ok(value_str) = std::str::from_utf8(value) else {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Invalid UTF-8 in Content-Length header",
                    ));
                };
                if let Ok(parsed_value) = value_str.trim().parse::<usize>() {
                    content_length = Some(parsed_value);
                }
            }
        }

        if let Some(c_len) = content_length {
            let expected_msg_size = body_start + c_len;
            if src.len() < expected_msg_size {
                src.reserve(expected_msg_size - src.len());
                return Ok(None);
            }
            let src_bytes = src.split_to(expected_msg_size);

            Ok(Some(src_bytes.freeze()))
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Content-Length not found",
            ))
        }
    }
}

fn find_subslice(src: &[u8], buf: &[u8]) -> Option<usize> {
    src.windows(buf.len()).position(|w| w == buf)
}

fn is_keep_alive(buf: &[u8]) -> bool {
    matches!(buf, b"\r\n\r\n" | b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSG: &[u8] = b"SIP/2.0 200 OK\r\nContent-Length: 4\r\n\r\nabcd";

    #[test]
    fn test_decode_complete_frame() {
        let mut decoder = StreamingDecoder;
        let mut buf = BytesMut::from(MSG);

        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_ref(), MSG);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut decoder = StreamingDecoder;
        let mut buf = BytesMut::from(&MSG[..20]);

        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&MSG[20..]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_ref(), MSG);
    }

    #[test]
    fn test_keep_alive_is_skipped() {
        let mut decoder = StreamingDecoder;
        let mut buf = BytesMut::from(&b"\r\n\r\n"[..]);

        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut decoder = StreamingDecoder;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(MSG);
        buf.extend_from_slice(MSG);

        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_ref(), MSG);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_ref(), MSG);
        assert!(buf.is_empty());
    }
}
