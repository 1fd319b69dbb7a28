//! Minimal Server-Sent-Events decoder for the updates stream.
//!
//! The daemon emits one single-line JSON `data:` payload per event, so the
//! decoder only needs to split frames on blank lines and strip the field
//! prefixes; `event:` names and keep-alive comments are ignored (the payload
//! itself is a tagged union).

#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: String,
}

impl SseDecoder {
    /// Feed raw transport bytes; returns the `data:` payload of every event
    /// completed so far, in arrival order.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        let mut out = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let frame: String = self.buf.drain(..pos + 2).collect();
            for line in frame.lines() {
                if let Some(data) = line.strip_prefix("data:") {
                    out.push(data.trim_start().to_string());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_frame_in_one_chunk() {
        let mut dec = SseDecoder::default();
        let got = dec.push(b"event: day_color\ndata: {\"x\":1}\n\n");
        assert_eq!(got, vec!["{\"x\":1}"]);
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut dec = SseDecoder::default();
        assert!(dec.push(b"event: node\nda").is_empty());
        assert!(dec.push(b"ta: {\"op\":\"ADDED\"}").is_empty());
        let got = dec.push(b"\n\n");
        assert_eq!(got, vec!["{\"op\":\"ADDED\"}"]);
    }

    #[test]
    fn several_frames_in_one_chunk() {
        let mut dec = SseDecoder::default();
        let got = dec.push(b"data: 1\n\ndata: 2\n\ndata: 3\n\n");
        assert_eq!(got, vec!["1", "2", "3"]);
    }

    #[test]
    fn comments_and_event_names_are_ignored() {
        let mut dec = SseDecoder::default();
        let got = dec.push(b": keep-alive\n\nevent: day\ndata: {}\n\n");
        assert_eq!(got, vec!["{}"]);
    }
}
