//! Splits a byte stream of concatenated JPEG images into frames

const START_OF_IMAGE: [u8; 2] = [0xFF, 0xD8];
const END_OF_IMAGE: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on buffered bytes while waiting for an end marker
pub const MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;

/// Accumulates chunks and yields complete JPEG images
#[derive(Debug, Default)]
pub struct MjpegSplitter {
    pending: Vec<u8>,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the newest complete image it finished.
    ///
    /// When a chunk completes several images only the last one is
    /// returned; older ones are stale by the time they would be decoded.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() > MAX_PENDING_BYTES {
            let excess = self.pending.len() - MAX_PENDING_BYTES;
            self.pending.drain(..excess);
        }

        let mut newest = None;
        loop {
            let Some(start) = find(&self.pending, &START_OF_IMAGE) else {
                // Keep a trailing 0xFF, it may begin a marker split across chunks
                let keep = usize::from(self.pending.last() == Some(&0xFF));
                let drop_to = self.pending.len() - keep;
                self.pending.drain(..drop_to);
                break;
            };
            let Some(end) = find(&self.pending[start + 2..], &END_OF_IMAGE) else {
                self.pending.drain(..start);
                break;
            };

            let end = start + 2 + end + 2;
            newest = Some(self.pending[start..end].to_vec());
            self.pending.drain(..end);
        }
        newest
    }

    /// Bytes currently buffered
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn find(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut out = START_OF_IMAGE.to_vec();
        out.extend_from_slice(body);
        out.extend_from_slice(&END_OF_IMAGE);
        out
    }

    #[test]
    fn test_image_inside_boundary_noise() {
        let mut splitter = MjpegSplitter::new();
        let image = jpeg(b"pixels");
        let mut chunk = b"--ffmpeg\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        chunk.extend_from_slice(&image);
        chunk.extend_from_slice(b"\r\n");

        assert_eq!(splitter.push(&chunk), Some(image));
    }

    #[test]
    fn test_image_split_across_chunks() {
        let mut splitter = MjpegSplitter::new();
        let image = jpeg(b"0123456789");
        for split in 1..image.len() {
            assert!(splitter.push(&image[..split]).is_none(), "split at {split}");
            assert_eq!(splitter.push(&image[split..]).as_ref(), Some(&image));
        }
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut splitter = MjpegSplitter::new();
        let image = jpeg(b"abc");
        assert!(splitter.push(b"noise\xFF").is_none());
        assert_eq!(splitter.push(&image[1..]), Some(image));
    }

    #[test]
    fn test_newest_image_wins() {
        let mut splitter = MjpegSplitter::new();
        let mut chunk = jpeg(b"old");
        chunk.extend_from_slice(&jpeg(b"new"));
        assert_eq!(splitter.push(&chunk), Some(jpeg(b"new")));
        assert_eq!(splitter.pending_len(), 0);
    }

    #[test]
    fn test_pending_is_bounded() {
        let mut splitter = MjpegSplitter::new();
        let mut chunk = START_OF_IMAGE.to_vec();
        chunk.resize(MAX_PENDING_BYTES + 1024, 0x11);
        assert!(splitter.push(&chunk).is_none());
        assert!(splitter.pending_len() <= MAX_PENDING_BYTES);
    }
}
