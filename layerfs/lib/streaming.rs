use bytes::{Buf, Bytes};
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};

use crate::{LayerFsResult, StorageBackend, VirtualPath};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A stream side being compared, with the unread part of its current chunk.
struct Cursor<S> {
    stream: S,
    chunk: Bytes,
    done: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<S> Cursor<S>
where
    S: Stream<Item = LayerFsResult<Bytes>> + Unpin,
{
    fn new(stream: S) -> Self {
        Self {
            stream,
            chunk: Bytes::new(),
            done: false,
        }
    }

    /// Refills the current chunk if it is used up. Empty chunks are skipped.
    async fn fill(&mut self) -> LayerFsResult<()> {
        while self.chunk.is_empty() && !self.done {
            match self.stream.next().await {
                Some(chunk) => self.chunk = chunk?,
                None => self.done = true,
            }
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Compares two byte streams for equality without buffering either of them.
///
/// Equality is over the bytes the streams produce, so the two sides may be chunked differently.
/// The comparison stops at the first differing byte or as soon as one stream ends before the
/// other.
///
/// ## Errors
///
/// Returns the first error produced by either stream.
pub async fn compare_streams<A, B>(a: A, b: B) -> LayerFsResult<bool>
where
    A: Stream<Item = LayerFsResult<Bytes>> + Unpin,
    B: Stream<Item = LayerFsResult<Bytes>> + Unpin,
{
    let mut a = Cursor::new(a);
    let mut b = Cursor::new(b);

    loop {
        a.fill().await?;
        b.fill().await?;

        match (a.chunk.is_empty(), b.chunk.is_empty()) {
            (true, true) => return Ok(true),
            (true, false) | (false, true) => return Ok(false),
            (false, false) => {}
        }

        let len = a.chunk.len().min(b.chunk.len());
        if a.chunk[..len] != b.chunk[..len] {
            return Ok(false);
        }

        a.chunk.advance(len);
        b.chunk.advance(len);
    }
}

/// Computes the SHA-256 digest of a byte stream as lowercase hex.
pub async fn hash_stream<S>(mut stream: S) -> LayerFsResult<String>
where
    S: Stream<Item = LayerFsResult<Bytes>> + Unpin,
{
    let mut hasher = Sha256::new();
    while let Some(chunk) = stream.next().await {
        hasher.update(&chunk?);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compares the content of one path on two backends by streaming both files.
pub(crate) async fn contents_equal(
    left: &dyn StorageBackend,
    right: &dyn StorageBackend,
    path: &VirtualPath,
    chunk_size: usize,
) -> LayerFsResult<bool> {
    let left = left.read_stream(path, chunk_size).await?;
    let right = right.read_stream(path, chunk_size).await?;
    compare_streams(left, right).await
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::{LayerFsError, MemoryBackend};

    fn chunked(
        data: &'static [u8],
        sizes: &[usize],
    ) -> impl Stream<Item = LayerFsResult<Bytes>> + Unpin {
        let mut chunks = Vec::new();
        let mut start = 0;
        for size in sizes.iter().cycle() {
            if start >= data.len() {
                break;
            }
            let end = (start + size).min(data.len());
            chunks.push(Ok(Bytes::from_static(&data[start..end])));
            start = end;
        }

        stream::iter(chunks)
    }

    #[tokio::test]
    async fn test_streaming_compare_ignores_chunking() -> anyhow::Result<()> {
        let data = b"the quick brown fox jumps over the lazy dog";
        let layouts: [&[usize]; 5] = [&[1], &[3], &[7, 2], &[43], &[0, 5, 11]];

        for left in layouts {
            for right in layouts {
                assert!(compare_streams(chunked(data, left), chunked(data, right)).await?);
            }
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_streaming_compare_detects_differences() -> anyhow::Result<()> {
        assert!(!compare_streams(chunked(b"abc123", &[2]), chunked(b"xyz123", &[4])).await?);
        assert!(!compare_streams(chunked(b"abc", &[1]), chunked(b"abcd", &[2])).await?);
        assert!(!compare_streams(chunked(b"abcd", &[4]), chunked(b"abc", &[3])).await?);
        assert!(compare_streams(chunked(b"", &[1]), chunked(b"", &[3])).await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_streaming_compare_propagates_errors() {
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(LayerFsError::custom(anyhow::anyhow!("read failed"))),
        ]);

        let result = compare_streams(failing, chunked(b"abcd", &[4])).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_streaming_hash_matches_known_digest() -> anyhow::Result<()> {
        let digest = hash_stream(chunked(b"abc", &[1])).await?;
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_stream(chunked(b"abc", &[3])).await?, digest);

        Ok(())
    }

    #[tokio::test]
    async fn test_streaming_contents_equal_across_backends() -> anyhow::Result<()> {
        let left = MemoryBackend::with_files([("/f", "abc123"), ("/g", "same")]).await?;
        let right = MemoryBackend::with_files([("/f", "xyz123"), ("/g", "same")]).await?;

        assert!(!contents_equal(&left, &right, &"/f".into(), 2).await?);
        assert!(contents_equal(&left, &right, &"/g".into(), 2).await?);

        Ok(())
    }
}
