//! Digests and blob streams
//!
//! Blobs are streamed in fixed-size chunks so memory use does not depend on
//! file size. The same chunk loop hashes a file and, optionally, writes it
//! through the compressor into a revision folder.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use sha2::{Digest, Sha256};

/// Chunk size for streaming file contents
pub const BUFFER_SIZE: usize = 1024 * 1024;

/// Stable blob key for a relative path, independent of file content
pub fn hash_path(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hex::encode(hasher.finalize())
}

/// Digest of in-memory content
#[cfg(test)]
pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Hash a file's content, optionally copying it into `save_to` at the same time.
///
/// Zero-length files produce the empty-input digest and an empty blob file
/// without any compressor framing.
pub fn hash_file(path: &Path, compress: bool, save_to: Option<&Path>) -> Result<String> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file for hashing: {:?}", path))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);

    // created on the first chunk
    let mut writer: Option<BlobWriter> = None;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let read = read_chunk(&mut reader, &mut buffer)
            .with_context(|| format!("Failed to read {:?}", path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        if let Some(target) = save_to {
            if writer.is_none() {
                writer = Some(BlobWriter::create(target, compress)?);
            }
        }
        if let Some(ref mut w) = writer {
            w.write_all(&buffer[..read])
                .with_context(|| format!("Failed to write blob for {:?}", path))?;
        }
        if read < buffer.len() {
            break;
        }
    }

    match (writer, save_to) {
        (Some(w), _) => w
            .finish()
            .with_context(|| format!("Failed to finish blob for {:?}", path))?,
        (None, Some(target)) => {
            File::create(target)
                .with_context(|| format!("Failed to create blob file: {:?}", target))?;
        }
        (None, None) => {}
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Fill `buffer` as far as possible; a short count means end of input
fn read_chunk<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Writer over a plain or zlib-compressed blob file
pub enum BlobWriter {
    Plain(BufWriter<File>),
    Compressed(ZlibEncoder<BufWriter<File>>),
}

impl BlobWriter {
    pub fn create(path: &Path, compress: bool) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create blob file: {:?}", path))?;
        let buffered = BufWriter::with_capacity(BUFFER_SIZE, file);
        Ok(if compress {
            BlobWriter::Compressed(ZlibEncoder::new(buffered, Compression::default()))
        } else {
            BlobWriter::Plain(buffered)
        })
    }

    /// Flush everything, including the compressor trailer
    pub fn finish(self) -> io::Result<()> {
        let mut inner = match self {
            BlobWriter::Plain(w) => w,
            BlobWriter::Compressed(encoder) => encoder.finish()?,
        };
        inner.flush()
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BlobWriter::Plain(w) => w.write(buf),
            BlobWriter::Compressed(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BlobWriter::Plain(w) => w.flush(),
            BlobWriter::Compressed(w) => w.flush(),
        }
    }
}

/// Reader over a plain or zlib-compressed blob file
pub enum BlobReader {
    Plain(BufReader<File>),
    Compressed(ZlibDecoder<BufReader<File>>),
}

impl BlobReader {
    pub fn open(path: &Path, compress: bool) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open blob file: {:?}", path))?;
        let buffered = BufReader::with_capacity(BUFFER_SIZE, file);
        Ok(if compress {
            BlobReader::Compressed(ZlibDecoder::new(buffered))
        } else {
            BlobReader::Plain(buffered)
        })
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlobReader::Plain(r) => r.read(buf),
            BlobReader::Compressed(r) => r.read(buf),
        }
    }
}

/// Stream a blob's decoded content into `output` chunk by chunk
pub fn copy_blob<W: Write>(source: &Path, compress: bool, output: &mut W) -> Result<u64> {
    let stored = std::fs::metadata(source)
        .with_context(|| format!("Failed to stat blob file: {:?}", source))?;
    if stored.len() == 0 {
        return Ok(0);
    }
    let mut reader = BlobReader::open(source, compress)?;
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let read = read_chunk(&mut reader, &mut buffer)
            .with_context(|| format!("Failed to read blob {:?}", source))?;
        if read == 0 {
            break;
        }
        output.write_all(&buffer[..read])?;
        total += read as u64;
        if read < buffer.len() {
            break;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_hash_path_is_stable_and_content_independent() {
        assert_eq!(hash_path("dir/a.txt"), hash_path("dir/a.txt"));
        assert_ne!(hash_path("dir/a.txt"), hash_path("dir/b.txt"));
        assert_eq!(hash_path("dir/a.txt").len(), 64);
    }

    #[test]
    fn test_empty_file_digest() -> Result<()> {
        let temp = TempDir::new()?;
        let source = temp.path().join("empty.bin");
        std::fs::write(&source, b"")?;
        let blob = temp.path().join("blob");

        assert_eq!(hash_file(&source, true, Some(&blob))?, EMPTY_DIGEST);
        assert_eq!(hash_bytes(b""), EMPTY_DIGEST);
        assert_eq!(std::fs::metadata(&blob)?.len(), 0);

        let mut restored = Vec::new();
        assert_eq!(copy_blob(&blob, true, &mut restored)?, 0);
        Ok(())
    }

    #[test]
    fn test_hash_and_copy_roundtrip() -> Result<()> {
        let temp = TempDir::new()?;
        let source = temp.path().join("data.bin");
        // spans several chunks and ends with a partial one
        let content: Vec<u8> = (0..(BUFFER_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &content)?;

        for compress in [false, true] {
            let blob = temp.path().join(format!("blob-{}", compress));
            let digest = hash_file(&source, compress, Some(&blob))?;
            assert_eq!(digest, hash_bytes(&content));

            let mut restored = Vec::new();
            let copied = copy_blob(&blob, compress, &mut restored)?;
            assert_eq!(copied, content.len() as u64);
            assert_eq!(hash_bytes(&restored), digest);
        }
        Ok(())
    }

    #[test]
    fn test_unreadable_source_fails() {
        let temp = TempDir::new().unwrap();
        assert!(hash_file(&temp.path().join("missing"), false, None).is_err());
    }
}
