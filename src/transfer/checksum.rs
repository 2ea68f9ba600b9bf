use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Hex digests of one piece of content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checksums {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

struct Hashers {
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
}

impl Hashers {
    fn new() -> Self {
        Self { md5: Md5::new(), sha1: Sha1::new(), sha256: Sha256::new() }
    }

    fn update(&mut self, chunk: &[u8]) {
        self.md5.update(chunk);
        self.sha1.update(chunk);
        self.sha256.update(chunk);
    }

    fn finish(self) -> Checksums {
        Checksums {
            md5: hex::encode(self.md5.finalize()),
            sha1: hex::encode(self.sha1.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
        }
    }
}

/// Stream a local file once through all three digests.
pub fn file_checksums(path: &Path) -> Result<Checksums> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::with_capacity(1024 * 1024, f);
    let mut buf = vec![0u8; 64 * 1024];
    let mut h = Hashers::new();
    loop {
        let n = reader.read(&mut buf).with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
    }
    Ok(h.finish())
}

pub fn bytes_checksums(data: &[u8]) -> Checksums {
    let mut h = Hashers::new();
    h.update(data);
    h.finish()
}

/// A local file is fresh when it exists and both MD5 and SHA1 equal the
/// remote values. Missing remote checksums never count as a match.
pub fn is_local_fresh(path: &Path, md5: &str, sha1: &str) -> Result<bool> {
    if md5.is_empty() || sha1.is_empty() || !path.is_file() {
        return Ok(false);
    }
    let local = file_checksums(path)?;
    Ok(local.md5.eq_ignore_ascii_case(md5) && local.sha1.eq_ignore_ascii_case(sha1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digests() {
        let c = bytes_checksums(b"abc");
        assert_eq!(c.md5, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(c.sha1, "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(c.sha256, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test]
    fn file_matches_bytes_and_freshness() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&p, &data).unwrap();
        let c = file_checksums(&p).unwrap();
        assert_eq!(c, bytes_checksums(&data));

        assert!(is_local_fresh(&p, &c.md5, &c.sha1).unwrap());
        assert!(!is_local_fresh(&p, &c.md5, "00").unwrap());
        assert!(!is_local_fresh(&p, "", "").unwrap());
        assert!(!is_local_fresh(&dir.path().join("missing"), &c.md5, &c.sha1).unwrap());
    }
}
