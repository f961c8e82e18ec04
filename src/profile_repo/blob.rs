// At-rest encoding for profile bytes. [version: u8][payload].
// Version 1 = gzip-compressed payload; anything else is read back verbatim
// so rows written before versioning stay readable.

use std::io::{Read, Write};

use anyhow::Context;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

pub(super) const BLOB_VERSION_GZIP: u8 = 1;

pub(super) fn compress(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2 + 1);
    out.push(BLOB_VERSION_GZIP);
    let mut encoder = GzEncoder::new(&mut out, Compression::default());
    encoder.write_all(data).context("gzip write")?;
    encoder.finish().context("gzip finish")?;
    Ok(out)
}

pub(super) fn decompress(blob: &[u8]) -> anyhow::Result<Vec<u8>> {
    match blob.first() {
        Some(&BLOB_VERSION_GZIP) => {
            let mut out = Vec::new();
            GzDecoder::new(&blob[1..])
                .read_to_end(&mut out)
                .context("gzip decode")?;
            Ok(out)
        }
        _ => Ok(blob.to_vec()),
    }
}
