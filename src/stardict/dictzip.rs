//! Random-access reader for dictzip (`.dict.dz`) article files.
//!
//! Dictzip is ordinary gzip whose deflate stream was flushed at fixed
//! intervals, with a chunk table stored in the gzip `FEXTRA` field (subfield
//! id `RA`). Because every chunk starts at a flush boundary it can be
//! inflated on its own, which is what makes byte-range reads possible.
//!
//! `RA` subfield layout, all little-endian:
//! - 2 bytes: version (must be 1)
//! - 2 bytes: uncompressed chunk length
//! - 2 bytes: chunk count
//! - 2 bytes per chunk: compressed chunk size

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::{Decompress, FlushDecompress, Status};
use log::{debug, trace};

use super::error::{DictError, Result};

const GZ_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZ_METHOD_DEFLATE: u8 = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;

/// An open `.dict.dz` file with its chunk table decoded.
pub struct DictZip {
    file: File,
    chunk_len: usize,
    /// Absolute file offset of each compressed chunk, plus a trailing
    /// end-of-last-chunk sentinel.
    chunk_offsets: Vec<u64>,
    inflater: Decompress,
}

impl DictZip {
    pub fn open(path: &Path) -> Result<DictZip> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 2];
        file.read_exact(&mut magic)?;
        if magic != GZ_MAGIC {
            return Err(DictError::Decompression(format!(
                "{}: not a gzip file",
                path.display()
            )));
        }
        let method = file.read_u8()?;
        if method != GZ_METHOD_DEFLATE {
            return Err(DictError::Decompression(format!(
                "{}: unsupported gzip method {}",
                path.display(),
                method
            )));
        }
        let flags = file.read_u8()?;
        let mut rest_of_header = [0u8; 6]; // mtime, xfl, os
        file.read_exact(&mut rest_of_header)?;

        if flags & FEXTRA == 0 {
            return Err(DictError::Decompression(format!(
                "{}: no random-access chunk table (plain gzip?)",
                path.display()
            )));
        }
        let xlen = file.read_u16::<LittleEndian>()? as usize;
        let mut extra = vec![0u8; xlen];
        file.read_exact(&mut extra)?;
        let (chunk_len, chunk_sizes) = parse_ra_subfield(&extra, path)?;

        if flags & FNAME != 0 {
            skip_zero_terminated(&mut file)?;
        }
        if flags & FCOMMENT != 0 {
            skip_zero_terminated(&mut file)?;
        }
        if flags & FHCRC != 0 {
            let mut crc = [0u8; 2];
            file.read_exact(&mut crc)?;
        }

        let data_start = file.stream_position()?;
        let mut chunk_offsets = Vec::with_capacity(chunk_sizes.len() + 1);
        let mut off = data_start;
        chunk_offsets.push(off);
        for &size in &chunk_sizes {
            off += u64::from(size);
            chunk_offsets.push(off);
        }

        debug!(
            "{}: dictzip with {} chunks of {} bytes",
            path.display(),
            chunk_sizes.len(),
            chunk_len
        );

        Ok(DictZip {
            file,
            chunk_len,
            chunk_offsets,
            inflater: Decompress::new(false),
        })
    }

    /// Fill `dst` with the uncompressed bytes at `offset`.
    pub fn read(&mut self, dst: &mut [u8], offset: u64) -> Result<()> {
        if dst.is_empty() {
            return Ok(());
        }
        let chunk_len = self.chunk_len as u64;
        let first = (offset / chunk_len) as usize;
        let last = ((offset + dst.len() as u64 - 1) / chunk_len) as usize;
        if last + 1 >= self.chunk_offsets.len() {
            return Err(DictError::Decompression(
                "byte range past end of dictzip chunk table".to_string(),
            ));
        }

        trace!(
            "dictzip read: offset={}, len={}, chunks {}..={}",
            offset,
            dst.len(),
            first,
            last
        );

        let mut compressed = Vec::new();
        let mut inflated = Vec::with_capacity(self.chunk_len);
        let mut written = 0usize;
        for chunk in first..=last {
            let comp_start = self.chunk_offsets[chunk];
            let comp_size = (self.chunk_offsets[chunk + 1] - comp_start) as usize;
            compressed.resize(comp_size, 0);
            self.file.seek(SeekFrom::Start(comp_start))?;
            self.file.read_exact(&mut compressed)?;

            inflated.clear();
            self.inflate_chunk(&compressed, &mut inflated)?;

            let chunk_base = chunk as u64 * chunk_len;
            let start = if chunk == first {
                (offset - chunk_base) as usize
            } else {
                0
            };
            let avail = inflated.len().saturating_sub(start);
            let take = avail.min(dst.len() - written);
            if take == 0 {
                return Err(DictError::Decompression(
                    "dictzip chunk shorter than expected".to_string(),
                ));
            }
            dst[written..written + take].copy_from_slice(&inflated[start..start + take]);
            written += take;
        }
        if written != dst.len() {
            return Err(DictError::Decompression(format!(
                "short dictzip read: wanted {} bytes, got {}",
                dst.len(),
                written
            )));
        }
        Ok(())
    }

    /// Inflate one raw-deflate chunk. Chunks end at a flush boundary rather
    /// than a stream end, so running out of input is a normal exit.
    fn inflate_chunk(&mut self, compressed: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.inflater.reset(false);
        loop {
            let consumed = self.inflater.total_in() as usize;
            if out.capacity() == out.len() {
                out.reserve(self.chunk_len.max(64));
            }
            let status = self
                .inflater
                .decompress_vec(&compressed[consumed..], out, FlushDecompress::Sync)
                .map_err(|e| DictError::Decompression(format!("dictzip inflate: {}", e)))?;
            if status == Status::StreamEnd || self.inflater.total_in() as usize >= compressed.len() {
                return Ok(());
            }
            if status == Status::BufError && out.capacity() > out.len() {
                return Err(DictError::Decompression(
                    "dictzip chunk is truncated".to_string(),
                ));
            }
        }
    }
}

fn parse_ra_subfield(extra: &[u8], path: &Path) -> Result<(usize, Vec<u16>)> {
    let mut i = 0usize;
    while i + 4 <= extra.len() {
        let id = [extra[i], extra[i + 1]];
        let sublen = u16::from_le_bytes([extra[i + 2], extra[i + 3]]) as usize;
        i += 4;
        if i + sublen > extra.len() {
            break;
        }
        if id == [b'R', b'A'] {
            let sub = &extra[i..i + sublen];
            if sub.len() < 6 {
                return Err(DictError::Decompression(format!(
                    "{}: truncated RA subfield",
                    path.display()
                )));
            }
            let version = u16::from_le_bytes([sub[0], sub[1]]);
            if version != 1 {
                return Err(DictError::Decompression(format!(
                    "{}: unsupported dictzip version {}",
                    path.display(),
                    version
                )));
            }
            let chunk_len = u16::from_le_bytes([sub[2], sub[3]]) as usize;
            let chunk_count = u16::from_le_bytes([sub[4], sub[5]]) as usize;
            if chunk_len == 0 || sub.len() < 6 + 2 * chunk_count {
                return Err(DictError::Decompression(format!(
                    "{}: malformed dictzip chunk table",
                    path.display()
                )));
            }
            let sizes = sub[6..6 + 2 * chunk_count]
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            return Ok((chunk_len, sizes));
        }
        i += sublen;
    }
    Err(DictError::Decompression(format!(
        "{}: no RA subfield in gzip header",
        path.display()
    )))
}

fn skip_zero_terminated(file: &mut File) -> Result<()> {
    loop {
        let byte = file.read_u8()?;
        if byte == 0 {
            return Ok(());
        }
    }
}
