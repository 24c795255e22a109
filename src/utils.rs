// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use digest::DynDigest;

use crate::{Checksum, ChecksumType, CompressionType, MetadataError};

fn create_digest(checksum_type: ChecksumType) -> Box<dyn DynDigest> {
    match checksum_type {
        ChecksumType::Md5 => Box::new(md5::Md5::default()),
        ChecksumType::Sha1 => Box::new(sha1::Sha1::default()),
        ChecksumType::Sha256 => Box::new(sha2::Sha256::default()),
        ChecksumType::Sha512 => Box::new(sha2::Sha512::default()),
    }
}

fn wrap_digest(checksum_type: ChecksumType, digest: String) -> Checksum {
    match checksum_type {
        ChecksumType::Md5 => Checksum::Md5(digest),
        ChecksumType::Sha1 => Checksum::Sha1(digest),
        ChecksumType::Sha256 => Checksum::Sha256(digest),
        ChecksumType::Sha512 => Checksum::Sha512(digest),
    }
}

fn digest_reader(
    reader: &mut dyn Read,
    checksum_type: ChecksumType,
) -> Result<Checksum, MetadataError> {
    let mut hasher = create_digest(checksum_type);
    let mut buffer = [0; 8192];

    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    let digest = hex::encode(hasher.finalize());
    Ok(wrap_digest(checksum_type, digest))
}

/// Checksum of a file's bytes as stored on disk.
pub fn checksum_file(path: &Path, checksum_type: ChecksumType) -> Result<Checksum, MetadataError> {
    let mut reader = BufReader::new(File::open(path)?);
    digest_reader(&mut reader, checksum_type)
}

/// Checksum of the decompressed byte stream of a file, or `None` if the file is not compressed.
pub fn checksum_inner_file(
    path: &Path,
    checksum_type: ChecksumType,
) -> Result<Option<Checksum>, MetadataError> {
    let (mut reader, format) = niffler::from_path(path)?;

    if format == niffler::Format::No {
        return Ok(None);
    }

    Ok(Some(digest_reader(&mut reader, checksum_type)?))
}

/// Size of the decompressed byte stream of a file, or `None` if the file is not compressed.
pub fn size_inner_file(path: &Path) -> Result<Option<u64>, MetadataError> {
    let (reader, format) = niffler::from_path(path)?;

    let inner_size = match format {
        niffler::Format::No => None,
        _ => Some(reader.bytes().count() as u64),
    };

    Ok(inner_size)
}

pub fn apply_compression_suffix(path: &Path, compression: CompressionType) -> PathBuf {
    let extension = compression.to_file_extension();
    let mut filename = path.as_os_str().to_owned();
    filename.push(extension);
    PathBuf::from(&filename)
}

fn niffler_send_format(compression: CompressionType) -> niffler::send::compression::Format {
    match compression {
        CompressionType::None => niffler::send::compression::Format::No,
        CompressionType::Gzip => niffler::send::compression::Format::Gzip,
        CompressionType::Bz2 => niffler::send::compression::Format::Bzip,
        CompressionType::Xz => niffler::send::compression::Format::Lzma,
    }
}

/// Open a buffered, optionally-compressed writer at `path` + the compression suffix.
///
/// Returns the actual path created alongside the stream.
pub fn compressed_writer(
    path: &Path,
    compression: CompressionType,
) -> Result<(PathBuf, Box<dyn Write + Send>), MetadataError> {
    let filename = apply_compression_suffix(path, compression);
    let file: Box<dyn Write + Send> = Box::new(BufWriter::new(File::create(&filename)?));

    let inner_writer = match compression {
        CompressionType::None => file,
        _ => niffler::send::get_writer(file, niffler_send_format(compression), niffler::Level::Nine)?,
    };
    Ok((filename, inner_writer))
}

/// Compress `path` with `compression`, producing a sibling file with the compression suffix.
pub fn compress_file(
    path: &Path,
    compression: CompressionType,
) -> Result<PathBuf, MetadataError> {
    let mut reader = BufReader::new(File::open(path)?);
    let (compressed_path, mut writer) = compressed_writer(path, compression)?;
    std::io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    drop(writer); // the encoder finishes its stream on drop
    Ok(compressed_path)
}

pub(crate) fn configure_xml_reader<R: BufRead>(reader: &mut quick_xml::Reader<R>) {
    reader.expand_empty_elements(true).trim_text(true);
}

/// XML reader over a file which is transparently decompressed, whatever the compression.
pub fn xml_reader_from_file(
    path: &Path,
) -> Result<quick_xml::Reader<BufReader<Box<dyn Read + Send>>>, MetadataError> {
    let file: Box<dyn Read + Send> = Box::new(File::open(path)?);
    let (compression_wrapper_reader, _compression) = niffler::send::get_reader(file)?;
    let mut xml_reader = quick_xml::Reader::from_reader(BufReader::new(compression_wrapper_reader));
    configure_xml_reader(&mut xml_reader);
    Ok(xml_reader)
}

pub fn create_xml_reader<R: BufRead>(reader: R) -> quick_xml::Reader<R> {
    let mut xml_reader = quick_xml::Reader::from_reader(reader);
    configure_xml_reader(&mut xml_reader);
    xml_reader
}

/// XML writer to a file at `path` + the compression suffix.
pub fn xml_writer_for_path(
    path: &Path,
    compression: CompressionType,
) -> Result<(PathBuf, quick_xml::Writer<Box<dyn Write + Send>>), MetadataError> {
    let (filename, inner_writer) = compressed_writer(path, compression)?;
    let writer = quick_xml::Writer::new_with_indent(inner_writer, b' ', 2);
    Ok((filename, writer))
}

/// XML writer over an in-memory buffer, for serializing individual fragments.
pub fn create_xml_writer<W: Write>(writer: W) -> quick_xml::Writer<W> {
    quick_xml::Writer::new_with_indent(writer, b' ', 2)
}
