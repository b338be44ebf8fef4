//! Decompression of delimited-text files before parsing.
//!
//! Every codec decodes the whole file into memory; archives (`zip`, `tar`)
//! must hold exactly one member file.

use std::io::{Cursor, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Compression codec applied to a table file on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Zip,
    #[serde(alias = "gz")]
    Gzip,
    #[serde(alias = "bzip2")]
    Bz2,
    #[serde(alias = "zst")]
    Zstd,
    Xz,
    Tar,
    /// Pick the codec from the file extension; no match means plain text.
    Infer,
}

impl Compression {
    /// Lowercase name, as written in queue definitions.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Gzip => "gzip",
            Self::Bz2 => "bz2",
            Self::Zstd => "zstd",
            Self::Xz => "xz",
            Self::Tar => "tar",
            Self::Infer => "infer",
        }
    }

    /// Codec implied by a file extension, if any.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "zip" => Some(Self::Zip),
            "gz" | "gzip" => Some(Self::Gzip),
            "bz2" => Some(Self::Bz2),
            "zst" | "zstd" => Some(Self::Zstd),
            "xz" => Some(Self::Xz),
            "tar" => Some(Self::Tar),
            _ => None,
        }
    }

    /// Resolve `Infer` against a concrete path. `None` means read as-is.
    pub fn resolve(codec: Option<Self>, path: &Path) -> Option<Self> {
        match codec {
            Some(Self::Infer) => Self::from_path(path),
            other => other,
        }
    }
}

/// Decode `data` with `codec`; `None` returns the bytes unchanged.
pub fn decompress(
    file: &str,
    data: Vec<u8>,
    codec: Option<Compression>,
) -> Result<Vec<u8>, ParseError> {
    let Some(codec) = codec else {
        return Ok(data);
    };

    let failed = |message: String| ParseError::Decompress {
        file: file.to_string(),
        codec: codec.name(),
        message,
    };

    match codec {
        Compression::Gzip => read_all(flate2::read::MultiGzDecoder::new(data.as_slice()))
            .map_err(|e| failed(e.to_string())),
        Compression::Bz2 => read_all(bzip2::read::MultiBzDecoder::new(data.as_slice()))
            .map_err(|e| failed(e.to_string())),
        Compression::Xz => read_all(xz2::read::XzDecoder::new_multi_decoder(data.as_slice()))
            .map_err(|e| failed(e.to_string())),
        Compression::Zstd => {
            let decoder =
                zstd::Decoder::new(data.as_slice()).map_err(|e| failed(e.to_string()))?;
            read_all(decoder).map_err(|e| failed(e.to_string()))
        }
        Compression::Zip => unzip_single(data).map_err(failed),
        Compression::Tar => untar_single(data).map_err(failed),
        // Callers resolve `Infer` first; an unresolved one reads as plain text.
        Compression::Infer => Ok(data),
    }
}

fn read_all(mut reader: impl Read) -> std::io::Result<Vec<u8>> {
    let mut output = Vec::new();
    reader.read_to_end(&mut output)?;
    Ok(output)
}

fn unzip_single(data: Vec<u8>) -> Result<Vec<u8>, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(|e| e.to_string())?;

    let mut member = None;
    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(|e| e.to_string())?;
        if entry.is_dir() {
            continue;
        }
        if member.is_some() {
            return Err("multiple files found in zip archive".to_string());
        }
        member = Some(index);
    }

    let index = member.ok_or_else(|| "zip archive contains no files".to_string())?;
    let entry = archive.by_index(index).map_err(|e| e.to_string())?;
    read_all(entry).map_err(|e| e.to_string())
}

fn untar_single(data: Vec<u8>) -> Result<Vec<u8>, String> {
    let mut archive = tar::Archive::new(data.as_slice());
    let mut contents: Option<Vec<u8>> = None;

    for entry in archive.entries().map_err(|e| e.to_string())? {
        let entry = entry.map_err(|e| e.to_string())?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        if contents.is_some() {
            return Err("multiple files found in tar archive".to_string());
        }
        contents = Some(read_all(entry).map_err(|e| e.to_string())?);
    }

    contents.ok_or_else(|| "tar archive contains no files".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn infers_codec_from_extension() {
        assert_eq!(
            Compression::from_path(Path::new("VYNT0.csv.gz")),
            Some(Compression::Gzip)
        );
        assert_eq!(
            Compression::from_path(Path::new("dump.CSV.BZ2")),
            Some(Compression::Bz2)
        );
        assert_eq!(Compression::from_path(Path::new("plain.csv")), None);
        assert_eq!(
            Compression::resolve(Some(Compression::Infer), Path::new("a.zst")),
            Some(Compression::Zstd)
        );
        assert_eq!(
            Compression::resolve(Some(Compression::Xz), Path::new("a.csv")),
            Some(Compression::Xz)
        );
    }

    #[test]
    fn gzip_decodes_to_original_text() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"a,b\n1,2\n").unwrap();
        let compressed = encoder.finish().unwrap();

        let decoded = decompress("t.csv.gz", compressed, Some(Compression::Gzip)).unwrap();
        assert_eq!(decoded, b"a,b\n1,2\n");
    }

    #[test]
    fn zip_with_two_members_is_rejected() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::FileOptions::default();
            writer.start_file("one.csv", options).unwrap();
            writer.write_all(b"a\n1\n").unwrap();
            writer.start_file("two.csv", options).unwrap();
            writer.write_all(b"a\n2\n").unwrap();
            writer.finish().unwrap();
        }

        let err = decompress("t.zip", buffer.into_inner(), Some(Compression::Zip)).unwrap_err();
        assert!(err.to_string().contains("multiple files"));
    }

    const TEXT: &[u8] = b"station,tavg\nVYNT0,3.1\nVYNT0,2.5\n";

    fn tar_of(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, contents) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn bz2_decodes_to_original_text() {
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(TEXT).unwrap();
        let compressed = encoder.finish().unwrap();

        let decoded = decompress("t.csv.bz2", compressed, Some(Compression::Bz2)).unwrap();
        assert_eq!(decoded, TEXT);
    }

    #[test]
    fn zstd_decodes_to_original_text() {
        let compressed = zstd::encode_all(TEXT, 3).unwrap();

        let decoded = decompress("t.csv.zst", compressed, Some(Compression::Zstd)).unwrap();
        assert_eq!(decoded, TEXT);
    }

    #[test]
    fn xz_decodes_to_original_text() {
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(TEXT).unwrap();
        let compressed = encoder.finish().unwrap();

        let decoded = decompress("t.csv.xz", compressed, Some(Compression::Xz)).unwrap();
        assert_eq!(decoded, TEXT);
    }

    #[test]
    fn single_member_zip_yields_its_file() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer.add_directory("data/", zip::write::FileOptions::default()).unwrap();
            writer
                .start_file("data/daily.csv", zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(TEXT).unwrap();
            writer.finish().unwrap();
        }

        let decoded = decompress("t.zip", buffer.into_inner(), Some(Compression::Zip)).unwrap();
        assert_eq!(decoded, TEXT);
    }

    #[test]
    fn single_member_tar_yields_its_file() {
        let archive = tar_of(&[("daily.csv", TEXT)]);

        let decoded = decompress("t.tar", archive, Some(Compression::Tar)).unwrap();
        assert_eq!(decoded, TEXT);
    }

    #[test]
    fn tar_with_two_members_is_rejected() {
        let archive = tar_of(&[("one.csv", &b"a\n1\n"[..]), ("two.csv", &b"a\n2\n"[..])]);

        let err = decompress("t.tar", archive, Some(Compression::Tar)).unwrap_err();
        assert!(matches!(err, ParseError::Decompress { codec: "tar", .. }));
        assert!(err.to_string().contains("multiple files"));
    }

    #[test]
    fn garbage_gzip_reports_codec() {
        let err = decompress("bad.gz", b"not gzip".to_vec(), Some(Compression::Gzip)).unwrap_err();
        assert!(matches!(err, ParseError::Decompress { codec: "gzip", .. }));
    }
}
