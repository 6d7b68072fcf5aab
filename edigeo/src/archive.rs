//! Sheet archive decompression and member classification.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;
use log::debug;
use tar::Archive;

use crate::{Error, Result};

/// The role-tagged text members of one sheet archive.
///
/// EDIGEO files are ISO 8859-1; members are transcoded on extraction so
/// downstream parsing works on `&str`.
#[derive(Debug, Default)]
pub struct SheetBundle {
    pub thf: String,
    pub scd: String,
    pub geo: String,
    pub qal: Option<String>,
    /// `(member name, content)` for each vector file, in archive order
    pub vec: Vec<(String, String)>,
}

impl SheetBundle {
    /// Read a `.tar.bz2` sheet archive from disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Read a tar.bz2 stream. Members are classified by filename extension,
    /// case-insensitively; anything that is not THF/SCD/GEO/QAL/VEC is
    /// ignored. Absent THF, SCD or GEO is fatal; a sheet without VEC
    /// members decodes to an empty feature set.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut bundle = Self::default();
        let mut archive = Archive::new(BzDecoder::new(reader));
        for entry in archive.entries()? {
            let mut entry = entry?;
            let Some(name) = entry.path()?.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                continue;
            };
            let Some(ext) = name.rsplit_once('.').map(|(_, e)| e.to_ascii_uppercase()) else {
                debug!("skipping archive member without extension: {name}");
                continue;
            };
            match ext.as_str() {
                "THF" => bundle.thf = read_latin1(&mut entry)?,
                "SCD" => bundle.scd = read_latin1(&mut entry)?,
                "GEO" => bundle.geo = read_latin1(&mut entry)?,
                "QAL" => bundle.qal = Some(read_latin1(&mut entry)?),
                "VEC" => {
                    let content = read_latin1(&mut entry)?;
                    bundle.vec.push((name, content));
                }
                _ => debug!("skipping archive member: {name}"),
            }
        }
        if bundle.thf.is_empty() {
            return Err(Error::MissingMember("THF"));
        }
        if bundle.scd.is_empty() {
            return Err(Error::MissingMember("SCD"));
        }
        if bundle.geo.is_empty() {
            return Err(Error::MissingMember("GEO"));
        }
        Ok(bundle)
    }
}

fn read_latin1<R: Read>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    // ISO 8859-1 maps bytes to the first 256 code points one-to-one.
    Ok(bytes.iter().map(|&b| b as char).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tar_bz2(members: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(bzip2::write::BzEncoder::new(
            Vec::new(),
            bzip2::Compression::fast(),
        ));
        for (name, content) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_cksum();
            builder.append_data(&mut header, name, content.as_bytes()).unwrap();
        }
        let mut encoder = builder.into_inner().unwrap();
        encoder.flush().unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn classifies_members_case_insensitively() {
        let data = tar_bz2(&[
            ("E0001.thf", "THFSA01:1\n"),
            ("E0001.SCD", "RTYSA03:OBJ\n"),
            ("E0001.Geo", "RELSA06:LAMB93\n"),
            ("E0001.QAL", "RTYSA03:QAL\n"),
            ("E0001T1.VEC", "RTYSA03:PNO\n"),
            ("readme.txt", "ignored"),
        ]);
        let bundle = SheetBundle::from_reader(&data[..]).unwrap();
        assert_eq!(bundle.thf, "THFSA01:1\n");
        assert!(bundle.qal.is_some());
        assert_eq!(bundle.vec.len(), 1);
        assert_eq!(bundle.vec[0].0, "E0001T1.VEC");
    }

    #[test]
    fn missing_geo_is_fatal() {
        let data = tar_bz2(&[("a.THF", "x"), ("a.SCD", "x")]);
        assert!(matches!(
            SheetBundle::from_reader(&data[..]),
            Err(Error::MissingMember("GEO"))
        ));
    }

    #[test]
    fn missing_vec_is_not_fatal() {
        let data = tar_bz2(&[("a.THF", "x"), ("a.SCD", "x"), ("a.GEO", "x")]);
        let bundle = SheetBundle::from_reader(&data[..]).unwrap();
        assert!(bundle.vec.is_empty());
    }
}
