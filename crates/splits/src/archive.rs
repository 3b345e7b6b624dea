//! Deterministic tar archives.
//!
//! Entries are written sorted by name with zeroed timestamps and ownership,
//! so the same inputs always produce the same bytes.

use crate::error::{SplitError, SplitResult};
use bytes::Bytes;
use splitstore_core::{SplitApk, SplitSet};
use std::io::{Cursor, Read};

/// Content type of split archives.
pub const CONTENT_TYPE: &str = "application/x-tar";

const ENTRY_MODE: u32 = 0o644;

/// Pack named entries into a tar archive, sorted by name.
pub fn pack<'a>(entries: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> SplitResult<Bytes> {
    let mut entries: Vec<_> = entries.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    if let Some(dup) = entries.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(SplitError::Archive(format!("duplicate entry {}", dup[0].0)));
    }

    let mut builder = tar::Builder::new(Vec::new());
    builder.mode(tar::HeaderMode::Deterministic);
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(ENTRY_MODE);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder.append_data(&mut header, name, data)?;
    }
    Ok(Bytes::from(builder.into_inner()?))
}

/// Read every regular file entry of a tar archive.
///
/// Rejects absolute paths and `..` components.
pub fn unpack(archive: &[u8]) -> SplitResult<Vec<(String, Bytes)>> {
    let mut reader = tar::Archive::new(Cursor::new(archive));
    let mut out = Vec::new();

    for entry in reader.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();
        if kind.is_dir() {
            continue;
        }
        if !kind.is_file() {
            return Err(SplitError::Archive(format!(
                "unsupported entry type {kind:?}"
            )));
        }

        let path = entry.path()?;
        let name = path
            .to_str()
            .ok_or_else(|| SplitError::Archive("entry name is not UTF-8".to_string()))?
            .trim_start_matches("./")
            .to_string();
        if name.starts_with('/') || name.split('/').any(|c| c == "..") {
            return Err(SplitError::Archive(format!("unsafe entry path {name}")));
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        out.push((name, Bytes::from(data)));
    }

    Ok(out)
}

/// Archive a split set as the download response body.
pub fn pack_split_set(set: &SplitSet) -> SplitResult<Bytes> {
    pack(set.apks().iter().map(|apk| (apk.name.as_str(), apk.data.as_ref())))
}

/// Parse an archive written by [`pack_split_set`].
pub fn unpack_split_set(archive: &[u8]) -> SplitResult<SplitSet> {
    let apks = unpack(archive)?
        .into_iter()
        .map(|(name, data)| SplitApk::new(name, data))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SplitError::Archive(e.to_string()))?;
    SplitSet::new(apks).map_err(|e| SplitError::Archive(e.to_string()))
}
