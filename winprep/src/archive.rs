//! Zip entry lookup by name suffix.
//!
//! Entries are matched against the end of their full path, so
//! `bosh-psmodules.zip` finds `StemcellAutomation/bosh-psmodules.zip`.
//! Exactly one entry must match.

use std::io::{Cursor, Read};

use zip::ZipArchive;

use crate::errors::{WinprepError, WinprepResult};

/// Upper bound on the buffer preallocated from an entry's declared size.
const MAX_PREALLOCATED_BYTES: u64 = 16 * 1024 * 1024;

/// Extracts a single named file from an in-memory archive.
pub trait Unarchiver: Send + Sync {
    fn unzip(&self, archive: &[u8], file_name: &str) -> WinprepResult<Vec<u8>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ZipUnarchiver;

impl Unarchiver for ZipUnarchiver {
    fn unzip(&self, archive: &[u8], file_name: &str) -> WinprepResult<Vec<u8>> {
        find_entry(archive, file_name)
    }
}

/// Return the contents of the only entry whose path ends with `suffix`.
pub fn find_entry(archive: &[u8], suffix: &str) -> WinprepResult<Vec<u8>> {
    if archive.is_empty() {
        return Err(WinprepError::InvalidArchive("archive is empty".into()));
    }

    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|e| WinprepError::InvalidArchive(e.to_string()))?;

    let matches: Vec<String> = zip
        .file_names()
        .filter(|name| name.ends_with(suffix))
        .map(str::to_string)
        .collect();

    let entry_name = match matches.as_slice() {
        [] => return Err(WinprepError::EntryNotFound(suffix.to_string())),
        [only] => only,
        many => {
            return Err(WinprepError::InvalidArchive(format!(
                "{} entries match {}: {}",
                many.len(),
                suffix,
                many.join(", ")
            )));
        }
    };

    let mut entry = zip
        .by_name(entry_name)
        .map_err(|e| WinprepError::InvalidArchive(format!("{}: {}", entry_name, e)))?;

    let mut contents = Vec::with_capacity(preallocation(entry.size()));
    entry
        .read_to_end(&mut contents)
        .map_err(|e| WinprepError::InvalidArchive(format!("{}: {}", entry_name, e)))?;

    tracing::trace!(entry = %entry_name, size = contents.len(), "Extracted archive entry");
    Ok(contents)
}

/// The header size is untrusted; never reserve more than the cap.
fn preallocation(declared: u64) -> usize {
    declared.min(MAX_PREALLOCATED_BYTES) as usize
}

#[cfg(test)]
pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_entry_by_suffix() {
        let zip = build_zip(&[
            ("StemcellAutomation/Setup.ps1", b"setup"),
            ("StemcellAutomation/bosh-psmodules.zip", b"modules"),
        ]);

        let data = find_entry(&zip, "bosh-psmodules.zip").unwrap();
        assert_eq!(data, b"modules");
    }

    #[test]
    fn test_nested_archive() {
        let inner = build_zip(&[("BOSH.WinRM/BOSH.WinRM.psm1", b"function Enable-WinRM {}")]);
        let outer = build_zip(&[("bosh-psmodules.zip", &inner)]);

        let modules = ZipUnarchiver.unzip(&outer, "bosh-psmodules.zip").unwrap();
        let script = ZipUnarchiver.unzip(&modules, "BOSH.WinRM.psm1").unwrap();
        assert_eq!(script, b"function Enable-WinRM {}");
    }

    #[test]
    fn test_missing_entry_names_it() {
        let zip = build_zip(&[("Setup.ps1", b"setup")]);

        let err = find_entry(&zip, "BOSH.WinRM.psm1").unwrap_err();
        assert!(matches!(err, WinprepError::EntryNotFound(_)));
        assert!(err.to_string().contains("BOSH.WinRM.psm1"));
    }

    #[test]
    fn test_invalid_archive_is_distinct_from_not_found() {
        let empty = find_entry(&[], "Setup.ps1").unwrap_err();
        assert!(matches!(empty, WinprepError::InvalidArchive(_)));

        let garbage = find_entry(b"this is not a zip file", "Setup.ps1").unwrap_err();
        assert!(matches!(garbage, WinprepError::InvalidArchive(_)));
        assert!(garbage.to_string().starts_with("invalid zip archive"));
    }

    #[test]
    fn test_ambiguous_suffix_rejected() {
        let zip = build_zip(&[("a/Setup.ps1", b"one"), ("b/Setup.ps1", b"two")]);

        let err = find_entry(&zip, "Setup.ps1").unwrap_err();
        assert!(matches!(err, WinprepError::InvalidArchive(_)));
    }

    #[test]
    fn test_declared_size_does_not_drive_allocation() {
        assert_eq!(preallocation(42), 42);
        assert_eq!(preallocation(u64::MAX), MAX_PREALLOCATED_BYTES as usize);
    }
}
