//! Idempotent, crash-safe destination updates.
//!
//! A pipeline's rendered output either replaces its destination file
//! atomically or goes to stdout. The on-disk flow is: create a missing
//! destination first so a mode/ownership baseline exists, compare new
//! bytes against the current content, and only on a difference write a
//! temp file in the destination's directory, copy mode and ownership
//! onto it and rename it into place. Readers never observe partial
//! content, and an unchanged render performs no write at all.

use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use tracing::debug;

use crate::error::FleetgenError;

/// Writes `content` to `dest`, returning whether the destination
/// changed. `None` means stdout, which always counts as changed.
pub fn write_output(dest: Option<&Path>, content: &str) -> Result<bool, FleetgenError> {
    let Some(dest) = dest else {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(content.as_bytes())?;
        stdout.flush()?;
        return Ok(true);
    };

    if !dest.exists() {
        std::fs::File::create(dest)?;
        debug!(dest = %dest.display(), "created missing destination");
    }

    let existing = std::fs::read(dest)?;
    if existing == content.as_bytes() {
        return Ok(false);
    }

    let metadata = std::fs::metadata(dest)?;
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content.as_bytes())?;
    temp.flush()?;

    std::fs::set_permissions(temp.path(), metadata.permissions())?;
    std::os::unix::fs::chown(temp.path(), Some(metadata.uid()), Some(metadata.gid()))?;

    temp.persist(dest).map_err(|e| FleetgenError::Io(e.error))?;
    debug!(dest = %dest.display(), bytes = content.len(), "destination replaced");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn creates_missing_destination_and_reports_change() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.conf");

        let changed = write_output(Some(&dest), "server a;\n").unwrap();
        assert!(changed);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "server a;\n");
    }

    #[test]
    fn identical_content_reports_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.conf");
        std::fs::write(&dest, "same\n").unwrap();

        let changed = write_output(Some(&dest), "same\n").unwrap();
        assert!(!changed);
    }

    #[test]
    fn replacement_preserves_mode() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.conf");
        std::fs::write(&dest, "old\n").unwrap();
        std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o600)).unwrap();

        let changed = write_output(Some(&dest), "new\n").unwrap();
        assert!(changed);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new\n");

        let mode = std::fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn empty_render_matches_created_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.conf");

        // The missing destination is created empty before comparing, so
        // an empty render matches it.
        assert!(!write_output(Some(&dest), "").unwrap());
        assert!(dest.exists());
    }

    #[test]
    fn stdout_always_reports_changed() {
        assert!(write_output(None, "").unwrap());
    }
}
