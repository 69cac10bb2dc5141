//! Per-batch file snapshots of the config and catalog YAML.
//!
//! A database backup captures player rows; this captures the files that
//! give those rows meaning (config, quest catalog, reward catalog), so a
//! season can be reconstructed even after a bad catalog edit. Cheap,
//! bounded retention (keep-N), best-effort.

use std::io;
use std::path::{Path, PathBuf};

use questline_types::BatchId;

/// Directory name for one batch's files.
fn batch_dir(backups_dir: &Path, batch_id: BatchId) -> PathBuf {
    backups_dir.join(format!("batch-{batch_id}"))
}

/// Snapshot the given files into `backups_dir/batch-<id>/`, then prune
/// old snapshots down to `keep` (0 = unlimited).
///
/// Missing source files are skipped silently -- a fresh install has no
/// catalogs yet, and that is not an error.
pub(crate) fn snapshot_batch_files(
    backups_dir: &Path,
    batch_id: BatchId,
    files: &[&Path],
    keep: usize,
) -> io::Result<PathBuf> {
    let dir = batch_dir(backups_dir, batch_id);
    std::fs::create_dir_all(&dir)?;

    for source in files {
        if !source.exists() {
            continue;
        }
        if let Some(name) = source.file_name() {
            std::fs::copy(source, dir.join(name))?;
        }
    }

    prune_old_batches(backups_dir, keep);
    Ok(dir)
}

/// Restore files from `backups_dir/batch-<id>/` over the given targets.
///
/// Each file is restored atomically (copy to a temp sibling, then rename
/// over the target) so a crash never leaves half-written YAML. Targets
/// with no snapshot counterpart are left untouched.
///
/// # Errors
///
/// Returns [`io::ErrorKind::NotFound`] when the batch has no file
/// snapshot at all.
pub(crate) fn restore_batch_files(
    backups_dir: &Path,
    batch_id: BatchId,
    targets: &[&Path],
) -> io::Result<()> {
    let dir = batch_dir(backups_dir, batch_id);
    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no file snapshot for batch {batch_id}"),
        ));
    }

    for target in targets {
        let Some(name) = target.file_name() else {
            continue;
        };
        let source = dir.join(name);
        if !source.exists() {
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = target.with_extension("restore.tmp");
        std::fs::copy(&source, &tmp)?;
        std::fs::rename(&tmp, target)?;
    }
    Ok(())
}

/// Whether a file snapshot exists for the batch.
pub(crate) fn has_batch_files(backups_dir: &Path, batch_id: BatchId) -> bool {
    batch_dir(backups_dir, batch_id).is_dir()
}

/// Delete the oldest `batch-*` directories beyond `keep`.
fn prune_old_batches(backups_dir: &Path, keep: usize) {
    if keep == 0 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(backups_dir) else {
        return;
    };

    let mut batches: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("batch-"))
        })
        .collect();

    if batches.len() <= keep {
        return;
    }

    // Batch ids are time-ordered, so the directory name sorts newest last.
    batches.sort();
    let excess = batches.len().saturating_sub(keep);
    for old in batches.iter().take(excess) {
        if let Err(e) = std::fs::remove_dir_all(old) {
            tracing::warn!(path = %old.display(), error = %e, "Batch snapshot prune failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("questline-batch-files")
            .join(format!("{tag}-{}", questline_types::PlayerId::new()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn snapshot_and_restore_roundtrip() {
        let root = temp_dir("roundtrip");
        let config = root.join("questline.yaml");
        std::fs::write(&config, "season:\n  current: 3\n").unwrap();

        let backups = root.join("backups");
        let batch = BatchId::from_raw(1234);
        let dir = snapshot_batch_files(&backups, batch, &[&config], 10).unwrap();
        assert!(dir.join("questline.yaml").exists());
        assert!(has_batch_files(&backups, batch));

        // Corrupt the live file, then restore.
        std::fs::write(&config, "broken: [").unwrap();
        restore_batch_files(&backups, batch, &[&config]).unwrap();
        let restored = std::fs::read_to_string(&config).unwrap();
        assert!(restored.contains("current: 3"));
    }

    #[test]
    fn restore_of_unknown_batch_is_not_found() {
        let root = temp_dir("unknown");
        let backups = root.join("backups");
        let target = root.join("questline.yaml");
        let err = restore_batch_files(&backups, BatchId::from_raw(9), &[&target]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn prune_keeps_newest_batches() {
        let root = temp_dir("prune");
        let backups = root.join("backups");
        let file = root.join("questline.yaml");
        std::fs::write(&file, "x: 1\n").unwrap();

        for raw in 1..=5_i64 {
            let _ = snapshot_batch_files(&backups, BatchId::from_raw(raw), &[&file], 3).unwrap();
        }

        assert!(!has_batch_files(&backups, BatchId::from_raw(1)));
        assert!(!has_batch_files(&backups, BatchId::from_raw(2)));
        assert!(has_batch_files(&backups, BatchId::from_raw(3)));
        assert!(has_batch_files(&backups, BatchId::from_raw(5)));
    }

    #[test]
    fn missing_sources_are_skipped() {
        let root = temp_dir("missing");
        let backups = root.join("backups");
        let ghost = root.join("nope.yaml");
        let dir =
            snapshot_batch_files(&backups, BatchId::from_raw(7), &[&ghost], 0).unwrap();
        assert!(!dir.join("nope.yaml").exists());
    }
}
