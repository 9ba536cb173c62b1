//! The 9-step crash-recovery protocol, run once at index open before any
//! reader or writer is admitted.
//!
//! Only steps 1-4 can fail the open: they select the newest generation
//! whose manifest parses and whose segments are intact, descending to
//! earlier generations on corruption. Steps 5-8 are cleanup; their
//! failures are logged and surfaced as part of the result, not as errors.

use tracing::{error, info, warn};

use crate::error::{Result, ScourError};
use crate::index::directory::IndexDir;
use crate::index::generation::{
    load_manifest, load_manifest_with_fallback, read_current_generation, write_current_generation,
};
use crate::index::manifest::Manifest;
use crate::storage;

/// Configuration for crash recovery.
#[derive(Clone, Debug)]
pub struct RecoveryOptions {
    /// How many predecessor manifests to keep besides the active one.
    pub manifest_retention: usize,
    /// Whether to verify every segment file's checksum during step 3.
    pub verify_segment_checksums: bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            manifest_retention: 2,
            verify_segment_checksums: true,
        }
    }
}

/// The outcome of crash recovery.
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Recovered generation (0 for an empty index).
    pub generation: u64,
    /// Validated manifest for the recovered generation; `None` iff
    /// `generation` is 0.
    pub manifest: Option<Manifest>,
    /// Segment ids removed as orphans.
    pub orphans_removed: Vec<String>,
    /// Manifest generations pruned by retention.
    pub manifests_removed: Vec<u64>,
    /// Paths removed from tmp/.
    pub tmp_files_removed: Vec<std::path::PathBuf>,
    /// True if recovery fell back to an earlier manifest.
    pub fell_back: bool,
    /// The corrupt generation fallen back from (set only if `fell_back`).
    pub fell_back_from: u64,
}

/// Execute the 9-step crash recovery protocol.
pub fn recover(dir: &IndexDir, opts: &RecoveryOptions) -> Result<RecoveryResult> {
    let mut result = RecoveryResult::default();

    // Step 1: read current generation.
    let mut generation = read_current_generation(dir)?;
    info!(generation, "recovery step 1: read generation");

    // Generation 0: empty index. Steps 2-4 have nothing to validate, but
    // the cleanup steps still run so a crash during the very first commit
    // leaves no scratch or orphan state behind.
    if generation == 0 {
        info!("recovery: empty index (generation 0)");
        let empty = Manifest::empty();
        result.tmp_files_removed = step5_clean_tmp(dir);
        let orphans = step6_identify_orphans(dir, &empty);
        if !orphans.is_empty() {
            step7_clean_orphans(dir, &orphans);
            result.orphans_removed = orphans;
        }
        result.manifests_removed = step8_prune_manifests(dir, opts.manifest_retention);
        return Ok(result);
    }

    // Step 2: load manifest, descending on corruption.
    info!(generation, "recovery step 2: load manifest");
    let (mut manifest, actual_gen) = load_manifest_with_fallback(dir, generation)?;
    if actual_gen != generation {
        result.fell_back = true;
        result.fell_back_from = generation;
        generation = actual_gen;
    }

    // Step 3: verify segments.
    let corrupt = step3_verify_segments(dir, &manifest, opts.verify_segment_checksums);

    // Step 4: handle corrupt segments by descending further.
    if !corrupt.is_empty() {
        let prev_gen = generation;
        let (recovered_manifest, recovered_gen) =
            step4_handle_corrupt_segments(dir, generation, opts.verify_segment_checksums)?;
        manifest = recovered_manifest;
        generation = recovered_gen;
        result.fell_back = true;
        if result.fell_back_from == 0 {
            result.fell_back_from = prev_gen;
        }

        // Point manifest.current at the recovered generation so the next
        // startup goes straight there.
        write_current_generation(dir, generation)?;
        info!(generation, "recovery step 4: updated manifest.current");
    }

    // Step 5: clean tmp/.
    result.tmp_files_removed = step5_clean_tmp(dir);

    // Step 6: identify orphans.
    let orphans = step6_identify_orphans(dir, &manifest);

    // Step 7: clean orphans.
    if !orphans.is_empty() {
        step7_clean_orphans(dir, &orphans);
        result.orphans_removed = orphans;
    }

    // Step 8: prune old manifests.
    result.manifests_removed = step8_prune_manifests(dir, opts.manifest_retention);

    // Step 9: finalize.
    info!(
        generation,
        segments = manifest.segments.len(),
        orphans_removed = result.orphans_removed.len(),
        manifests_removed = result.manifests_removed.len(),
        fell_back = result.fell_back,
        "recovery complete"
    );
    result.generation = generation;
    result.manifest = Some(manifest);
    Ok(result)
}

/// Returns the ids of segments that are missing or fail checksum
/// verification.
fn step3_verify_segments(dir: &IndexDir, manifest: &Manifest, verify_checksums: bool) -> Vec<String> {
    info!(
        count = manifest.segments.len(),
        verify_checksums, "recovery step 3: verify segments"
    );

    let mut corrupt = Vec::new();
    for seg in &manifest.segments {
        let seg_dir = dir.segment_dir(&seg.id);
        if !storage::dir_exists(&seg_dir) {
            error!(segment = %seg.id, path = %seg_dir.display(), "segment directory missing");
            corrupt.push(seg.id.clone());
            continue;
        }

        if verify_checksums {
            for (file_name, file_meta) in &seg.files {
                let path = dir.segment_file(&seg.id, file_name);
                if let Err(err) = storage::verify_file_checksum(&path, &file_meta.checksum) {
                    error!(segment = %seg.id, file = %file_name, error = %err, "segment file checksum mismatch");
                    corrupt.push(seg.id.clone());
                    break; // One bad file marks the whole segment corrupt.
                }
            }
        }
    }
    corrupt
}

/// Descend through earlier manifests until one with fully intact segments
/// is found.
fn step4_handle_corrupt_segments(
    dir: &IndexDir,
    current_gen: u64,
    verify_checksums: bool,
) -> Result<(Manifest, u64)> {
    warn!("recovery step 4: handling corrupt segments, trying earlier manifests");

    let mut gen = current_gen;
    while gen > 1 {
        gen -= 1;
        let manifest = match load_manifest(dir, gen) {
            Ok(m) => m,
            Err(err) => {
                warn!(generation = gen, error = %err, "earlier manifest load failed");
                continue;
            }
        };

        if step3_verify_segments(dir, &manifest, verify_checksums).is_empty() {
            info!(generation = gen, "recovery: fell back to earlier generation");
            return Ok((manifest, gen));
        }
    }

    Err(ScourError::RecoveryImpossible)
}

fn step5_clean_tmp(dir: &IndexDir) -> Vec<std::path::PathBuf> {
    let (removed, err) = storage::remove_dir_contents(&dir.tmp_dir());
    if !removed.is_empty() {
        info!(removed = removed.len(), "recovery step 5: cleaned tmp");
    }
    if let Some(err) = err {
        warn!(error = %err, "recovery step 5: non-fatal error cleaning tmp");
    }
    removed
}

fn step6_identify_orphans(dir: &IndexDir, manifest: &Manifest) -> Vec<String> {
    let on_disk = match storage::list_subdirs(&dir.segments_dir()) {
        Ok(dirs) => dirs,
        Err(err) => {
            warn!(error = %err, "recovery step 6: non-fatal error listing segments");
            return Vec::new();
        }
    };

    let referenced: std::collections::HashSet<&str> =
        manifest.segments.iter().map(|s| s.id.as_str()).collect();

    let mut orphans = Vec::new();
    for name in on_disk {
        if !referenced.contains(name.as_str()) {
            info!(segment = %name, "recovery step 6: identified orphan segment");
            orphans.push(name);
        }
    }
    orphans
}

fn step7_clean_orphans(dir: &IndexDir, orphans: &[String]) {
    for segment_id in orphans {
        let path = dir.segment_dir(segment_id);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => info!(segment = %segment_id, "recovery step 7: removed orphan segment"),
            Err(err) => {
                error!(segment = %segment_id, error = %err, "failed to remove orphan segment")
            }
        }
    }
}

/// Keep the active generation plus `retention` most-recent predecessors;
/// remove older manifest files. Returns removed generations.
fn step8_prune_manifests(dir: &IndexDir, retention: usize) -> Vec<u64> {
    let files = match storage::list_files(&dir.manifests_dir()) {
        Ok(files) => files,
        Err(err) => {
            warn!(error = %err, "recovery step 8: non-fatal error listing manifests");
            return Vec::new();
        }
    };

    let mut generations: Vec<u64> = files
        .iter()
        .filter_map(|name| parse_manifest_generation(name))
        .collect();
    generations.sort_unstable_by(|a, b| b.cmp(a));

    let keep = 1 + retention;
    if generations.len() <= keep {
        return Vec::new();
    }

    let mut removed = Vec::new();
    for &gen in &generations[keep..] {
        let path = dir.manifest_path(gen);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(generation = gen, "recovery step 8: removed old manifest");
                removed.push(gen);
            }
            Err(err) => {
                warn!(generation = gen, error = %err, "failed to remove old manifest")
            }
        }
    }
    removed
}

/// Extract the generation number from a `manifest_gen_N.json` filename.
fn parse_manifest_generation(filename: &str) -> Option<u64> {
    filename
        .strip_prefix("manifest_gen_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest_generation() {
        assert_eq!(parse_manifest_generation("manifest_gen_12.json"), Some(12));
        assert_eq!(parse_manifest_generation("manifest_gen_x.json"), None);
        assert_eq!(parse_manifest_generation("schema.json"), None);
        assert_eq!(parse_manifest_generation("manifest_gen_3"), None);
    }

    #[test]
    fn test_recover_empty_index() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = IndexDir::new(tmp.path());
        dir.ensure_directories().unwrap();

        std::fs::write(dir.tmp_dir().join("leftover"), b"junk").unwrap();

        let result = recover(&dir, &RecoveryOptions::default()).unwrap();
        assert_eq!(result.generation, 0);
        assert!(result.manifest.is_none());
        assert!(!result.fell_back);
        assert_eq!(result.tmp_files_removed.len(), 1);
        assert_eq!(std::fs::read_dir(dir.tmp_dir()).unwrap().count(), 0);
    }
}
