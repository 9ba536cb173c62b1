//! The current-generation pointer and manifest I/O protocols.
//!
//! `manifest.current` holds the active generation as decimal ASCII; a
//! missing or empty file means generation 0 (empty index). Both the
//! manifest write protocol and the activation protocol stage in `tmp/` and
//! flip with a rename so a crash at any point leaves either the old or the
//! new state, never a torn file.

use tracing::warn;

use crate::error::{Result, ScourError};
use crate::index::directory::IndexDir;
use crate::index::manifest::Manifest;
use crate::storage;

/// Read the generation number from `manifest.current`.
/// Returns 0 if the file is missing or empty.
pub fn read_current_generation(dir: &IndexDir) -> Result<u64> {
    let path = dir.manifest_current_path();
    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(ScourError::io(&path, e)),
    };

    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed.parse::<u64>().map_err(|e| {
        ScourError::ManifestCorrupt(format!("manifest.current {trimmed:?}: {e}"))
    })
}

/// Atomically point `manifest.current` at a new generation.
///
/// Activation protocol: write `tmp/manifest.next` with fsync, rename to
/// `manifest.current`, fsync the index root.
pub fn write_current_generation(dir: &IndexDir, generation: u64) -> Result<()> {
    let data = generation.to_string();

    let next_path = dir.manifest_next_path();
    storage::write_file_sync(&next_path, data.as_bytes())?;

    let current_path = dir.manifest_current_path();
    std::fs::rename(&next_path, &current_path)
        .map_err(|e| ScourError::io(&current_path, e))?;

    storage::fsync_dir(dir.root())
}

/// Read and verify the manifest file for a generation.
pub fn load_manifest(dir: &IndexDir, generation: u64) -> Result<Manifest> {
    let path = dir.manifest_path(generation);
    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ScourError::ManifestNotFound(generation))
        }
        Err(e) => return Err(ScourError::io(&path, e)),
    };
    Manifest::from_json(&data)
}

/// Durably write a manifest file.
///
/// Manifest write protocol: serialize (segments sorted, checksum set),
/// write `tmp/manifest_gen_N.json` with fsync, rename into `manifests/`,
/// fsync `manifests/`.
pub fn write_manifest(dir: &IndexDir, manifest: &Manifest) -> Result<()> {
    let data = manifest.to_json()?;

    let tmp_path = dir.tmp_manifest_path(manifest.generation);
    storage::write_file_sync(&tmp_path, &data)?;

    let final_path = dir.manifest_path(manifest.generation);
    std::fs::rename(&tmp_path, &final_path).map_err(|e| ScourError::io(&final_path, e))?;

    storage::fsync_dir(&dir.manifests_dir())
}

/// Load the manifest for `generation`, falling back to earlier generations
/// on corruption. Returns the manifest and the generation actually loaded.
pub fn load_manifest_with_fallback(dir: &IndexDir, generation: u64) -> Result<(Manifest, u64)> {
    let mut gen = generation;
    while gen >= 1 {
        match load_manifest(dir, gen) {
            Ok(manifest) => {
                if gen != generation {
                    warn!(requested = generation, recovered = gen, "manifest fallback");
                }
                return Ok((manifest, gen));
            }
            Err(err) => {
                warn!(generation = gen, error = %err, "manifest load failed, trying previous");
                gen -= 1;
            }
        }
    }
    Err(ScourError::RecoveryImpossible)
}
