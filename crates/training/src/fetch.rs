//! Fetches the saved VGG16 backbone when it is not already on disk.

use anyhow::{anyhow, bail, Context};
use models::{VGG_CONFIG_FILE, VGG_WEIGHTS_FILE};
use std::fs;
use std::path::{Path, PathBuf};

const BACKBONE_FILES: [&str; 2] = [VGG_CONFIG_FILE, VGG_WEIGHTS_FILE];

/// Ensures `data_dir/vgg` holds the backbone, downloading the missing files
/// from `base_url`. Returns the backbone directory.
pub fn maybe_download_pretrained_vgg(
    data_dir: &Path,
    base_url: Option<&str>,
) -> anyhow::Result<PathBuf> {
    let vgg_dir = data_dir.join("vgg");
    let missing: Vec<&str> = BACKBONE_FILES
        .iter()
        .copied()
        .filter(|f| !vgg_dir.join(f).is_file())
        .collect();
    if missing.is_empty() {
        return Ok(vgg_dir);
    }
    let Some(base_url) = base_url else {
        bail!(
            "pretrained backbone missing from {} ({}); set vgg_url or place the files there",
            vgg_dir.display(),
            missing.join(", ")
        );
    };

    fs::create_dir_all(&vgg_dir)
        .with_context(|| format!("creating {}", vgg_dir.display()))?;
    tracing::info!("Downloading pre-trained vgg model...");
    for file in missing {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), file);
        let bytes = reqwest::blocking::get(&url)
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(|e| anyhow!("failed to download {url}: {e}"))?;
        write_atomically(&vgg_dir.join(file), &bytes)?;
        tracing::info!("fetched {url} ({} bytes)", bytes.len());
    }
    Ok(vgg_dir)
}

/// Writes `<target>.part` and renames it over `target`. A failed write or
/// rename removes the partial file.
fn write_atomically(target: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut partial = target.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);
    let res = fs::write(&partial, bytes)
        .with_context(|| format!("writing {}", partial.display()))
        .and_then(|()| {
            fs::rename(&partial, target)
                .with_context(|| format!("moving {} into place", target.display()))
        });
    if res.is_err() && partial.exists() {
        if let Err(e) = fs::remove_file(&partial) {
            tracing::warn!("could not remove {}: {e}", partial.display());
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_backbone_needs_no_url() {
        let tmp = tempfile::tempdir().unwrap();
        let vgg = tmp.path().join("vgg");
        fs::create_dir_all(&vgg).unwrap();
        for f in BACKBONE_FILES {
            fs::write(vgg.join(f), b"x").unwrap();
        }
        assert_eq!(maybe_download_pretrained_vgg(tmp.path(), None).unwrap(), vgg);
    }

    #[test]
    fn missing_backbone_without_url_is_explained() {
        let tmp = tempfile::tempdir().unwrap();
        let err = maybe_download_pretrained_vgg(tmp.path(), None).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("vgg_url"), "{msg}");
        assert!(msg.contains(VGG_WEIGHTS_FILE), "{msg}");
    }

    #[test]
    fn atomic_write_replaces_target() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join(VGG_CONFIG_FILE);
        fs::write(&target, b"old").unwrap();
        write_atomically(&target, b"new").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!tmp.path().join(format!("{VGG_CONFIG_FILE}.part")).exists());
    }

    #[test]
    fn failed_rename_removes_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        // A non-empty directory in the way makes the rename fail.
        let target = tmp.path().join(VGG_WEIGHTS_FILE);
        fs::create_dir_all(target.join("occupied")).unwrap();
        assert!(write_atomically(&target, b"weights").is_err());
        assert!(!tmp.path().join(format!("{VGG_WEIGHTS_FILE}.part")).exists());
        assert!(target.is_dir());
    }
}
