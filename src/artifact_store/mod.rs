//! Run-scoped artifact store.
//!
//! Build jobs hand their outputs to downstream jobs through a keyed store
//! that lives for one pipeline run:
//! - one namespace per run (`<workdir>/runs/<run-id>/artifacts`)
//! - write-once per key: a key, once written, is never overwritten
//! - blobs addressed by sha256, with a small JSON index entry per key
//! - file artifacts are stored as-is; directory artifacts as `tar.zst`
//!
//! Retention is short-lived: [`sweep_runs`] deletes whole run namespaces
//! older than the retention window. This is a hand-off mechanism, not a
//! durable archive.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tar::Builder as TarBuilder;
use tracing::debug;
use walkdir::WalkDir;

/// Subdirectory of the workdir holding one namespace per run.
pub const RUNS_DIR: &str = "runs";

/// Artifact encoding format stored as a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// A single file blob.
    File,
    /// A tar archive compressed with zstd.
    TarZst,
}

/// Index entry describing one stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub key: String,
    /// Original file name for file artifacts (preserved so consumers can
    /// restore a meaningful name, e.g. a wheel's version-bearing name).
    pub file_name: Option<String>,
    pub blob_sha256: String,
    pub format: ArtifactFormat,
    pub size_bytes: u64,
    pub stored_at_unix: u64,
}

/// A stored artifact resolved from the index.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub entry: ArtifactEntry,
    pub blob_path: PathBuf,
}

/// Metadata written once per run namespace, read back by [`sweep_runs`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub tag: String,
    pub created_unix: u64,
}

/// Keyed, write-once artifact store for one pipeline run.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (and create if needed) the store for a run root directory.
    pub fn open(run_root: &Path) -> Result<Self> {
        let store = Self {
            root: run_root.join("artifacts"),
        };
        store.ensure_layout()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(self.blobs_dir().join("sha256"))?;
        fs::create_dir_all(self.index_dir())?;
        fs::create_dir_all(self.tmp_dir())?;
        fs::create_dir_all(self.locks_dir())?;
        Ok(())
    }

    fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    fn index_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.index_dir().join(format!("{key}.json")))
    }

    fn lock_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.locks_dir().join(format!("{key}.lock")))
    }

    fn blob_path(&self, sha256: &str) -> Result<PathBuf> {
        if !is_hex_64(sha256) {
            bail!("invalid sha256: {sha256}");
        }
        let prefix = &sha256[0..2];
        Ok(self.blobs_dir().join("sha256").join(prefix).join(sha256))
    }

    /// Get an artifact by key if present.
    pub fn get(&self, key: &str) -> Result<Option<StoredArtifact>> {
        let index_path = self.index_path(key)?;
        if !index_path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&index_path)
            .with_context(|| format!("reading index {}", index_path.display()))?;
        let entry: ArtifactEntry = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing index {}", index_path.display()))?;

        let blob_path = self.blob_path(&entry.blob_sha256)?;
        Ok(Some(StoredArtifact { entry, blob_path }))
    }

    /// Get an artifact by key, failing if it is missing.
    pub fn require(&self, key: &str) -> Result<StoredArtifact> {
        self.get(key)?
            .with_context(|| format!("required artifact '{key}' is missing from the store"))
    }

    /// Store a single file under `key`. Fails if the key is already written.
    pub fn put_file(&self, key: &str, src_file: &Path) -> Result<StoredArtifact> {
        if !src_file.is_file() {
            bail!("source file not found: {}", src_file.display());
        }

        let _lock = self.claim_key(key)?;

        let (sha256, size_bytes) = sha256_file(src_file)?;
        let blob_path = self.blob_path(&sha256)?;
        if !blob_path.exists() {
            let tmp = self.tmp_dir().join(tmp_name("blob"));
            fs::copy(src_file, &tmp).with_context(|| {
                format!("copying {} to {}", src_file.display(), tmp.display())
            })?;
            atomic_rename(&tmp, &blob_path)?;
        }

        let entry = ArtifactEntry {
            key: key.to_string(),
            file_name: src_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            blob_sha256: sha256,
            format: ArtifactFormat::File,
            size_bytes,
            stored_at_unix: now_unix(),
        };
        self.write_index(key, &entry)?;
        debug!(key, size_bytes, "stored file artifact");

        Ok(StoredArtifact {
            blob_path,
            entry,
        })
    }

    /// Store a directory under `key` as a deterministic `tar.zst` blob.
    /// Fails if the key is already written.
    pub fn put_dir(&self, key: &str, src_dir: &Path) -> Result<StoredArtifact> {
        if !src_dir.is_dir() {
            bail!("source directory not found: {}", src_dir.display());
        }

        let _lock = self.claim_key(key)?;

        let tmp_tar = self.tmp_dir().join(tmp_name("artifact.tar.zst"));
        create_tar_zst(src_dir, &tmp_tar)?;

        let (sha256, size_bytes) = sha256_file(&tmp_tar)?;
        let blob_path = self.blob_path(&sha256)?;
        if !blob_path.exists() {
            atomic_rename(&tmp_tar, &blob_path)?;
        } else {
            let _ = fs::remove_file(&tmp_tar);
        }

        let entry = ArtifactEntry {
            key: key.to_string(),
            file_name: None,
            blob_sha256: sha256,
            format: ArtifactFormat::TarZst,
            size_bytes,
            stored_at_unix: now_unix(),
        };
        self.write_index(key, &entry)?;
        debug!(key, size_bytes, "stored directory artifact");

        Ok(StoredArtifact {
            blob_path,
            entry,
        })
    }

    /// Restore an artifact: a file blob is placed at `dest`, a `tar.zst`
    /// blob is unpacked into the directory `dest`.
    pub fn materialize_to(&self, key: &str, dest: &Path) -> Result<()> {
        let stored = self.require(key)?;

        if !stored.blob_path.exists() {
            bail!(
                "blob missing for artifact '{}' (expected {})",
                key,
                stored.blob_path.display()
            );
        }

        // Re-hash before handing the blob out; a corrupted blob must not
        // reach a release asset.
        let (actual_sha, _) = sha256_file(&stored.blob_path)?;
        if actual_sha != stored.entry.blob_sha256 {
            bail!(
                "blob hash mismatch for artifact '{}'\n  expected: {}\n  actual:   {}",
                key,
                stored.entry.blob_sha256,
                actual_sha
            );
        }

        match stored.entry.format {
            ArtifactFormat::File => materialize_file(&stored.blob_path, dest),
            ArtifactFormat::TarZst => materialize_tar_zst_dir(&stored.blob_path, dest),
        }
    }

    /// Copy an artifact's raw blob to `dest` after verifying its hash.
    ///
    /// For `tar.zst` directory artifacts this yields the archive itself,
    /// which is exactly the shape a release asset wants.
    pub fn export_blob(&self, key: &str, dest: &Path) -> Result<()> {
        let stored = self.require(key)?;
        let (actual_sha, _) = sha256_file(&stored.blob_path)?;
        if actual_sha != stored.entry.blob_sha256 {
            bail!(
                "blob hash mismatch for artifact '{}'\n  expected: {}\n  actual:   {}",
                key,
                stored.entry.blob_sha256,
                actual_sha
            );
        }
        materialize_file(&stored.blob_path, dest)
    }

    /// List all index entries, newest first.
    pub fn entries(&self) -> Result<Vec<ArtifactEntry>> {
        let dir = self.index_dir();
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut out = vec![];
        for ent in fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))? {
            let path = ent?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)?;
            let entry: ArtifactEntry = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing index {}", path.display()))?;
            out.push(entry);
        }

        out.sort_by(|a, b| b.stored_at_unix.cmp(&a.stored_at_unix));
        Ok(out)
    }

    /// Acquire the per-key lock and enforce write-once.
    ///
    /// Matrix instances use disjoint keys, so in a healthy run this lock is
    /// never contended; it exists to turn a duplicated key into a hard error
    /// instead of a silent overwrite.
    fn claim_key(&self, key: &str) -> Result<KeyLock> {
        let lock_path = self.lock_path(key)?;
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("creating lock file {}", lock_path.display()))?;

        if lock_file.try_lock_exclusive().is_err() {
            bail!("artifact key '{key}' is being written by another job");
        }

        if self.index_path(key)?.exists() {
            bail!("artifact key '{key}' is already written (keys are write-once per run)");
        }

        Ok(KeyLock { _file: lock_file })
    }

    fn write_index(&self, key: &str, entry: &ArtifactEntry) -> Result<()> {
        let path = self.index_path(key)?;
        let bytes = serde_json::to_vec_pretty(entry)?;
        let tmp = self.tmp_dir().join(tmp_name("index.json"));
        fs::write(&tmp, bytes)?;
        atomic_rename(&tmp, &path)?;
        Ok(())
    }
}

struct KeyLock {
    _file: File,
}

/// Root directory for a run namespace under the workdir.
pub fn run_root(workdir: &Path, run_id: &str) -> PathBuf {
    workdir.join(RUNS_DIR).join(run_id)
}

/// Create a run namespace and record its metadata for later sweeping.
pub fn init_run(workdir: &Path, run_id: &str, tag: &str) -> Result<PathBuf> {
    let root = run_root(workdir, run_id);
    fs::create_dir_all(&root)
        .with_context(|| format!("creating run directory '{}'", root.display()))?;

    let info = RunInfo {
        run_id: run_id.to_string(),
        tag: tag.to_string(),
        created_unix: now_unix(),
    };
    let bytes = serde_json::to_vec_pretty(&info)?;
    fs::write(root.join("run.json"), bytes)
        .with_context(|| format!("writing run metadata under '{}'", root.display()))?;
    Ok(root)
}

/// Delete run namespaces older than `max_age`. Returns the removed roots.
///
/// Namespaces without readable metadata are left alone; the sweep only
/// removes what it can positively identify as an aged-out run.
pub fn sweep_runs(workdir: &Path, max_age: Duration) -> Result<Vec<PathBuf>> {
    let runs = workdir.join(RUNS_DIR);
    if !runs.is_dir() {
        return Ok(vec![]);
    }

    let cutoff = now_unix().saturating_sub(max_age.as_secs());
    let mut removed = vec![];

    for ent in fs::read_dir(&runs).with_context(|| format!("reading {}", runs.display()))? {
        let path = ent?.path();
        if !path.is_dir() {
            continue;
        }
        let info_path = path.join("run.json");
        let info: RunInfo = match fs::read(&info_path)
            .ok()
            .and_then(|b| serde_json::from_slice(&b).ok())
        {
            Some(info) => info,
            None => continue,
        };
        if info.created_unix < cutoff {
            fs::remove_dir_all(&path)
                .with_context(|| format!("removing expired run '{}'", path.display()))?;
            removed.push(path);
        }
    }

    Ok(removed)
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn tmp_name(prefix: &str) -> String {
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{prefix}-{n}")
}

fn atomic_rename(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    // tmp/ and the destination live in the same store tree, so rename is
    // normally atomic here.
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            // EXDEV or similar: degrade to copy+remove.
            fs::copy(src, dst)
                .with_context(|| format!("copying {} to {}", src.display(), dst.display()))?;
            fs::remove_file(src)
                .with_context(|| format!("removing tmp {}", src.display()))?;
            Ok(())
        }
    }
}

fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 1024 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    let sha = format!("{:x}", hasher.finalize());
    Ok((sha, size))
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        bail!("artifact key must not be empty");
    }
    if key.contains('/') || key.contains('\\') || key.contains("..") {
        bail!("artifact key must be a safe filename segment: {key}");
    }
    Ok(())
}

fn is_hex_64(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn materialize_file(blob: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    if dest.exists() {
        fs::remove_file(dest)
            .with_context(|| format!("removing existing {}", dest.display()))?;
    }

    // Hardlink when possible; falls through to a copy across filesystems.
    if fs::hard_link(blob, dest).is_ok() {
        return Ok(());
    }

    let tmp = dest.with_extension("tmp");
    fs::copy(blob, &tmp)
        .with_context(|| format!("copying blob {} to {}", blob.display(), tmp.display()))?;
    atomic_rename(&tmp, dest)?;
    Ok(())
}

fn materialize_tar_zst_dir(blob: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("creating directory {}", dest.display()))?;
    let f = File::open(blob).with_context(|| format!("opening blob {}", blob.display()))?;
    let decoder = zstd::stream::Decoder::new(BufReader::new(f))?;
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(dest)
        .with_context(|| format!("unpacking {} into {}", blob.display(), dest.display()))?;
    Ok(())
}

fn create_tar_zst(src_dir: &Path, out_path: &Path) -> Result<()> {
    let out = File::create(out_path)
        .with_context(|| format!("creating {}", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, 3)?;
    let mut builder = TarBuilder::new(encoder);

    // Collect paths deterministically so identical trees hash identically.
    let mut entries: Vec<PathBuf> = vec![];
    for ent in WalkDir::new(src_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        let p = ent.path();
        if p == src_dir {
            continue;
        }
        entries.push(p.to_path_buf());
    }

    entries.sort_by(|a, b| {
        let ra = a.strip_prefix(src_dir).unwrap_or(a).to_string_lossy();
        let rb = b.strip_prefix(src_dir).unwrap_or(b).to_string_lossy();
        ra.cmp(&rb)
    });

    for p in entries {
        let rel = p
            .strip_prefix(src_dir)
            .unwrap_or(&p)
            .to_string_lossy()
            .replace('\\', "/");

        let md = fs::symlink_metadata(&p)?;
        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if md.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            set_mode(&mut header, &md, 0o755);
            header.set_cksum();
            builder.append_data(&mut header, rel, std::io::empty())?;
        } else if md.file_type().is_symlink() {
            let target = fs::read_link(&p)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            set_mode(&mut header, &md, 0o777);
            header.set_link_name(target.to_string_lossy().as_ref())?;
            header.set_cksum();
            builder.append_data(&mut header, rel, std::io::empty())?;
        } else if md.is_file() {
            let mut f = File::open(&p)?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(md.len());
            set_mode(&mut header, &md, 0o644);
            header.set_cksum();
            builder.append_data(&mut header, rel, &mut f)?;
        }
    }

    let encoder = builder
        .into_inner()
        .context("finalizing tar builder")?;
    encoder.finish()?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(header: &mut tar::Header, md: &fs::Metadata, _fallback: u32) {
    use std::os::unix::fs::PermissionsExt;
    header.set_mode(md.permissions().mode());
}

#[cfg(not(unix))]
fn set_mode(header: &mut tar::Header, _md: &fs::Metadata, fallback: u32) {
    header.set_mode(fallback);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(&tmp.path().join("run")).unwrap();

        let src = tmp.path().join("swingmusic-1.0.0-py3-none-any.whl");
        fs::write(&src, b"wheel bytes").unwrap();

        let stored = store.put_file("wheels", &src).unwrap();
        assert!(is_hex_64(&stored.entry.blob_sha256));
        assert_eq!(
            stored.entry.file_name.as_deref(),
            Some("swingmusic-1.0.0-py3-none-any.whl")
        );

        let dest = tmp.path().join("out.whl");
        store.materialize_to("wheels", &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"wheel bytes");
    }

    #[test]
    fn dir_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(&tmp.path().join("run")).unwrap();

        let src_dir = tmp.path().join("dist");
        fs::create_dir_all(src_dir.join("assets")).unwrap();
        fs::write(src_dir.join("index.html"), b"<html>").unwrap();
        fs::write(src_dir.join("assets/app.js"), b"js").unwrap();

        store.put_dir("client", &src_dir).unwrap();

        let dest = tmp.path().join("restored");
        store.materialize_to("client", &dest).unwrap();
        assert_eq!(fs::read(dest.join("index.html")).unwrap(), b"<html>");
        assert_eq!(fs::read(dest.join("assets/app.js")).unwrap(), b"js");
    }

    #[test]
    fn keys_are_write_once() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(&tmp.path().join("run")).unwrap();

        let src = tmp.path().join("a.bin");
        fs::write(&src, b"one").unwrap();
        store.put_file("linux-amd64", &src).unwrap();

        let other = tmp.path().join("b.bin");
        fs::write(&other, b"two").unwrap();
        let err = store.put_file("linux-amd64", &other).unwrap_err();
        assert!(err.to_string().contains("write-once"));

        // First write is untouched.
        let dest = tmp.path().join("out.bin");
        store.materialize_to("linux-amd64", &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"one");
    }

    #[test]
    fn entries_lists_every_stored_artifact() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(&tmp.path().join("run")).unwrap();
        assert!(store.entries().unwrap().is_empty());

        let wheel = tmp.path().join("swingmusic-1.0.0-py3-none-any.whl");
        fs::write(&wheel, b"wheel").unwrap();
        store.put_file("wheels", &wheel).unwrap();

        let dist = tmp.path().join("dist");
        fs::create_dir_all(&dist).unwrap();
        fs::write(dist.join("index.html"), b"<html>").unwrap();
        store.put_dir("client", &dist).unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert!(keys.contains(&"wheels") && keys.contains(&"client"));
        let client = entries.iter().find(|e| e.key == "client").unwrap();
        assert_eq!(client.format, ArtifactFormat::TarZst);
        assert!(client.file_name.is_none());
    }

    #[test]
    fn missing_key_is_none_and_require_fails() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(&tmp.path().join("run")).unwrap();
        assert!(store.get("client").unwrap().is_none());
        assert!(store.require("client").is_err());
    }

    #[test]
    fn sweep_removes_only_expired_runs() {
        let tmp = TempDir::new().unwrap();
        let workdir = tmp.path();

        init_run(workdir, "v1-old", "v1").unwrap();
        init_run(workdir, "v2-new", "v2").unwrap();

        // Backdate the old run's metadata.
        let old_info = RunInfo {
            run_id: "v1-old".to_string(),
            tag: "v1".to_string(),
            created_unix: now_unix() - 60 * 60 * 24 * 30,
        };
        fs::write(
            run_root(workdir, "v1-old").join("run.json"),
            serde_json::to_vec(&old_info).unwrap(),
        )
        .unwrap();

        let removed = sweep_runs(workdir, Duration::from_secs(60 * 60 * 24 * 7)).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(!run_root(workdir, "v1-old").exists());
        assert!(run_root(workdir, "v2-new").exists());
    }
}
