//! In-memory volume manager used by the endpoint integration tests.
//!
//! Mirrors the CLI adapter's observable contract: same error kinds, same
//! error texts where callers match on them (hold/release idempotence,
//! batch destroy parsing), and an operation log for ordering assertions.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use zrepl_endpoint::zfs::{
    BytesStreamCopier, CreateTxgAndGuid, DatasetFilter, DatasetPath, DestroySnapshotsError,
    DrySendInfo, DrySendType, FilesystemVersion, PlaceholderState, RecvOptions, ResumeToken,
    ResumeTokenError, SendArgs, StreamCopier, VersionType, VolumeManager, ZfsError,
};

#[derive(Debug, Clone, Default)]
pub struct MockFs {
    pub placeholder: bool,
    pub encrypted: bool,
    pub resume_token: Option<String>,
    pub versions: Vec<FilesystemVersion>,
    /// snapshot short name -> hold tags
    pub holds: BTreeMap<String, BTreeSet<String>>,
    /// bytes of the last received stream
    pub received: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub filesystems: BTreeMap<String, MockFs>,
    /// paths reported by listing although no dataset backs them
    pub ghost_filesystems: Vec<String>,
    /// registered decodable resume tokens
    pub tokens: BTreeMap<String, ResumeToken>,
    pub corrupt_tokens: BTreeSet<String>,
    pub resume_send_supported: bool,
    pub resume_recv_supported: bool,
    /// chronological operation log
    pub log: Vec<String>,
    /// in-flight receives and the high-water mark
    pub recv_active: usize,
    pub recv_max_active: usize,
    /// in-flight placeholder creations and the high-water mark
    pub create_active: usize,
    pub create_max_active: usize,
}

pub struct MockZfs {
    pub state: Arc<Mutex<MockState>>,
    pub recv_delay: Duration,
    pub create_placeholder_delay: Duration,
}

impl Default for MockZfs {
    fn default() -> Self {
        Self::new()
    }
}

impl MockZfs {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                resume_send_supported: true,
                resume_recv_supported: true,
                ..Default::default()
            })),
            recv_delay: Duration::ZERO,
            create_placeholder_delay: Duration::ZERO,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    // ------------------------------------------------------------------
    // test setup helpers
    // ------------------------------------------------------------------

    pub fn add_filesystem(&self, path: &str) {
        self.lock()
            .filesystems
            .entry(path.to_string())
            .or_default();
    }

    pub fn add_snapshot(&self, fs: &str, name: &str, guid: u64, createtxg: u64) {
        let mut state = self.lock();
        let entry = state.filesystems.entry(fs.to_string()).or_default();
        entry.versions.push(FilesystemVersion {
            kind: VersionType::Snapshot,
            name: name.to_string(),
            guid,
            createtxg,
            creation: 1_700_000_000 + createtxg,
        });
    }

    pub fn add_bookmark(&self, fs: &str, name: &str, guid: u64, createtxg: u64) {
        let mut state = self.lock();
        let entry = state.filesystems.entry(fs.to_string()).or_default();
        entry.versions.push(FilesystemVersion {
            kind: VersionType::Bookmark,
            name: name.to_string(),
            guid,
            createtxg,
            creation: 1_700_000_000 + createtxg,
        });
    }

    pub fn set_encrypted(&self, fs: &str, encrypted: bool) {
        self.lock()
            .filesystems
            .get_mut(fs)
            .expect("unknown filesystem")
            .encrypted = encrypted;
    }

    pub fn mark_placeholder(&self, fs: &str) {
        self.lock()
            .filesystems
            .get_mut(fs)
            .expect("unknown filesystem")
            .placeholder = true;
    }

    pub fn set_resume_token(&self, fs: &str, token: &str) {
        self.lock()
            .filesystems
            .get_mut(fs)
            .expect("unknown filesystem")
            .resume_token = Some(token.to_string());
    }

    pub fn add_external_hold(&self, fs: &str, snap: &str, tag: &str) {
        self.lock()
            .filesystems
            .get_mut(fs)
            .expect("unknown filesystem")
            .holds
            .entry(snap.to_string())
            .or_default()
            .insert(tag.to_string());
    }

    pub fn add_ghost_filesystem(&self, path: &str) {
        self.lock().ghost_filesystems.push(path.to_string());
    }

    pub fn register_token(&self, blob: &str, token: ResumeToken) {
        self.lock().tokens.insert(blob.to_string(), token);
    }

    pub fn register_corrupt_token(&self, blob: &str) {
        self.lock().corrupt_tokens.insert(blob.to_string());
    }

    pub fn set_resume_send_supported(&self, supported: bool) {
        self.lock().resume_send_supported = supported;
    }

    // ------------------------------------------------------------------
    // test inspection helpers
    // ------------------------------------------------------------------

    pub fn has_filesystem(&self, path: &str) -> bool {
        self.lock().filesystems.contains_key(path)
    }

    pub fn filesystem(&self, path: &str) -> Option<MockFs> {
        self.lock().filesystems.get(path).cloned()
    }

    pub fn snapshot_names(&self, fs: &str) -> Vec<String> {
        self.lock()
            .filesystems
            .get(fs)
            .map(|e| {
                e.versions
                    .iter()
                    .filter(|v| v.kind == VersionType::Snapshot)
                    .map(|v| v.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn op_log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn recv_max_active(&self) -> usize {
        self.lock().recv_max_active
    }

    pub fn create_max_active(&self) -> usize {
        self.lock().create_max_active
    }

    // ------------------------------------------------------------------

    fn log_op(&self, op: String) {
        self.lock().log.push(op);
    }

    fn version(&self, fs: &str, rel_name: &str) -> Result<FilesystemVersion, ZfsError> {
        let (kind, name) = split_rel(rel_name)?;
        let state = self.lock();
        let entry = state
            .filesystems
            .get(fs)
            .ok_or_else(|| ZfsError::DatasetDoesNotExist {
                path: fs.to_string(),
            })?;
        entry
            .versions
            .iter()
            .find(|v| v.kind == kind && v.name == name)
            .cloned()
            .ok_or_else(|| ZfsError::DatasetDoesNotExist {
                path: format!("{fs}{rel_name}"),
            })
    }
}

fn split_rel(rel_name: &str) -> Result<(VersionType, &str), ZfsError> {
    let mut chars = rel_name.chars();
    let kind = chars
        .next()
        .and_then(VersionType::from_delimiter)
        .ok_or_else(|| {
            ZfsError::InvalidArgument(format!("version {rel_name:?} must start with '@' or '#'"))
        })?;
    Ok((kind, chars.as_str()))
}

fn op_failed(context: &str, stderr: &str) -> ZfsError {
    ZfsError::OperationFailed {
        context: context.to_string(),
        status: "exit status: 1".to_string(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl VolumeManager for MockZfs {
    async fn list_filesystems(
        &self,
        filter: &dyn DatasetFilter,
    ) -> Result<Vec<DatasetPath>, ZfsError> {
        let names: Vec<String> = {
            let state = self.lock();
            state
                .filesystems
                .keys()
                .cloned()
                .chain(state.ghost_filesystems.iter().cloned())
                .collect()
        };
        let mut out = Vec::new();
        for name in names {
            let path = DatasetPath::parse(&name)?;
            if filter
                .filter(&path)
                .map_err(|e| ZfsError::InvalidArgument(e.to_string()))?
            {
                out.push(path);
            }
        }
        Ok(out)
    }

    async fn list_filesystem_versions(
        &self,
        fs: &DatasetPath,
    ) -> Result<Vec<FilesystemVersion>, ZfsError> {
        let fs_str = fs.to_string();
        let state = self.lock();
        state
            .filesystems
            .get(&fs_str)
            .map(|e| e.versions.clone())
            .ok_or(ZfsError::DatasetDoesNotExist { path: fs_str })
    }

    async fn send_dry(&self, args: &SendArgs) -> Result<DrySendInfo, ZfsError> {
        args.validate_shape()?;
        self.log_op(format!(
            "send_dry {} to={} from={:?} token={}",
            args.fs,
            args.to.rel_name,
            args.from.as_ref().map(|f| f.rel_name.clone()),
            args.resume_token.is_some()
        ));
        match &args.from {
            Some(from) if from.is_bookmark() => Ok(DrySendInfo {
                kind: DrySendType::Incremental,
                filesystem: args.fs.clone(),
                from: from.abs_name(&args.fs),
                to: args.to.abs_name(&args.fs),
                size_estimate: -1,
            }),
            Some(from) => Ok(DrySendInfo {
                kind: DrySendType::Incremental,
                filesystem: args.fs.clone(),
                from: from.abs_name(&args.fs),
                to: args.to.abs_name(&args.fs),
                size_estimate: 500,
            }),
            None => Ok(DrySendInfo {
                kind: DrySendType::Full,
                filesystem: args.fs.clone(),
                from: String::new(),
                to: args.to.abs_name(&args.fs),
                size_estimate: 1000,
            }),
        }
    }

    async fn send(
        &self,
        args: &SendArgs,
        _cancel: &CancellationToken,
    ) -> Result<Box<dyn StreamCopier>, ZfsError> {
        args.validate_shape()?;
        // same existence requirement the real tool enforces
        self.version(&args.fs, &args.to.rel_name)?;
        self.log_op(format!(
            "send {} to={} from={:?} encrypted={} token={}",
            args.fs,
            args.to.rel_name,
            args.from.as_ref().map(|f| f.rel_name.clone()),
            args.encrypted,
            args.resume_token.is_some()
        ));
        let payload = format!("STREAM {}{}", args.fs, args.to.rel_name);
        Ok(Box::new(BytesStreamCopier::new(Bytes::from(payload))))
    }

    async fn recv(
        &self,
        fs: &DatasetPath,
        stream: &mut dyn StreamCopier,
        opts: RecvOptions,
        _cancel: &CancellationToken,
    ) -> Result<(), ZfsError> {
        let fs_str = fs.to_string();
        {
            let mut state = self.lock();
            state.recv_active += 1;
            state.recv_max_active = state.recv_max_active.max(state.recv_active);
            state.log.push(format!(
                "recv {fs_str} force={} save_partial={}",
                opts.rollback_and_force, opts.save_partial_recv_state
            ));
        }
        if !self.recv_delay.is_zero() {
            tokio::time::sleep(self.recv_delay).await;
        }

        let mut sink = Vec::new();
        let copy_res = stream.write_stream_to(&mut sink).await;

        let mut state = self.lock();
        state.recv_active -= 1;
        copy_res.map_err(ZfsError::Stream)?;

        let entry = state.filesystems.entry(fs_str).or_default();
        if opts.rollback_and_force {
            // rollback destroys all existing snapshots before the forced
            // receive overwrites the filesystem
            entry.versions.retain(|v| v.kind == VersionType::Bookmark);
        }
        entry.received = sink;
        Ok(())
    }

    async fn recv_resume_token(&self, fs: &DatasetPath) -> Result<Option<String>, ZfsError> {
        let state = self.lock();
        if !state.resume_recv_supported {
            return Ok(None);
        }
        state
            .filesystems
            .get(&fs.to_string())
            .map(|e| e.resume_token.clone())
            .ok_or(ZfsError::DatasetDoesNotExist {
                path: fs.to_string(),
            })
    }

    async fn recv_clear_resume_token(&self, fs: &DatasetPath) -> Result<(), ZfsError> {
        let mut state = self.lock();
        let fs_str = fs.to_string();
        state.log.push(format!("recv_clear_resume_token {fs_str}"));
        let entry = state
            .filesystems
            .get_mut(&fs_str)
            .ok_or(ZfsError::DatasetDoesNotExist { path: fs_str })?;
        entry.resume_token = None;
        Ok(())
    }

    async fn hold(&self, fs: &DatasetPath, snap: &str, tag: &str) -> Result<(), ZfsError> {
        let fs_str = fs.to_string();
        let mut state = self.lock();
        let entry = state
            .filesystems
            .get_mut(&fs_str)
            .ok_or_else(|| ZfsError::DatasetDoesNotExist {
                path: fs_str.clone(),
            })?;
        if !entry
            .versions
            .iter()
            .any(|v| v.kind == VersionType::Snapshot && v.name == snap)
        {
            return Err(ZfsError::DatasetDoesNotExist {
                path: format!("{fs_str}@{snap}"),
            });
        }
        let tags = entry.holds.entry(snap.to_string()).or_default();
        if !tags.insert(tag.to_string()) {
            return Err(op_failed(
                "hold",
                &format!("cannot hold snapshot '{fs_str}@{snap}': tag already exists on this dataset"),
            ));
        }
        state.log.push(format!("hold {fs_str}@{snap} {tag}"));
        Ok(())
    }

    async fn release(&self, fs: &DatasetPath, snap: &str, tag: &str) -> Result<(), ZfsError> {
        let fs_str = fs.to_string();
        let mut state = self.lock();
        let entry = state
            .filesystems
            .get_mut(&fs_str)
            .ok_or_else(|| ZfsError::DatasetDoesNotExist {
                path: fs_str.clone(),
            })?;
        if !entry
            .versions
            .iter()
            .any(|v| v.kind == VersionType::Snapshot && v.name == snap)
        {
            return Err(ZfsError::DatasetDoesNotExist {
                path: format!("{fs_str}@{snap}"),
            });
        }
        let removed = entry
            .holds
            .get_mut(snap)
            .map(|tags| tags.remove(tag))
            .unwrap_or(false);
        if !removed {
            return Err(op_failed(
                "release",
                &format!("cannot release hold from snapshot '{fs_str}@{snap}': no such tag on this dataset"),
            ));
        }
        state.log.push(format!("release {fs_str}@{snap} {tag}"));
        Ok(())
    }

    async fn holds(&self, fs: &DatasetPath, snap: &str) -> Result<Vec<String>, ZfsError> {
        let state = self.lock();
        Ok(state
            .filesystems
            .get(&fs.to_string())
            .and_then(|e| e.holds.get(snap))
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn bookmark(
        &self,
        fs: &DatasetPath,
        snap: &str,
        bookmark: &str,
    ) -> Result<(), ZfsError> {
        let fs_str = fs.to_string();
        let snapshot = self.version(&fs_str, &format!("@{snap}"))?;
        let mut state = self.lock();
        let entry = state
            .filesystems
            .get_mut(&fs_str)
            .ok_or_else(|| ZfsError::DatasetDoesNotExist {
                path: fs_str.clone(),
            })?;
        if entry
            .versions
            .iter()
            .any(|v| v.kind == VersionType::Bookmark && v.name == bookmark)
        {
            return Err(op_failed(
                "bookmark",
                &format!("cannot create bookmark '{fs_str}#{bookmark}': bookmark already exists"),
            ));
        }
        entry.versions.push(FilesystemVersion {
            kind: VersionType::Bookmark,
            name: bookmark.to_string(),
            // a bookmark captures the snapshot's identity at creation
            guid: snapshot.guid,
            createtxg: snapshot.createtxg,
            creation: snapshot.creation,
        });
        state.log.push(format!("bookmark {fs_str}@{snap} -> #{bookmark}"));
        Ok(())
    }

    async fn destroy(&self, path: &str) -> Result<(), ZfsError> {
        self.log_op(format!("destroy {path}"));
        let mut state = self.lock();
        if let Some((fs, names)) = path.split_once('@') {
            let entry = state
                .filesystems
                .get_mut(fs)
                .ok_or_else(|| ZfsError::DatasetDoesNotExist {
                    path: fs.to_string(),
                })?;
            let mut undestroyable = Vec::new();
            let mut reasons = Vec::new();
            let mut raw_lines = Vec::new();
            for name in names.split(',') {
                let held = entry
                    .holds
                    .get(name)
                    .map(|tags| !tags.is_empty())
                    .unwrap_or(false);
                if held {
                    undestroyable.push(name.to_string());
                    reasons.push("dataset is busy".to_string());
                    raw_lines
                        .push(format!("cannot destroy snapshot {fs}@{name}: dataset is busy"));
                } else {
                    entry
                        .versions
                        .retain(|v| !(v.kind == VersionType::Snapshot && v.name == name));
                }
            }
            if !undestroyable.is_empty() {
                return Err(ZfsError::DestroySnapshots(DestroySnapshotsError {
                    filesystem: fs.to_string(),
                    undestroyable,
                    reasons,
                    raw_lines,
                }));
            }
            return Ok(());
        }
        if let Some((fs, name)) = path.split_once('#') {
            let entry = state
                .filesystems
                .get_mut(fs)
                .ok_or_else(|| ZfsError::DatasetDoesNotExist {
                    path: fs.to_string(),
                })?;
            let before = entry.versions.len();
            entry
                .versions
                .retain(|v| !(v.kind == VersionType::Bookmark && v.name == name));
            if entry.versions.len() == before {
                return Err(ZfsError::DatasetDoesNotExist {
                    path: path.to_string(),
                });
            }
            return Ok(());
        }
        if state.filesystems.remove(path).is_none() {
            return Err(ZfsError::DatasetDoesNotExist {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    async fn rollback(
        &self,
        fs: &DatasetPath,
        to: &FilesystemVersion,
        _destroy_more_recent: bool,
    ) -> Result<(), ZfsError> {
        let fs_str = fs.to_string();
        self.log_op(format!("rollback {fs_str}@{}", to.name));
        let mut state = self.lock();
        let entry = state
            .filesystems
            .get_mut(&fs_str)
            .ok_or(ZfsError::DatasetDoesNotExist { path: fs_str })?;
        let target_txg = to.createtxg;
        entry.versions.retain(|v| {
            v.kind != VersionType::Snapshot || v.createtxg <= target_txg
        });
        Ok(())
    }

    async fn get_guid(&self, fs: &str, rel_name: &str) -> Result<u64, ZfsError> {
        Ok(self.version(fs, rel_name)?.guid)
    }

    async fn get_createtxg_and_guid(&self, path: &str) -> Result<CreateTxgAndGuid, ZfsError> {
        let idx = path
            .find(['@', '#'])
            .ok_or_else(|| ZfsError::InvalidArgument(format!("{path:?} is not a version")))?;
        let v = self.version(&path[..idx], &path[idx..])?;
        Ok(CreateTxgAndGuid {
            createtxg: v.createtxg,
            guid: v.guid,
        })
    }

    async fn encryption_enabled(&self, fs: &str) -> Result<bool, ZfsError> {
        let state = self.lock();
        state
            .filesystems
            .get(fs)
            .map(|e| e.encrypted)
            .ok_or_else(|| ZfsError::DatasetDoesNotExist {
                path: fs.to_string(),
            })
    }

    async fn placeholder_state(&self, path: &DatasetPath) -> Result<PlaceholderState, ZfsError> {
        let state = self.lock();
        Ok(state
            .filesystems
            .get(&path.to_string())
            .map(|e| PlaceholderState {
                fs_exists: true,
                is_placeholder: e.placeholder,
            })
            .unwrap_or_default())
    }

    async fn create_placeholder(&self, path: &DatasetPath) -> Result<(), ZfsError> {
        let path_str = path.to_string();
        {
            let mut state = self.lock();
            state.create_active += 1;
            state.create_max_active = state.create_max_active.max(state.create_active);
            state.log.push(format!("create_placeholder {path_str}"));
        }
        if !self.create_placeholder_delay.is_zero() {
            tokio::time::sleep(self.create_placeholder_delay).await;
        }
        let mut state = self.lock();
        state.create_active -= 1;
        if state.filesystems.contains_key(&path_str) {
            return Err(op_failed(
                "create placeholder",
                &format!("cannot create '{path_str}': dataset already exists"),
            ));
        }
        state.filesystems.insert(
            path_str,
            MockFs {
                placeholder: true,
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn set_placeholder(
        &self,
        path: &DatasetPath,
        is_placeholder: bool,
    ) -> Result<(), ZfsError> {
        let path_str = path.to_string();
        let mut state = self.lock();
        state
            .log
            .push(format!("set_placeholder {path_str} {is_placeholder}"));
        let entry = state
            .filesystems
            .get_mut(&path_str)
            .ok_or(ZfsError::DatasetDoesNotExist { path: path_str })?;
        entry.placeholder = is_placeholder;
        Ok(())
    }

    async fn resume_send_supported(&self) -> Result<bool, ZfsError> {
        Ok(self.lock().resume_send_supported)
    }

    async fn resume_recv_supported(&self, _fs: &DatasetPath) -> Result<bool, ZfsError> {
        Ok(self.lock().resume_recv_supported)
    }

    async fn parse_resume_token(&self, token: &str) -> Result<ResumeToken, ResumeTokenError> {
        let state = self.lock();
        if state.corrupt_tokens.contains(token) {
            return Err(ResumeTokenError::Corrupt("checksum mismatch".to_string()));
        }
        state
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| ResumeTokenError::Parsing(format!("unknown token {token:?}")))
    }
}

/// Filter passing every dataset.
pub struct PassAll;

impl DatasetFilter for PassAll {
    fn filter(&self, _path: &DatasetPath) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Filter passing only datasets under a fixed prefix.
pub struct PrefixFilter(pub DatasetPath);

impl PrefixFilter {
    pub fn new(prefix: &str) -> Self {
        Self(DatasetPath::parse(prefix).expect("valid prefix"))
    }
}

impl DatasetFilter for PrefixFilter {
    fn filter(&self, path: &DatasetPath) -> anyhow::Result<bool> {
        Ok(path.has_prefix(&self.0))
    }
}

/// Drain a stream copier into memory and close it.
pub async fn drain_stream(mut stream: Box<dyn StreamCopier>) -> anyhow::Result<Vec<u8>> {
    let mut sink = Vec::new();
    stream.write_stream_to(&mut sink).await?;
    stream.close().await?;
    Ok(sink)
}
