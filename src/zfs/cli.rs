//! Invocation plumbing for the `zfs` binary.
//!
//! [`ZfsCli`] spawns one child process per operation, captures stderr, and
//! classifies failures into the typed error kinds. Output parsing lives in
//! free functions so it can be tested on captured tool output.

use std::collections::HashMap;
use std::ffi::OsString;
use std::process::Output;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::envconst;
use crate::zfs::copier::StreamCopier;
use crate::zfs::error::{try_parse_destroy_snapshots_error, ZfsError};
use crate::zfs::path::DatasetPath;
use crate::zfs::placeholder::PlaceholderState;
use crate::zfs::resume_token::{ResumeToken, ResumeTokenError};
use crate::zfs::send::{DrySendInfo, SendArgs};
use crate::zfs::version::{decompose_version_string, FilesystemVersion, VersionType};
use crate::zfs::{CreateTxgAndGuid, DatasetFilter, RecvOptions, VolumeManager};

pub(crate) static SEND_PIPE_CAPACITY_HINT: Lazy<usize> =
    Lazy::new(|| envconst::usize_var("ZFS_SEND_PIPE_CAPACITY_HINT", 1 << 25));
pub(crate) static RECV_PIPE_CAPACITY_HINT: Lazy<usize> =
    Lazy::new(|| envconst::usize_var("ZFS_RECV_PIPE_CAPACITY_HINT", 1 << 25));

/// Best-effort pipe capacity hint. Only Linux exposes the fcntl; elsewhere
/// this is a no-op.
pub(crate) fn try_set_pipe_capacity<F: std::os::unix::io::AsRawFd>(fd: &F, capacity: usize) {
    #[cfg(target_os = "linux")]
    {
        let res = unsafe {
            libc::fcntl(fd.as_raw_fd(), libc::F_SETPIPE_SZ, capacity as libc::c_int)
        };
        if res < 0 {
            tracing::debug!(capacity, "cannot set pipe capacity hint");
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (fd, capacity);
    }
}

bitflags::bitflags! {
    /// Sources a property value may come from, as reported in the third
    /// column of `zfs get`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertySource: u32 {
        const LOCAL = 1 << 0;
        const DEFAULT = 1 << 1;
        const INHERITED = 1 << 2;
        const NONE = 1 << 3;
        const TEMPORARY = 1 << 4;
        const RECEIVED = 1 << 5;
    }
}

impl PropertySource {
    fn accepts(self, source_field: &str) -> bool {
        if self == Self::all() {
            return true;
        }
        (self.contains(Self::LOCAL) && source_field.starts_with("local"))
            || (self.contains(Self::DEFAULT) && source_field.starts_with("default"))
            || (self.contains(Self::INHERITED) && source_field.starts_with("inherited"))
            || (self.contains(Self::NONE) && source_field.starts_with('-'))
            || (self.contains(Self::TEMPORARY) && source_field.starts_with("temporary"))
            || (self.contains(Self::RECEIVED) && source_field.starts_with("received"))
    }
}

/// Production [`VolumeManager`] shelling out to the `zfs` binary (and its
/// `zpool` companion for pool-level feature queries).
#[derive(Debug, Clone)]
pub struct ZfsCli {
    binary: OsString,
    zpool_binary: OsString,
}

impl Default for ZfsCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ZfsCli {
    pub fn new() -> Self {
        Self::with_binaries("zfs", "zpool")
    }

    /// Use binaries other than `zfs`/`zpool` on `$PATH`.
    pub fn with_binaries(
        binary: impl Into<OsString>,
        zpool_binary: impl Into<OsString>,
    ) -> Self {
        Self {
            binary: binary.into(),
            zpool_binary: zpool_binary.into(),
        }
    }

    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.stdin(std::process::Stdio::null());
        cmd
    }

    fn zpool_command(&self) -> Command {
        let mut cmd = Command::new(&self.zpool_binary);
        cmd.stdin(std::process::Stdio::null());
        cmd
    }

    /// Run to completion with captured output; non-zero exit becomes a
    /// classified [`ZfsError`].
    pub(crate) async fn run(&self, context: &str, args: &[&str]) -> Result<Output, ZfsError> {
        let output = self.command().args(args).output().await?;
        if output.status.success() {
            return Ok(output);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if let Some(path) = parse_dataset_does_not_exist(&stderr) {
            return Err(ZfsError::DatasetDoesNotExist { path });
        }
        Err(ZfsError::OperationFailed {
            context: context.to_string(),
            status: output.status.to_string(),
            stderr,
        })
    }

    /// `zfs get` for `props` on `path`, keeping only values whose source
    /// matches `sources`.
    pub(crate) async fn get_props(
        &self,
        path: &str,
        props: &[&str],
        sources: PropertySource,
    ) -> Result<HashMap<String, String>, ZfsError> {
        let prop_list = props.join(",");
        let output = self
            .run(
                "get",
                &["get", "-Hp", "-o", "property,value,source", &prop_list, path],
            )
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_get_output(&stdout, props.len(), sources)
    }

    pub(crate) async fn set_props(
        &self,
        path: &str,
        props: &[(&str, &str)],
    ) -> Result<(), ZfsError> {
        let mut args = vec!["set".to_string()];
        for (prop, value) in props {
            if prop.contains('=') {
                return Err(ZfsError::InvalidArgument(format!(
                    "property name {prop:?} contains '='"
                )));
            }
            args.push(format!("{prop}={value}"));
        }
        args.push(path.to_string());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run("set", &args).await?;
        Ok(())
    }

    async fn probe_usage(&self, subcommand: &str) -> Result<String, ZfsError> {
        // invoking a subcommand without arguments prints its usage and
        // exits non-zero; that is the feature-discovery channel
        let output = self.command().arg(subcommand).output().await?;
        let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        Ok(text)
    }
}

fn validate_filesystem_argument(fs: &str) -> Result<(), ZfsError> {
    if fs.is_empty() {
        return Err(ZfsError::InvalidArgument(
            "filesystem argument must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_rel_version(rel_name: &str) -> Result<(), ZfsError> {
    crate::zfs::version::validate_rel_name(rel_name)
        .map(|_| ())
        .map_err(|e| ZfsError::InvalidArgument(e.to_string()))
}

// per-pool cache for the extensible_dataset feature state; pool features
// are only ever switched on, so a cached value stays valid
static POOL_RESUME_SUPPORT: Lazy<std::sync::Mutex<HashMap<String, bool>>> =
    Lazy::new(|| std::sync::Mutex::new(HashMap::new()));

fn cached_pool_resume_support(pool: &str) -> Option<bool> {
    POOL_RESUME_SUPPORT
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(pool)
        .copied()
}

fn cache_pool_resume_support(pool: &str, supported: bool) {
    POOL_RESUME_SUPPORT
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(pool.to_string(), supported);
}

/// Interpret the value of `feature@extensible_dataset`: a feature that is
/// enabled or already active allows saving partial receive state.
fn pool_feature_enables_resume(value: &str) -> bool {
    matches!(value.trim(), "enabled" | "active")
}

// =============================================================================
// Output parsing
// =============================================================================

/// Recognise the tool's "dataset does not exist" / "no such pool or
/// dataset" stderr and extract the offending path.
fn parse_dataset_does_not_exist(stderr: &str) -> Option<String> {
    for line in stderr.lines() {
        let Some(rest) = line.strip_prefix("cannot open '") else {
            continue;
        };
        let (path, rest) = rest.split_once('\'')?;
        let reason = rest.strip_prefix(": ")?;
        if reason.starts_with("dataset does not exist")
            || reason.starts_with("no such pool or dataset")
        {
            return Some(path.to_string());
        }
    }
    None
}

fn parse_get_output(
    stdout: &str,
    expected_props: usize,
    sources: PropertySource,
) -> Result<HashMap<String, String>, ZfsError> {
    let lines: Vec<&str> = stdout.lines().collect();
    if lines.len() != expected_props {
        return Err(ZfsError::MalformedOutput(format!(
            "zfs get returned {} lines, expected {}",
            lines.len(),
            expected_props
        )));
    }
    let mut res = HashMap::with_capacity(lines.len());
    for line in lines {
        let fields: Vec<&str> = line.split('\t').collect();
        let &[prop, value, source] = fields.as_slice() else {
            return Err(ZfsError::MalformedOutput(
                "zfs get did not return property,value,source tuples".to_string(),
            ));
        };
        if sources.accepts(source) {
            res.insert(prop.to_string(), value.to_string());
        }
    }
    Ok(res)
}

fn parse_version_list(stdout: &str, fs: &str) -> Result<Vec<FilesystemVersion>, ZfsError> {
    let mut versions = Vec::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        let &[name, guid, createtxg, creation] = fields.as_slice() else {
            return Err(ZfsError::MalformedOutput(format!(
                "unexpected version list line {line:?}"
            )));
        };
        let (list_fs, kind, short_name) = decompose_version_string(name)
            .map_err(|e| ZfsError::MalformedOutput(e.to_string()))?;
        if list_fs != fs {
            // -d 1 also lists children's versions on some versions of the
            // tool; they are not versions of `fs`
            continue;
        }
        let parse_u64 = |field: &str, what: &str| {
            field.parse::<u64>().map_err(|_| {
                ZfsError::MalformedOutput(format!("bad {what} value {field:?} in line {line:?}"))
            })
        };
        versions.push(FilesystemVersion {
            kind,
            name: short_name,
            guid: parse_u64(guid, "guid")?,
            createtxg: parse_u64(createtxg, "createtxg")?,
            creation: parse_u64(creation, "creation")?,
        });
    }
    Ok(versions)
}

fn parse_holds_output(stdout: &str) -> Vec<String> {
    // zfs holds -H: NAME <tab> TAG <tab> TIMESTAMP
    stdout
        .lines()
        .filter_map(|line| line.split('\t').nth(1))
        .map(str::to_string)
        .collect()
}

// =============================================================================
// VolumeManager implementation
// =============================================================================

#[async_trait]
impl VolumeManager for ZfsCli {
    async fn list_filesystems(
        &self,
        filter: &dyn DatasetFilter,
    ) -> Result<Vec<DatasetPath>, ZfsError> {
        let output = self
            .run(
                "list",
                &["list", "-H", "-p", "-o", "name", "-t", "filesystem,volume"],
            )
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut paths = Vec::new();
        for line in stdout.lines() {
            let path = DatasetPath::parse(line)?;
            let pass = filter
                .filter(&path)
                .map_err(|e| ZfsError::InvalidArgument(format!("dataset filter failed: {e:#}")))?;
            if pass {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    async fn list_filesystem_versions(
        &self,
        fs: &DatasetPath,
    ) -> Result<Vec<FilesystemVersion>, ZfsError> {
        let fs_str = fs.to_string();
        validate_filesystem_argument(&fs_str)?;
        let output = self
            .run(
                "list versions",
                &[
                    "list",
                    "-H",
                    "-p",
                    "-o",
                    "name,guid,createtxg,creation",
                    "-t",
                    "snapshot,bookmark",
                    "-r",
                    "-d",
                    "1",
                    &fs_str,
                ],
            )
            .await?;
        parse_version_list(&String::from_utf8_lossy(&output.stdout), &fs_str)
    }

    async fn send_dry(&self, args: &SendArgs) -> Result<DrySendInfo, ZfsError> {
        crate::zfs::send::zfs_send_dry(self, args).await
    }

    async fn send(
        &self,
        args: &SendArgs,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn StreamCopier>, ZfsError> {
        crate::zfs::send::zfs_send(self, args, cancel).await
    }

    async fn recv(
        &self,
        fs: &DatasetPath,
        stream: &mut dyn StreamCopier,
        opts: RecvOptions,
        cancel: &CancellationToken,
    ) -> Result<(), ZfsError> {
        crate::zfs::recv::zfs_recv(self, fs, stream, opts, cancel).await
    }

    async fn recv_resume_token(&self, fs: &DatasetPath) -> Result<Option<String>, ZfsError> {
        if !self.resume_recv_supported(fs).await? {
            return Ok(None);
        }
        let props = self
            .get_props(
                &fs.to_string(),
                &["receive_resume_token"],
                PropertySource::all(),
            )
            .await?;
        Ok(props
            .get("receive_resume_token")
            .filter(|v| !v.is_empty() && *v != "-")
            .cloned())
    }

    async fn recv_clear_resume_token(&self, fs: &DatasetPath) -> Result<(), ZfsError> {
        crate::zfs::recv::zfs_recv_clear_resume_token(self, fs).await
    }

    async fn hold(&self, fs: &DatasetPath, snap: &str, tag: &str) -> Result<(), ZfsError> {
        let fs_str = fs.to_string();
        validate_filesystem_argument(&fs_str)?;
        if snap.is_empty() || tag.is_empty() {
            return Err(ZfsError::InvalidArgument(
                "hold needs a snapshot name and a tag".to_string(),
            ));
        }
        let target = format!("{fs_str}@{snap}");
        self.run("hold", &["hold", tag, &target]).await?;
        Ok(())
    }

    async fn release(&self, fs: &DatasetPath, snap: &str, tag: &str) -> Result<(), ZfsError> {
        let fs_str = fs.to_string();
        validate_filesystem_argument(&fs_str)?;
        let target = format!("{fs_str}@{snap}");
        self.run("release", &["release", tag, &target]).await?;
        Ok(())
    }

    async fn holds(&self, fs: &DatasetPath, snap: &str) -> Result<Vec<String>, ZfsError> {
        let target = format!("{fs}@{snap}");
        let output = self.run("holds", &["holds", "-H", &target]).await?;
        Ok(parse_holds_output(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn bookmark(
        &self,
        fs: &DatasetPath,
        snap: &str,
        bookmark: &str,
    ) -> Result<(), ZfsError> {
        let snap_path = format!("{fs}@{snap}");
        let bookmark_path = format!("{fs}#{bookmark}");
        tracing::debug!(snapshot = %snap_path, bookmark = %bookmark_path, "bookmark");
        self.run("bookmark", &["bookmark", &snap_path, &bookmark_path])
            .await?;
        Ok(())
    }

    async fn destroy(&self, path: &str) -> Result<(), ZfsError> {
        validate_filesystem_argument(path)?;
        match self.run("destroy", &["destroy", path]).await {
            Ok(_) => Ok(()),
            Err(ZfsError::OperationFailed {
                context,
                status,
                stderr,
            }) => {
                if let Some(batch_err) = try_parse_destroy_snapshots_error(path, &stderr) {
                    return Err(ZfsError::DestroySnapshots(batch_err));
                }
                Err(ZfsError::OperationFailed {
                    context,
                    status,
                    stderr,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn rollback(
        &self,
        fs: &DatasetPath,
        to: &FilesystemVersion,
        destroy_more_recent: bool,
    ) -> Result<(), ZfsError> {
        if to.kind != VersionType::Snapshot {
            return Err(ZfsError::InvalidArgument(format!(
                "can only roll back to snapshots, got {}",
                to.to_abs_path(fs)
            )));
        }
        let target = to.to_abs_path(fs);
        let mut args = vec!["rollback"];
        if destroy_more_recent {
            args.push("-r");
        }
        args.push(&target);
        self.run("rollback", &args).await?;
        Ok(())
    }

    async fn get_guid(&self, fs: &str, rel_name: &str) -> Result<u64, ZfsError> {
        validate_filesystem_argument(fs)?;
        validate_rel_version(rel_name)?;
        let path = format!("{fs}{rel_name}");
        let props = self
            .get_props(&path, &["guid"], PropertySource::all())
            .await?;
        let raw = props
            .get("guid")
            .ok_or_else(|| ZfsError::MalformedOutput("zfs get returned no guid".to_string()))?;
        raw.parse::<u64>()
            .map_err(|_| ZfsError::MalformedOutput(format!("bad guid value {raw:?}")))
    }

    async fn get_createtxg_and_guid(&self, path: &str) -> Result<CreateTxgAndGuid, ZfsError> {
        let props = self
            .get_props(path, &["createtxg", "guid"], PropertySource::all())
            .await?;
        let number = |prop: &str| -> Result<u64, ZfsError> {
            let raw = props.get(prop).ok_or_else(|| {
                ZfsError::MalformedOutput(format!("zfs get returned no {prop}"))
            })?;
            raw.parse::<u64>()
                .map_err(|_| ZfsError::MalformedOutput(format!("bad {prop} value {raw:?}")))
        };
        Ok(CreateTxgAndGuid {
            createtxg: number("createtxg")?,
            guid: number("guid")?,
        })
    }

    async fn encryption_enabled(&self, fs: &str) -> Result<bool, ZfsError> {
        crate::zfs::encryption::encryption_enabled(self, fs).await
    }

    async fn placeholder_state(&self, path: &DatasetPath) -> Result<PlaceholderState, ZfsError> {
        crate::zfs::placeholder::placeholder_state(self, path).await
    }

    async fn create_placeholder(&self, path: &DatasetPath) -> Result<(), ZfsError> {
        crate::zfs::placeholder::create_placeholder(self, path).await
    }

    async fn set_placeholder(
        &self,
        path: &DatasetPath,
        is_placeholder: bool,
    ) -> Result<(), ZfsError> {
        crate::zfs::placeholder::set_placeholder(self, path, is_placeholder).await
    }

    async fn resume_send_supported(&self) -> Result<bool, ZfsError> {
        static PROBE: tokio::sync::OnceCell<bool> = tokio::sync::OnceCell::const_new();
        PROBE
            .get_or_try_init(|| async {
                let usage = self.probe_usage("send").await?;
                Ok(usage.contains("-t "))
            })
            .await
            .map(|supported| *supported)
    }

    async fn resume_recv_supported(&self, fs: &DatasetPath) -> Result<bool, ZfsError> {
        // the tool must know `recv -s` at all
        static PROBE: tokio::sync::OnceCell<bool> = tokio::sync::OnceCell::const_new();
        let tool_supports = PROBE
            .get_or_try_init(|| async {
                let usage = self.probe_usage("receive").await?;
                Ok::<bool, ZfsError>(usage.contains("-s ") || usage.contains("[-s]"))
            })
            .await
            .map(|supported| *supported)?;
        if !tool_supports {
            return Ok(false);
        }

        // saving partial receive state additionally needs the
        // extensible_dataset feature on the pool backing `fs`
        let pool = fs.pool().ok_or_else(|| {
            ZfsError::InvalidArgument("filesystem must not be empty".to_string())
        })?;
        if let Some(supported) = cached_pool_resume_support(pool) {
            return Ok(supported);
        }
        let output = self
            .zpool_command()
            .args(["get", "-H", "-o", "value", "feature@extensible_dataset", pool])
            .output()
            .await?;
        // a platform without pool features cannot save partial receive
        // state either, so any failure here means "no"
        let supported = output.status.success()
            && pool_feature_enables_resume(&String::from_utf8_lossy(&output.stdout));
        cache_pool_resume_support(pool, supported);
        Ok(supported)
    }

    async fn parse_resume_token(&self, token: &str) -> Result<ResumeToken, ResumeTokenError> {
        if token.is_empty() {
            return Err(ResumeTokenError::Parsing("empty token".to_string()));
        }
        let output = self
            .command()
            .args(["send", "-nvt", token])
            .output()
            .await
            .map_err(|e| ResumeTokenError::Other(format!("cannot run zfs send -nvt: {e}")))?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if combined.contains("resume token contents") {
            return ResumeToken::parse_nv_output(&combined);
        }
        if combined.contains("corrupt") {
            return Err(ResumeTokenError::Corrupt(first_line(&combined)));
        }
        if combined.contains("usage:") || combined.contains("invalid option") {
            return Err(ResumeTokenError::DecodingNotSupported);
        }
        Err(ResumeTokenError::Parsing(first_line(&combined)))
    }
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dataset_does_not_exist() {
        let stderr = "cannot open 'tank/does/not/exist': dataset does not exist\n";
        assert_eq!(
            parse_dataset_does_not_exist(stderr).as_deref(),
            Some("tank/does/not/exist")
        );
        let stderr = "cannot open 'nopool': no such pool or dataset\n";
        assert_eq!(parse_dataset_does_not_exist(stderr).as_deref(), Some("nopool"));
        assert_eq!(parse_dataset_does_not_exist("cannot open 'x': permission denied"), None);
        assert_eq!(parse_dataset_does_not_exist("internal error"), None);
    }

    #[test]
    fn test_parse_get_output_filters_sources() {
        let stdout = "zrepl:placeholder\ton\tlocal\n";
        let props = parse_get_output(stdout, 1, PropertySource::LOCAL).unwrap();
        assert_eq!(props.get("zrepl:placeholder").map(String::as_str), Some("on"));

        let stdout = "zrepl:placeholder\ton\tinherited from tank\n";
        let props = parse_get_output(stdout, 1, PropertySource::LOCAL).unwrap();
        assert!(props.is_empty());

        let props = parse_get_output(stdout, 1, PropertySource::all()).unwrap();
        assert_eq!(props.len(), 1);
    }

    #[test]
    fn test_parse_get_output_line_count_mismatch() {
        assert!(matches!(
            parse_get_output("a\tb\tlocal\n", 2, PropertySource::all()),
            Err(ZfsError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_parse_version_list() {
        let stdout = "tank/a@s1\t111\t5\t1700000000\n\
                      tank/a#cursor\t111\t5\t1700000000\n\
                      tank/a@s2\t222\t9\t1700000500\n";
        let versions = parse_version_list(stdout, "tank/a").unwrap();
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0].kind, VersionType::Snapshot);
        assert_eq!(versions[0].name, "s1");
        assert_eq!(versions[1].kind, VersionType::Bookmark);
        assert_eq!(versions[1].guid, 111);
        assert_eq!(versions[2].createtxg, 9);
    }

    #[test]
    fn test_parse_version_list_skips_other_filesystems() {
        let stdout = "tank/a@s1\t1\t2\t3\ntank/a/child@s1\t4\t5\t6\n";
        let versions = parse_version_list(stdout, "tank/a").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].name, "s1");
    }

    #[test]
    fn test_parse_version_list_rejects_garbage() {
        assert!(parse_version_list("tank/a@s1\tx\t2\t3\n", "tank/a").is_err());
        assert!(parse_version_list("one-field-line\n", "tank/a").is_err());
    }

    #[test]
    fn test_parse_holds_output() {
        let stdout = "tank/a@s1\tzrepl_job1\tThu Jan  1 00:00 2026\n\
                      tank/a@s1\texternal\tThu Jan  1 00:01 2026\n";
        assert_eq!(parse_holds_output(stdout), vec!["zrepl_job1", "external"]);
        assert!(parse_holds_output("").is_empty());
    }

    #[test]
    fn test_pool_feature_enables_resume() {
        assert!(pool_feature_enables_resume("enabled"));
        assert!(pool_feature_enables_resume("active\n"));
        assert!(!pool_feature_enables_resume("disabled"));
        assert!(!pool_feature_enables_resume("-"));
        assert!(!pool_feature_enables_resume(""));
    }

    #[test]
    fn test_property_source_accepts() {
        assert!(PropertySource::LOCAL.accepts("local"));
        assert!(!PropertySource::LOCAL.accepts("inherited from tank"));
        assert!(PropertySource::INHERITED.accepts("inherited from tank"));
        assert!(PropertySource::NONE.accepts("-"));
        assert!(PropertySource::all().accepts("anything"));
    }
}
