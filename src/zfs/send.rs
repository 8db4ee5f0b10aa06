//! Send arguments and the send / dry-send operations.
//!
//! [`SendArgs`] describes one send operation. Building the CLI argument
//! vector from it is security sensitive: a validated resume token takes
//! precedence over everything else because the token *is* the operation,
//! and the raw flag must only ever be emitted for a send that was checked
//! against the source's encryption state.

use tokio_util::sync::CancellationToken;

use crate::zfs::cli::{ZfsCli, SEND_PIPE_CAPACITY_HINT};
use crate::zfs::copier::{SendStream, StreamCopier};
use crate::zfs::error::ZfsError;
use crate::zfs::path::DatasetPath;
use crate::zfs::version::{decompose_version_string, validate_rel_name};

/// One endpoint of a send operation: a relative version name plus the GUID
/// the caller resolved for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendArgVersion {
    /// Relative name including the delimiter, e.g. `@snap` or `#bookmark`.
    pub rel_name: String,
    pub guid: u64,
}

impl SendArgVersion {
    pub fn is_bookmark(&self) -> bool {
        self.rel_name.starts_with('#')
    }

    pub fn abs_name(&self, fs: &str) -> String {
        format!("{}{}", fs, self.rel_name)
    }
}

/// Fully resolved arguments of a send operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendArgs {
    pub fs: String,
    /// `None` for a full send.
    pub from: Option<SendArgVersion>,
    pub to: SendArgVersion,
    /// Encrypted raw send.
    pub encrypted: bool,
    /// Validated resume token; takes precedence over `from`/`to` when
    /// building the tool invocation.
    pub resume_token: Option<String>,
}

impl SendArgs {
    /// Syntactic checks: non-empty filesystem path, version names starting
    /// with `@` or `#`.
    pub fn validate_shape(&self) -> Result<(), ZfsError> {
        let dp = DatasetPath::parse(&self.fs)?;
        if dp.is_empty() {
            return Err(ZfsError::InvalidArgument(
                "filesystem must be a non-zero dataset path".to_string(),
            ));
        }
        validate_rel_name(&self.to.rel_name)
            .map_err(|e| ZfsError::InvalidArgument(format!("`to` invalid: {e}")))?;
        if let Some(from) = &self.from {
            validate_rel_name(&from.rel_name)
                .map_err(|e| ZfsError::InvalidArgument(format!("`from` invalid: {e}")))?;
        }
        Ok(())
    }

    /// CLI arguments shared by send and dry-send.
    ///
    /// The resume token must have been validated to describe exactly this
    /// operation before it gets here.
    pub(crate) fn build_common_cli_args(&self) -> Vec<String> {
        if let Some(token) = &self.resume_token {
            return vec!["-t".to_string(), token.clone()];
        }

        let mut args = Vec::with_capacity(4);
        if self.encrypted {
            args.push("-w".to_string());
        }
        if let Some(from) = &self.from {
            args.push("-i".to_string());
            args.push(from.abs_name(&self.fs));
        }
        args.push(self.to.abs_name(&self.fs));
        args
    }
}

// =============================================================================
// Dry send
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrySendType {
    Full,
    Incremental,
}

/// Result of a dry-run send probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrySendInfo {
    pub kind: DrySendType,
    /// Filesystem, parsed from the `to` field.
    pub filesystem: String,
    /// Absolute `from` version; empty for a full send.
    pub from: String,
    /// Absolute `to` version.
    pub to: String,
    /// `-1` when the tool cannot estimate (bookmark incremental source).
    pub size_estimate: i64,
}

impl DrySendInfo {
    /// Parse `zfs send -n -v -P` output. The info line looks like
    ///
    /// ```text
    /// full	zroot/test/a@1	5389768
    /// incremental	zroot/test/a@1	zroot/test/a@2	5383936
    /// ```
    ///
    /// Other lines (`size ...`, warnings) are skipped.
    pub(crate) fn parse(output: &str) -> Result<Self, ZfsError> {
        for line in output.lines() {
            if let Some(info) = Self::parse_info_line(line)? {
                return Ok(info);
            }
        }
        Err(ZfsError::MalformedOutput(format!(
            "no dry-send info line in output {output:?}"
        )))
    }

    fn parse_info_line(line: &str) -> Result<Option<Self>, ZfsError> {
        let fields: Vec<&str> = line.split('\t').collect();
        let (kind, from, to, size) = match fields.as_slice() {
            ["full", to, size] => (DrySendType::Full, "", *to, *size),
            ["incremental", from, to, size] => (DrySendType::Incremental, *from, *to, *size),
            _ => return Ok(None),
        };
        // `to` is always a snapshot; if it doesn't look like one this is
        // not an info line
        if !to.contains('@') {
            return Ok(None);
        }
        let (filesystem, _, _) = decompose_version_string(to)
            .map_err(|e| ZfsError::MalformedOutput(format!("dry-send `to` field: {e}")))?;
        let size_estimate = size.parse::<i64>().map_err(|_| {
            ZfsError::MalformedOutput(format!("cannot parse dry-send size {size:?}"))
        })?;
        Ok(Some(DrySendInfo {
            kind,
            filesystem,
            from: from.to_string(),
            to: to.to_string(),
            size_estimate,
        }))
    }
}

/// Dry-run probe.
///
/// When `from` is a bookmark the tool cannot estimate the stream size (the
/// estimate would need the snapshot's deadlist, which a bookmark no longer
/// has); the info record is synthesised locally with `size_estimate = -1`
/// and the tool is not invoked.
pub(crate) async fn zfs_send_dry(cli: &ZfsCli, args: &SendArgs) -> Result<DrySendInfo, ZfsError> {
    args.validate_shape()?;

    if let Some(from) = &args.from {
        if from.is_bookmark() {
            return Ok(DrySendInfo {
                kind: DrySendType::Incremental,
                filesystem: args.fs.clone(),
                from: from.abs_name(&args.fs),
                to: args.to.abs_name(&args.fs),
                size_estimate: -1,
            });
        }
    }

    let mut cli_args: Vec<String> = vec!["send", "-n", "-v", "-P"]
        .into_iter()
        .map(str::to_string)
        .collect();
    cli_args.extend(args.build_common_cli_args());
    let arg_refs: Vec<&str> = cli_args.iter().map(String::as_str).collect();
    let output = cli.run("send dry-run", &arg_refs).await?;

    // the info line lands on stdout, but some versions of the tool print
    // it to stderr
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    DrySendInfo::parse(&combined)
}

/// Start the send child process and return its stream handle.
pub(crate) async fn zfs_send(
    cli: &ZfsCli,
    args: &SendArgs,
    cancel: &CancellationToken,
) -> Result<Box<dyn StreamCopier>, ZfsError> {
    args.validate_shape()?;

    let mut command = cli.command();
    command.arg("send");
    command.args(args.build_common_cli_args());

    let context = format!("send {}", args.to.abs_name(&args.fs));
    tracing::debug!(context = %context, encrypted = args.encrypted,
        resumed = args.resume_token.is_some(), "starting send");
    let stream = SendStream::spawn(command, context, cancel.child_token())?;
    stream.set_pipe_capacity_hint(*SEND_PIPE_CAPACITY_HINT);
    Ok(Box::new(stream))
}
