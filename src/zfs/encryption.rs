//! Native-encryption feature probing.

use tokio::sync::OnceCell;

use crate::envconst;
use crate::zfs::cli::{PropertySource, ZfsCli};
use crate::zfs::error::ZfsError;

static ENCRYPTION_CLI_SUPPORT: OnceCell<Result<bool, String>> = OnceCell::const_new();

/// Whether the installed tool has native encryption support.
///
/// Feature discovery: a tool with encryption support knows the `load-key`
/// subcommand and mentions `keylocation` in its usage. Probed once per
/// process; `ZREPL_EXPERIMENTAL_ZFS_ENCRYPTION_CLI_SUPPORTED` overrides
/// the probed value.
pub(crate) async fn encryption_cli_supported(cli: &ZfsCli) -> Result<bool, ZfsError> {
    let cached = ENCRYPTION_CLI_SUPPORT
        .get_or_init(|| async {
            let output = cli
                .command()
                .arg("load-key")
                .output()
                .await
                .map_err(|e| format!("encryption cli feature check failed: {e}"))?;
            let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stdout));
            let probed = text.contains("load-key") && text.contains("keylocation");
            let supported =
                envconst::bool_var("ZREPL_EXPERIMENTAL_ZFS_ENCRYPTION_CLI_SUPPORTED", probed);
            tracing::debug!(probed, supported, "encryption cli feature check complete");
            Ok(supported)
        })
        .await;
    cached.clone().map_err(|msg| ZfsError::OperationFailed {
        context: "encryption feature probe".to_string(),
        status: "failed".to_string(),
        stderr: msg,
    })
}

/// Whether `fs` is encrypted. Returns `Ok(false)` when the installation
/// has no encryption support at all.
pub(crate) async fn encryption_enabled(cli: &ZfsCli, fs: &str) -> Result<bool, ZfsError> {
    if !encryption_cli_supported(cli).await? {
        return Ok(false);
    }
    if fs.is_empty() {
        return Err(ZfsError::InvalidArgument(
            "filesystem must not be empty".to_string(),
        ));
    }
    let props = cli
        .get_props(fs, &["encryption"], PropertySource::all())
        .await?;
    match props.get("encryption").map(String::as_str) {
        None | Some("") => Err(ZfsError::MalformedOutput(
            "zfs get returned no value for `encryption`".to_string(),
        )),
        Some("-") => Err(ZfsError::MalformedOutput(
            "`encryption` property should never be \"-\"".to_string(),
        )),
        Some("off") => Ok(false),
        // any cipher name means encryption is on
        Some(_) => Ok(true),
    }
}
