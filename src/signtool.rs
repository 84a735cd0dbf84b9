use anyhow::{Result, Context};
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, info, warn};
use crate::config::SignerConfig;
use crate::error::SignError;

/// Windows SDK root
pub const KIT_VAR: &str = "KIT";

/// Host processor architecture, `x86` selects the 32-bit tool
pub const ARCH_VAR: &str = "PROCESSOR_ARCHITECTURE";

/// What a signing step actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutcome {
    /// Every file was signed
    Signed,
    /// There was nothing to sign
    Skipped,
    /// The tool failed and the failure was tolerated
    FailedAllowed(ExitStatus),
}

/// Signs a list of files in place
pub trait CodeSigner {
    /// Sign `files` (relative to `root`), cross-signing with the certificate at `cert`
    fn sign(&self, cert: &Path, root: &Path, files: &[PathBuf]) -> Result<SignOutcome>;
}

/// Authenticode signing through the SDK's `signtool.exe`
#[derive(Debug, Clone)]
pub struct SignTool {
    path: PathBuf,
    timestamp_url: String,
    timestamp_digest: String,
    file_digest: String,
    allow_failure: bool,
}

impl SignTool {
    /// Build from configuration, resolving the tool from the process environment
    pub fn from_config(config: &SignerConfig) -> Result<Self> {
        Self::from_config_with(config, |key| std::env::var(key).ok())
    }

    /// Build from configuration, resolving the tool through `lookup`
    pub fn from_config_with<F>(config: &SignerConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = match &config.sign_tool {
            Some(path) => path.clone(),
            None => Self::resolve_path(lookup)?,
        };
        debug!(tool = %path.display(), "using signing tool");

        Ok(SignTool {
            path,
            timestamp_url: config.timestamp_url.clone(),
            timestamp_digest: config.timestamp_digest.clone(),
            file_digest: config.file_digest.clone(),
            allow_failure: config.allow_sign_failure,
        })
    }

    /// `$KIT/bin/{x86,x64}/signtool.exe`
    pub fn resolve_path<F>(lookup: F) -> Result<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kit = lookup(KIT_VAR).ok_or_else(|| SignError::MissingEnv(KIT_VAR.to_string()))?;
        let arch = lookup(ARCH_VAR).ok_or_else(|| SignError::MissingEnv(ARCH_VAR.to_string()))?;

        let arch_dir = if arch == "x86" { "x86" } else { "x64" };
        Ok(PathBuf::from(kit).join("bin").join(arch_dir).join("signtool.exe"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full argument list for one signing invocation
    pub fn arguments(&self, cert: &Path, files: &[PathBuf]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "sign".into(),
            "/v".into(),
            "/ac".into(),
            cert.as_os_str().to_owned(),
            "/a".into(),
            "/tr".into(),
            self.timestamp_url.as_str().into(),
            "/td".into(),
            self.timestamp_digest.as_str().into(),
            "/fd".into(),
            self.file_digest.as_str().into(),
        ];
        args.extend(files.iter().map(|f| f.as_os_str().to_owned()));
        args
    }
}

impl CodeSigner for SignTool {
    fn sign(&self, cert: &Path, root: &Path, files: &[PathBuf]) -> Result<SignOutcome> {
        if files.is_empty() {
            warn!("no signable files found, skipping {}", self.path.display());
            return Ok(SignOutcome::Skipped);
        }

        println!("signing...");
        info!(files = files.len(), "signing");

        let mut command = Command::new(&self.path);
        command.args(self.arguments(cert, files)).current_dir(root);

        let stdout = std::io::stdout();
        let status = stream_output(&mut command, &mut stdout.lock())?;

        if status.success() {
            Ok(SignOutcome::Signed)
        } else if self.allow_failure {
            warn!(%status, "signing tool failed, continuing");
            Ok(SignOutcome::FailedAllowed(status))
        } else {
            Err(SignError::SignToolFailed(status).into())
        }
    }
}

/// Run `command` with stdout and stderr on one pipe, copying each line to `out` as it arrives
pub fn stream_output(command: &mut Command, out: &mut dyn Write) -> Result<ExitStatus> {
    let (reader, writer) = std::io::pipe()
        .with_context(|| "Failed to create output pipe")?;
    command
        .stdin(Stdio::null())
        .stdout(writer.try_clone().with_context(|| "Failed to clone output pipe")?)
        .stderr(writer);

    let spawned = command.spawn();
    // Drop our write ends so the reader sees EOF once the child exits
    command.stdout(Stdio::null()).stderr(Stdio::null());

    let mut child = spawned.map_err(|source| SignError::Spawn {
        tool: command.get_program().to_string_lossy().into_owned(),
        source,
    })?;

    if let Err(e) = copy_lines(&mut BufReader::new(reader), out) {
        // Nobody is listening any more; don't leave the tool running unreaped
        let _ = child.kill();
        let _ = child.wait();
        return Err(e);
    }

    child.wait()
        .with_context(|| "Failed to wait for signing tool")
}

fn copy_lines(reader: &mut dyn BufRead, out: &mut dyn Write) -> Result<()> {
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)
            .with_context(|| "Failed to read signing tool output")?;
        if read == 0 {
            return Ok(());
        }
        writeln!(out, "{}", String::from_utf8_lossy(&line).trim_end())?;
        out.flush()?;
    }
}
