use anyhow::{Result, Context};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;
use crate::cert::Certificate;
use crate::config::SignerConfig;
use crate::fetch::Fetcher;
use crate::files::enumerate_signable;
use crate::package::{PackageId, UnsignedPackage};
use crate::signtool::{CodeSigner, SignOutcome};

/// Outcome of a signing run
#[derive(Debug, Clone)]
pub struct SignedPackage {
    /// `<output_dir>/<name>.tar`
    pub path: PathBuf,
    /// Files handed to the signer, relative to the package root
    pub files: Vec<PathBuf>,
    /// What the signing step did with them
    pub outcome: SignOutcome,
}

/// Fetches, signs and repackages driver packages
pub struct PackageSigner<'a> {
    config: &'a SignerConfig,
    fetcher: &'a dyn Fetcher,
    signer: &'a dyn CodeSigner,
}

impl<'a> PackageSigner<'a> {
    /// Create a new package signer
    pub fn new(config: &'a SignerConfig, fetcher: &'a dyn Fetcher, signer: &'a dyn CodeSigner) -> Self {
        PackageSigner { config, fetcher, signer }
    }

    /// Sign one package, leaving `<output_dir>/<name>.tar` behind.
    ///
    /// Scratch state (downloads, extracted tree, certificate) is released on
    /// every exit path; on success it is released explicitly so failures to
    /// remove it are reported.
    pub fn sign(&self, output_dir: &Path, id: PackageId) -> Result<SignedPackage> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

        let package = UnsignedPackage::fetch(self.fetcher, self.config, id)?;

        let cert_dir = TempDir::new()
            .with_context(|| "Failed to create certificate directory")?;
        let cert = Certificate::fetch(self.fetcher, self.config, cert_dir.path())?;

        let files = enumerate_signable(package.root(), &self.config.extensions)?;
        info!(package = package.id().name(), files = files.len(), "found signable files");

        let outcome = self.signer.sign(cert.path(), package.root(), &files)?;
        cert.remove()?;
        cert_dir.close()
            .with_context(|| "Failed to remove certificate directory")?;

        let path = package.repackage(output_dir)?;
        package.cleanup()?;

        Ok(SignedPackage { path, files, outcome })
    }
}
