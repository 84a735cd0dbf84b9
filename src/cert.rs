use anyhow::{Result, Context};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use crate::config::SignerConfig;
use crate::error::SignError;
use crate::fetch::Fetcher;

/// Root certificate extracted for the duration of the signing step.
///
/// The file is deleted by [`Certificate::remove`] or, failing that, on drop.
#[derive(Debug)]
pub struct Certificate {
    path: PathBuf,
    removed: bool,
}

impl Certificate {
    /// Download the certificate archive and extract the configured entry into `dest_dir`
    pub fn fetch(fetcher: &dyn Fetcher, config: &SignerConfig, dest_dir: &Path) -> Result<Self> {
        println!("fetching {}...", config.certificate_name);

        let download = NamedTempFile::new()
            .with_context(|| "Failed to create temporary download file")?;
        fetcher.fetch(&config.certificate_url, download.path())?;

        Self::extract(download.path(), &config.certificate_name, dest_dir)
    }

    /// Extract exactly one named entry from a zip archive into `dest_dir`
    pub fn extract(archive_path: &Path, name: &str, dest_dir: &Path) -> Result<Self> {
        let file = fs::File::open(archive_path)
            .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;

        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| SignError::archive(archive_path.display(), e))?;
        let mut entry = archive.by_name(name)
            .map_err(|e| SignError::archive(archive_path.display(), format!("{}: {}", name, e)))?;

        let path = dest_dir.join(name);
        let mut out = fs::File::create(&path)
            .with_context(|| format!("Failed to create certificate: {}", path.display()))?;
        let cert = Certificate { path, removed: false };

        // Any early return from here on unlinks the partial file via `cert`
        let copied = std::io::copy(&mut entry, &mut out);
        drop(out);
        let written = copied
            .map_err(|e| SignError::archive(archive_path.display(), format!("{}: {}", name, e)))?;

        if written == 0 {
            return Err(SignError::archive(archive_path.display(), format!("{} is empty", name)).into());
        }

        debug!(cert = %cert.path.display(), "extracted certificate");
        Ok(cert)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the certificate file now
    pub fn remove(mut self) -> Result<()> {
        self.removed = true;
        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove certificate: {}", self.path.display()))
    }
}

impl Drop for Certificate {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(cert = %self.path.display(), error = %e, "failed to remove certificate");
        }
    }
}
