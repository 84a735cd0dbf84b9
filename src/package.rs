use anyhow::{Result, Context};
use sha2::{Sha256, Digest};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::debug;
use crate::config::SignerConfig;
use crate::error::SignError;
use crate::fetch::Fetcher;

/// Name and version selecting an unsigned package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageId {
    name: String,
    version: String,
}

impl PackageId {
    /// Create a package identity, rejecting values that would escape a directory
    pub fn new(name: &str, version: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(SignError::InvalidPackage("package name cannot be empty".to_string()).into());
        }
        if name == "." || name == ".."
            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(SignError::InvalidPackage(format!(
                "package name {:?} may only contain alphanumerics, '-', '_' and '.'",
                name
            )).into());
        }

        if version.is_empty() {
            return Err(SignError::InvalidPackage("version cannot be empty".to_string()).into());
        }
        if version.contains('/') || version.contains('\\') || version.contains("..") {
            return Err(SignError::InvalidPackage(format!("version {:?} is not a plain identifier", version)).into());
        }

        Ok(PackageId {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Archive filename, both remotely and in the output directory
    pub fn archive_name(&self) -> String {
        format!("{}.tar", self.name)
    }
}

/// An unsigned package tree extracted into a run-private scratch directory.
///
/// The scratch directory is removed by [`UnsignedPackage::cleanup`], or when
/// the value is dropped on an error path.
pub struct UnsignedPackage {
    id: PackageId,
    scratch: TempDir,
}

impl UnsignedPackage {
    /// Download `<version>/<name>.tar` and extract it into a fresh scratch directory
    pub fn fetch(fetcher: &dyn Fetcher, config: &SignerConfig, id: PackageId) -> Result<Self> {
        let url = config.package_url(id.name(), id.version());
        println!("fetching {}/{}...", id.version(), id.archive_name());

        let download = NamedTempFile::new()
            .with_context(|| "Failed to create temporary download file")?;
        fetcher.fetch(&url, download.path())?;

        // The downloaded tar goes away with `download` once extracted
        Self::from_archive(id, download.path())
    }

    /// Extract an already-present tar archive into a fresh scratch directory
    pub fn from_archive(id: PackageId, archive_path: &Path) -> Result<Self> {
        let scratch = TempDir::new()
            .with_context(|| "Failed to create temporary directory")?;

        let file = fs::File::open(archive_path)
            .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;

        tar::Archive::new(file)
            .unpack(scratch.path())
            .map_err(|e| SignError::archive(id.archive_name(), e))?;

        debug!(package = id.name(), scratch = %scratch.path().display(), "extracted package");
        Ok(UnsignedPackage { id, scratch })
    }

    pub fn id(&self) -> &PackageId {
        &self.id
    }

    /// Root of the extracted tree (the scratch directory itself)
    pub fn root(&self) -> &Path {
        self.scratch.path()
    }

    /// Write `<output_dir>/<name>.tar` holding the `<name>/` tree from the scratch root
    pub fn repackage(&self, output_dir: &Path) -> Result<PathBuf> {
        let package_dir = self.root().join(self.id.name());
        if !package_dir.is_dir() {
            return Err(SignError::archive(
                self.id.archive_name(),
                format!("no top-level '{}' directory", self.id.name()),
            ).into());
        }

        let package_path = output_dir.join(self.id.archive_name());
        println!("creating {}...", package_path.display());

        // Staged beside the destination and renamed into place; a failure leaves no partial tar
        let staging = NamedTempFile::new_in(output_dir)
            .with_context(|| format!("Failed to create temporary package in: {}", output_dir.display()))?;

        let mut builder = tar::Builder::new(staging);
        builder.follow_symlinks(false);
        builder.append_dir_all(self.id.name(), &package_dir)
            .with_context(|| format!("Failed to add {} to archive", package_dir.display()))?;
        let staging = builder.into_inner()
            .with_context(|| format!("Failed to finish archive: {}", package_path.display()))?;

        // NamedTempFile is created 0600
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(staging.path(), fs::Permissions::from_mode(0o644))
                .with_context(|| format!("Failed to set permissions on: {}", staging.path().display()))?;
        }

        staging.persist(&package_path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to create package: {}", package_path.display()))?;

        Ok(package_path)
    }

    /// Remove the scratch directory, reporting any failure
    pub fn cleanup(self) -> Result<()> {
        let path = self.scratch.path().to_path_buf();
        self.scratch.close()
            .with_context(|| format!("Failed to remove scratch directory: {}", path.display()))
    }
}

/// Calculate SHA256 hash of a file
pub fn calculate_hash(file_path: &Path) -> Result<String> {
    let mut file = fs::File::open(file_path)
        .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| "Failed to read file for hashing")?;

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
pub(crate) mod testing {
    /// Build an in-memory tar from `(path, contents)` pairs
    pub fn tar_of(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, contents.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    /// List `(path, contents)` of regular files in a tar file
    pub fn tar_files(path: &std::path::Path) -> Vec<(String, Vec<u8>)> {
        use std::io::Read;

        let mut archive = tar::Archive::new(std::fs::File::open(path).unwrap());
        let mut files = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.header().entry_type().is_file() {
                let name = entry.path().unwrap().to_string_lossy().replace('\\', "/");
                let mut contents = Vec::new();
                entry.read_to_end(&mut contents).unwrap();
                files.push((name, contents));
            }
        }
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{tar_files, tar_of};
    use super::*;
    use crate::fetch::testing::StaticFetcher;

    #[test]
    fn test_package_id_validation() {
        let id = PackageId::new("xenvif", "9.1.0").unwrap();
        assert_eq!(id.name(), "xenvif");
        assert_eq!(id.version(), "9.1.0");
        assert_eq!(id.archive_name(), "xenvif.tar");

        assert!(PackageId::new("", "9.1.0").is_err());
        assert!(PackageId::new("..", "9.1.0").is_err());
        assert!(PackageId::new("xen/vif", "9.1.0").is_err());
        assert!(PackageId::new("xenvif", "").is_err());
        assert!(PackageId::new("xenvif", "../9.1.0").is_err());

        let err = PackageId::new("xenvif", "9/1").unwrap_err();
        assert!(matches!(err.downcast_ref::<SignError>(), Some(SignError::InvalidPackage(_))));
    }

    #[test]
    fn test_fetch_extracts_into_scratch() {
        let config = SignerConfig::default();
        let url = config.package_url("xenvif", "9.1.0");
        let fetcher = StaticFetcher::default().with(&url, tar_of(&[
            ("xenvif/x64/xenvif.sys", "driver"),
            ("xenvif/x64/xenvif.inf", "[Version]"),
        ]));

        let id = PackageId::new("xenvif", "9.1.0").unwrap();
        let package = UnsignedPackage::fetch(&fetcher, &config, id).unwrap();

        assert_eq!(fetcher.requested.borrow().as_slice(), [url]);
        assert_eq!(fs::read(package.root().join("xenvif/x64/xenvif.sys")).unwrap(), b"driver");
        assert_eq!(package.id().name(), "xenvif");
    }

    #[test]
    fn test_corrupt_archive_is_archive_error() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("xenvif.tar");
        // A header block whose checksum cannot match
        fs::write(&archive, vec![0x41u8; 1024]).unwrap();

        let id = PackageId::new("xenvif", "9.1.0").unwrap();
        let err = UnsignedPackage::from_archive(id, &archive).err().unwrap();
        assert!(matches!(err.downcast_ref::<SignError>(), Some(SignError::Archive { .. })));
    }

    #[test]
    fn test_repackage_and_cleanup() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("in.tar");
        fs::write(&archive, tar_of(&[
            ("xenbus/x86/xenbus.dll", "dll"),
            ("xenbus/README", "readme"),
        ])).unwrap();

        let id = PackageId::new("xenbus", "9.0.0").unwrap();
        let package = UnsignedPackage::from_archive(id, &archive).unwrap();
        let scratch = package.root().to_path_buf();

        let output_dir = temp_dir.path().join("out");
        fs::create_dir_all(&output_dir).unwrap();
        let output = package.repackage(&output_dir).unwrap();
        assert_eq!(output, output_dir.join("xenbus.tar"));

        assert_eq!(tar_files(&output), vec![
            ("xenbus/README".to_string(), b"readme".to_vec()),
            ("xenbus/x86/xenbus.dll".to_string(), b"dll".to_vec()),
        ]);

        // Only the finished archive is left in the output directory
        assert_eq!(fs::read_dir(&output_dir).unwrap().count(), 1);

        package.cleanup().unwrap();
        assert!(!scratch.exists());
    }

    #[test]
    fn test_failed_repackage_leaves_no_partial_output() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("in.tar");
        fs::write(&archive, tar_of(&[("xenbus/xenbus.sys", "sys")])).unwrap();

        let id = PackageId::new("xenbus", "9.0.0").unwrap();
        let package = UnsignedPackage::from_archive(id, &archive).unwrap();

        // A non-empty directory squatting on the destination makes the final rename fail
        let output_dir = temp_dir.path().join("out");
        fs::create_dir_all(output_dir.join("xenbus.tar")).unwrap();
        fs::write(output_dir.join("xenbus.tar").join("keep"), "x").unwrap();

        assert!(package.repackage(&output_dir).is_err());

        let names: Vec<_> = fs::read_dir(&output_dir).unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("xenbus.tar")]);
        assert!(output_dir.join("xenbus.tar").is_dir());
    }

    #[test]
    fn test_repackage_requires_top_level_directory() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("in.tar");
        fs::write(&archive, tar_of(&[("other/file.sys", "x")])).unwrap();

        let id = PackageId::new("xenbus", "9.0.0").unwrap();
        let package = UnsignedPackage::from_archive(id, &archive).unwrap();

        let err = package.repackage(temp_dir.path()).unwrap_err();
        assert!(matches!(err.downcast_ref::<SignError>(), Some(SignError::Archive { .. })));
        assert!(!temp_dir.path().join("xenbus.tar").exists());
    }

    #[test]
    fn test_calculate_hash() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.txt");
        fs::write(&test_file, "Hello, World!").unwrap();

        let hash = calculate_hash(&test_file).unwrap();
        // This is the SHA256 of "Hello, World!"
        assert_eq!(hash, "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f");
    }
}
