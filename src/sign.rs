use anyhow::Result;
use std::path::Path;
use crate::config::SignerConfig;
use crate::fetch::HttpFetcher;
use crate::package::{calculate_hash, PackageId};
use crate::signer::{PackageSigner, SignedPackage};
use crate::signtool::{SignOutcome, SignTool};

/// Sign a driver package and write `<output_dir>/<name>.tar`
pub fn sign_package_cmd(output_dir: &str, name: &str, version: &str, config_path: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => SignerConfig::from_file(path)?,
        None => SignerConfig::default(),
    };

    let id = PackageId::new(name, version)?;

    // Resolve the signing tool up front so a missing SDK fails before any download
    let tool = SignTool::from_config(&config)?;
    let fetcher = HttpFetcher::new()?;

    let signed = PackageSigner::new(&config, &fetcher, &tool)
        .sign(Path::new(output_dir), id)?;

    println!("{}", signing_summary(&signed));
    println!("Package saved to: {}", signed.path.display());
    println!("Package hash: {}", calculate_hash(&signed.path)?);

    Ok(())
}

/// One line describing what the signing step did
fn signing_summary(signed: &SignedPackage) -> String {
    match signed.outcome {
        SignOutcome::Signed => format!("Signed {} files", signed.files.len()),
        SignOutcome::Skipped => "No signable files found, package left unsigned".to_string(),
        SignOutcome::FailedAllowed(status) => format!(
            "Signing tool failed ({}), {} files may be unsigned",
            status,
            signed.files.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn signed(files: usize, outcome: SignOutcome) -> SignedPackage {
        SignedPackage {
            path: PathBuf::from("out/xenvif.tar"),
            files: (0..files).map(|i| PathBuf::from(format!("xenvif/{}.sys", i))).collect(),
            outcome,
        }
    }

    #[test]
    fn test_summary_reports_signed_files() {
        assert_eq!(signing_summary(&signed(3, SignOutcome::Signed)), "Signed 3 files");
    }

    #[test]
    fn test_summary_reports_skipped_signing() {
        let summary = signing_summary(&signed(0, SignOutcome::Skipped));
        assert!(!summary.starts_with("Signed"), "{}", summary);
        assert!(summary.contains("unsigned"));
    }

    #[cfg(unix)]
    #[test]
    fn test_summary_reports_tolerated_failure() {
        use std::os::unix::process::ExitStatusExt;

        let summary = signing_summary(&signed(2, SignOutcome::FailedAllowed(std::process::ExitStatus::from_raw(1 << 8))));
        assert!(!summary.starts_with("Signed"), "{}", summary);
        assert!(summary.contains("failed"));
        assert!(summary.contains("2 files may be unsigned"));
    }
}
