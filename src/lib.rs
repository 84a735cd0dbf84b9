pub mod config;
pub mod error;
pub mod fetch;
pub mod package;
pub mod cert;
pub mod files;
pub mod signtool;
pub mod signer;
pub mod sign;

pub use config::SignerConfig;
pub use error::SignError;
pub use fetch::{Fetcher, HttpFetcher};
pub use package::{PackageId, UnsignedPackage};
pub use cert::Certificate;
pub use signtool::{CodeSigner, SignOutcome, SignTool};
pub use signer::{PackageSigner, SignedPackage};
