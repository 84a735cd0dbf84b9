use anyhow::{Result, Context};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle, TermLike};
use std::fmt::{self, Write as _};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use crate::error::SignError;

/// Something that can place the body of a URL into a local file
pub trait Fetcher {
    /// Download `url` into `dest`, returning the number of bytes written
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Blocking HTTP downloader with a single-line progress readout
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Create a new HTTP fetcher
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .with_context(|| "Failed to build HTTP client")?;

        Ok(Self::with_client(client))
    }

    /// Use an already configured HTTP client
    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        HttpFetcher { client }
    }

    /// `<downloaded>k/<total>k`, or just `<downloaded>k` without a content length
    fn progress_bar(total: Option<u64>, target: ProgressDrawTarget) -> Result<ProgressBar> {
        let bar = ProgressBar::with_draw_target(total, target);
        let style = ProgressStyle::with_template("{kilobytes}")?
            .with_key("kilobytes", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                let _ = match state.len() {
                    Some(len) => write!(w, "{}k/{}k", state.pos() >> 10, len >> 10),
                    None => write!(w, "{}k", state.pos() >> 10),
                };
            });
        bar.set_style(style);
        Ok(bar)
    }
}

/// Draws progress as one line rewritten in place with `\r`, terminal or not
struct LineTerm<W> {
    out: Mutex<W>,
}

impl<W> LineTerm<W> {
    fn new(out: W) -> Self {
        LineTerm { out: Mutex::new(out) }
    }

    fn write_bytes(&self, bytes: &[u8]) -> io::Result<()>
    where
        W: Write,
    {
        let mut out = self.out.lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "progress output poisoned"))?;
        out.write_all(bytes)
    }
}

impl<W> fmt::Debug for LineTerm<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LineTerm")
    }
}

impl<W: Write + Send> TermLike for LineTerm<W> {
    fn width(&self) -> u16 {
        80
    }

    fn move_cursor_up(&self, _n: usize) -> io::Result<()> {
        Ok(())
    }

    fn move_cursor_down(&self, _n: usize) -> io::Result<()> {
        Ok(())
    }

    fn move_cursor_right(&self, _n: usize) -> io::Result<()> {
        Ok(())
    }

    fn move_cursor_left(&self, _n: usize) -> io::Result<()> {
        Ok(())
    }

    fn write_line(&self, s: &str) -> io::Result<()> {
        self.write_bytes(s.as_bytes())?;
        self.write_bytes(b"\n")
    }

    fn write_str(&self, s: &str) -> io::Result<()> {
        self.write_bytes(s.as_bytes())
    }

    fn clear_line(&self) -> io::Result<()> {
        self.write_bytes(b"\r")
    }

    fn flush(&self) -> io::Result<()> {
        let mut out = self.out.lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "progress output poisoned"))?;
        out.flush()
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        debug!(url, dest = %dest.display(), "downloading");

        let response = self.client.get(url)
            .send()
            .map_err(|e| SignError::download(url, e))?;

        if !response.status().is_success() {
            return Err(SignError::download(url, format!("HTTP error {}", response.status())).into());
        }

        let mut file = fs::File::create(dest)
            .with_context(|| format!("Failed to create file: {}", dest.display()))?;

        let target = ProgressDrawTarget::term_like(Box::new(LineTerm::new(io::stdout())));
        let bar = Self::progress_bar(response.content_length(), target)?;
        let mut reader = bar.wrap_read(response);
        let written = std::io::copy(&mut reader, &mut file)
            .map_err(|e| SignError::download(url, e))?;
        bar.finish();

        debug!(url, bytes = written, "download complete");
        Ok(written)
    }
}
