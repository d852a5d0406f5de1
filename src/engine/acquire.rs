//! First-run download of the prebuilt engine executable.
//!
//! [`EngineAcquirer::ensure_present`] is a no-op when the executable already
//! exists.  Otherwise it asks the release metadata endpoint for the latest
//! assets, picks the archive built for the current platform, downloads it
//! next to the install directory, unpacks it and deletes the archive.
//!
//! There is no retry and no version check: a stale executable is never
//! refreshed, and any failure is reported to the caller once.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Deserialize;
use thiserror::Error;

use crate::config::EngineConfig;

/// GitHub's API rejects requests without a user agent.
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// AcquireError
// ---------------------------------------------------------------------------

/// Why the engine executable could not be made available.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("engine download request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("no release asset matches platform {platform:?}")]
    NoMatchingAsset { platform: String },

    #[error("engine install I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("failed to unpack {}: {source}", .archive.display())]
    Extract {
        archive: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive unpacked but {} is still missing", .0.display())]
    MissingExecutable(PathBuf),
}

// ---------------------------------------------------------------------------
// Release metadata
// ---------------------------------------------------------------------------

/// One downloadable file of a release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

/// What [`EngineAcquirer::ensure_present`] had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// The executable was already on disk; nothing was fetched.
    AlreadyPresent,
    /// The named asset was downloaded and unpacked.
    Downloaded { asset: String },
}

// ---------------------------------------------------------------------------
// EngineAcquirer
// ---------------------------------------------------------------------------

/// Downloads and unpacks the engine release archive.
pub struct EngineAcquirer {
    client: reqwest::blocking::Client,
    release_url: String,
    asset_prefix: String,
    asset_suffix: String,
}

impl std::fmt::Debug for EngineAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAcquirer")
            .field("release_url", &self.release_url)
            .field("asset_prefix", &self.asset_prefix)
            .field("asset_suffix", &self.asset_suffix)
            .finish_non_exhaustive()
    }
}

impl EngineAcquirer {
    /// Build an acquirer whose requests time out after
    /// [`EngineConfig::timeout_secs`].
    pub fn new(config: &EngineConfig) -> Result<Self, AcquireError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self::with_client(config, client))
    }

    /// Use a caller-built client (custom proxy or TLS settings).
    pub fn with_client(config: &EngineConfig, client: reqwest::blocking::Client) -> Self {
        Self {
            client,
            release_url: config.release_url.clone(),
            asset_prefix: config.asset_prefix.clone(),
            asset_suffix: config.asset_suffix.clone(),
        }
    }

    /// Make sure `target` exists, downloading the `platform` build if needed.
    ///
    /// The archive is unpacked into the grandparent of `target`, so an
    /// archive laid out as `precise-engine/precise-engine` lands on a target
    /// of `<root>/precise-engine/precise-engine`.
    ///
    /// Nothing is written to disk unless the asset download succeeds, and
    /// the archive is removed whether or not unpacking works.
    pub fn ensure_present(
        &self,
        target: &Path,
        platform: &str,
    ) -> Result<Acquisition, AcquireError> {
        if target.exists() {
            log::debug!("engine-acquirer: {} already present", target.display());
            return Ok(Acquisition::AlreadyPresent);
        }

        log::info!("engine-acquirer: engine not present, starting download now");

        let assets = self.fetch_assets()?;
        let asset = self
            .select_asset(&assets, platform)
            .ok_or_else(|| AcquireError::NoMatchingAsset {
                platform: platform.to_string(),
            })?;

        log::info!(
            "engine-acquirer: downloading {}, this can take a moment",
            asset.name
        );
        let payload = self.get(&asset.browser_download_url)?.bytes()?;

        let root = install_root(target);
        fs::create_dir_all(&root)?;
        let archive = root.join(&asset.name);
        fs::write(&archive, &payload)?;

        let unpacked = unpack(&archive, &root);
        if let Err(e) = fs::remove_file(&archive) {
            log::warn!(
                "engine-acquirer: could not remove {}: {e}",
                archive.display()
            );
        }
        unpacked.map_err(|source| AcquireError::Extract {
            archive: archive.clone(),
            source,
        })?;

        if !target.exists() {
            return Err(AcquireError::MissingExecutable(target.to_path_buf()));
        }

        log::info!("engine-acquirer: download complete");
        Ok(Acquisition::Downloaded {
            asset: asset.name.clone(),
        })
    }

    /// First asset built for `platform` that follows the naming convention.
    ///
    /// The name becomes the archive's file name under the install root, so
    /// names with path separators are skipped.
    pub fn select_asset<'a>(
        &self,
        assets: &'a [ReleaseAsset],
        platform: &str,
    ) -> Option<&'a ReleaseAsset> {
        assets.iter().find(|a| {
            !a.name.contains(['/', '\\'])
                && a.name.contains(platform)
                && a.name.starts_with(&self.asset_prefix)
                && a.name.ends_with(&self.asset_suffix)
        })
    }

    fn fetch_assets(&self) -> Result<Vec<ReleaseAsset>, AcquireError> {
        let release: Release = self.get(&self.release_url)?.json()?;
        Ok(release.assets)
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, AcquireError> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            log::warn!("engine-acquirer: {url} answered with HTTP {status}");
            return Err(AcquireError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

/// Directory the release archive is unpacked into for a given executable.
pub fn install_root(target: &Path) -> PathBuf {
    target
        .parent()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn unpack(archive: &Path, dest: &Path) -> io::Result<()> {
    let file = fs::File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.unpack(dest)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve `responses` in order, one per connection.
    pub(crate) fn serve(listener: TcpListener, responses: Vec<(u16, Vec<u8>)>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            for (status, body) in responses {
                let Ok((mut conn, _)) = listener.accept() else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match conn.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = format!(
                    "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = conn.write_all(head.as_bytes());
                let _ = conn.write_all(&body);
            }
        })
    }

    fn acquirer_for(release_url: String) -> EngineAcquirer {
        let config = EngineConfig {
            release_url,
            timeout_secs: 10,
            ..EngineConfig::default()
        };
        // Local test servers must not be routed through an ambient proxy.
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .no_proxy()
            .build()
            .unwrap();
        EngineAcquirer::with_client(&config, client)
    }

    fn release_json(port: u16, name: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "tag_name": "v0.3.0",
            "assets": [{
                "name": name,
                "browser_download_url": format!("http://127.0.0.1:{port}/{name}"),
            }],
        }))
        .unwrap()
    }

    fn engine_archive() -> Vec<u8> {
        let mut tar = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::fast(),
        ));
        let body = b"#!/bin/sh\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        tar.append_data(&mut header, "precise-engine/precise-engine", &body[..])
            .unwrap();
        tar.into_inner().unwrap().finish().unwrap()
    }

    fn asset(name: &str) -> ReleaseAsset {
        ReleaseAsset {
            name: name.into(),
            browser_download_url: format!("https://example.invalid/{name}"),
        }
    }

    #[test]
    fn present_binary_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("precise-engine").join("precise-engine");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"bin").unwrap();

        // Port 9 (discard) is never listening locally; any request would fail.
        let acquirer = acquirer_for("http://127.0.0.1:9/releases/latest".into());
        let outcome = acquirer.ensure_present(&target, "x86_64").unwrap();
        assert_eq!(outcome, Acquisition::AlreadyPresent);
    }

    #[test]
    fn select_asset_requires_platform_prefix_and_suffix() {
        let acquirer = acquirer_for("http://127.0.0.1:9/".into());
        let assets = vec![
            asset("precise-engine_0.3.0_armv7l.zip"),
            asset("precise-all_0.3.0_armv7l.tar.gz"),
            asset("precise-engine_0.3.0_x86_64.tar.gz"),
            asset("precise-engine_0.3.0_armv7l.tar.gz"),
            asset("precise-engine_0.3.1_armv7l.tar.gz"),
        ];

        let picked = acquirer.select_asset(&assets, "armv7l").unwrap();
        assert_eq!(picked.name, "precise-engine_0.3.0_armv7l.tar.gz");
        assert!(acquirer.select_asset(&assets, "riscv64").is_none());
    }

    #[test]
    fn select_asset_skips_names_that_leave_the_install_root() {
        let acquirer = acquirer_for("http://127.0.0.1:9/".into());
        let assets = vec![
            asset("precise-engine/../../x86_64.tar.gz"),
            asset("precise-engine\\..\\x86_64.tar.gz"),
            asset("precise-engine_0.3.0_x86_64.tar.gz"),
        ];

        let picked = acquirer.select_asset(&assets, "x86_64").unwrap();
        assert_eq!(picked.name, "precise-engine_0.3.0_x86_64.tar.gz");
        assert!(acquirer.select_asset(&assets[..2], "x86_64").is_none());
    }

    #[test]
    fn install_root_is_grandparent() {
        assert_eq!(
            install_root(Path::new("/opt/wake/precise-engine/precise-engine")),
            PathBuf::from("/opt/wake")
        );
        assert_eq!(install_root(Path::new("precise-engine")), PathBuf::from("."));
    }

    #[test]
    fn metadata_failure_is_reported_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("engine").join("precise-engine").join("precise-engine");

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = serve(listener, vec![(503, b"busy".to_vec())]);

        let acquirer = acquirer_for(format!("http://127.0.0.1:{port}/releases/latest"));
        let err = acquirer.ensure_present(&target, "x86_64").unwrap_err();
        assert!(matches!(err, AcquireError::Status { status: 503, .. }));
        assert!(!dir.path().join("engine").exists());
        server.join().unwrap();
    }

    #[test]
    fn missing_platform_asset_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("precise-engine").join("precise-engine");

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let body = release_json(port, "precise-engine_0.3.0_armv7l.tar.gz");
        let server = serve(listener, vec![(200, body)]);

        let acquirer = acquirer_for(format!("http://127.0.0.1:{port}/releases/latest"));
        let err = acquirer.ensure_present(&target, "x86_64").unwrap_err();
        assert!(matches!(err, AcquireError::NoMatchingAsset { ref platform } if platform == "x86_64"));
        server.join().unwrap();
    }

    #[test]
    fn failed_download_leaves_no_archive_behind() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("engine");
        let target = root.join("precise-engine").join("precise-engine");
        let name = "precise-engine_0.3.0_x86_64.tar.gz";

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = serve(
            listener,
            vec![(200, release_json(port, name)), (404, b"gone".to_vec())],
        );

        let acquirer = acquirer_for(format!("http://127.0.0.1:{port}/releases/latest"));
        let err = acquirer.ensure_present(&target, "x86_64").unwrap_err();
        assert!(matches!(err, AcquireError::Status { status: 404, .. }));
        assert!(!root.join(name).exists());
        assert!(!target.exists());
        server.join().unwrap();
    }

    #[test]
    fn corrupt_archive_is_removed_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("precise-engine").join("precise-engine");
        let name = "precise-engine_0.3.0_x86_64.tar.gz";

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = serve(
            listener,
            vec![(200, release_json(port, name)), (200, b"not a tarball".to_vec())],
        );

        let acquirer = acquirer_for(format!("http://127.0.0.1:{port}/releases/latest"));
        let err = acquirer.ensure_present(&target, "x86_64").unwrap_err();
        assert!(matches!(err, AcquireError::Extract { .. }));
        assert!(!dir.path().join(name).exists());
        server.join().unwrap();
    }

    #[test]
    fn download_unpacks_and_removes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("precise-engine").join("precise-engine");
        let name = "precise-engine_0.3.0_x86_64.tar.gz";

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = serve(
            listener,
            vec![(200, release_json(port, name)), (200, engine_archive())],
        );

        let acquirer = acquirer_for(format!("http://127.0.0.1:{port}/releases/latest"));
        let outcome = acquirer.ensure_present(&target, "x86_64").unwrap();
        assert_eq!(
            outcome,
            Acquisition::Downloaded {
                asset: name.to_string()
            }
        );
        assert!(target.is_file());
        assert!(!dir.path().join(name).exists());
        server.join().unwrap();

        // Second call finds it on disk.
        assert_eq!(
            acquirer.ensure_present(&target, "x86_64").unwrap(),
            Acquisition::AlreadyPresent
        );
    }
}
