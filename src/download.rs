use crate::error::{GitshuError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256, Sha512};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Download a file with progress indication
    pub async fn download_with_progress<P: AsRef<Path>>(&self, url: &str, dest: P) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GitshuError::DownloadFailed {
                url: url.to_string(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(GitshuError::RegistryStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let total_size = response.content_length().unwrap_or(0);

        let pb = ProgressBar::new(total_size);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(format!(
            "Downloading {}",
            url.rsplit('/').next().unwrap_or("package")
        ));

        // Write next to the destination and rename once complete
        let dest = dest.as_ref();
        let partial = dest.with_extension("part");
        let mut file = File::create(&partial).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| GitshuError::DownloadFailed {
                url: url.to_string(),
                source: e,
            })?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            pb.set_position(downloaded);
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, dest).await?;

        pb.finish_with_message("Download complete");
        Ok(())
    }

    /// Verify a file against an npm/SRI integrity string (`sha512-<base64>`)
    pub async fn verify_integrity<P: AsRef<Path>>(path: P, integrity: &str) -> Result<bool> {
        let (algorithm, expected) = match integrity.trim().split_once('-') {
            Some(parts) => parts,
            None => return Ok(false),
        };
        let expected = match STANDARD.decode(expected) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(false),
        };

        let computed = match algorithm {
            "sha512" => Self::digest::<Sha512>(path.as_ref()).await?,
            "sha256" => Self::digest::<Sha256>(path.as_ref()).await?,
            _ => return Ok(false),
        };

        Ok(computed == expected)
    }

    async fn digest<D: Digest>(path: &Path) -> Result<Vec<u8>> {
        let mut file = File::open(path).await?;
        let mut hasher = D::new();
        let mut buffer = vec![0; 8192];

        loop {
            let bytes_read = file.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finalize().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_verify_integrity() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), b"hello world")
            .await
            .unwrap();

        let sha256 = format!("sha256-{}", STANDARD.encode(Sha256::digest(b"hello world")));
        let sha512 = format!("sha512-{}", STANDARD.encode(Sha512::digest(b"hello world")));

        assert!(Downloader::verify_integrity(temp_file.path(), &sha256).await.unwrap());
        assert!(Downloader::verify_integrity(temp_file.path(), &sha512).await.unwrap());
        assert!(!Downloader::verify_integrity(temp_file.path(), "sha512-AAAA").await.unwrap());
        assert!(!Downloader::verify_integrity(temp_file.path(), "md5-AAAA").await.unwrap());
    }

    #[tokio::test]
    async fn test_download_with_progress() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/gitshu-3.2.1.tgz")
            .with_status(200)
            .with_body("tarball")
            .create_async()
            .await;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let dest = temp_dir.path().join("gitshu-3.2.1.tgz");
        let downloader = Downloader::new(Duration::from_secs(5)).unwrap();
        downloader
            .download_with_progress(&format!("{}/gitshu-3.2.1.tgz", server.url()), &dest)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(std::fs::read(&dest).unwrap(), b"tarball");
    }

    #[tokio::test]
    async fn test_download_reports_http_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing.tgz")
            .with_status(404)
            .create_async()
            .await;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let downloader = Downloader::new(Duration::from_secs(5)).unwrap();
        let err = downloader
            .download_with_progress(
                &format!("{}/missing.tgz", server.url()),
                temp_dir.path().join("missing.tgz"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GitshuError::RegistryStatus { status: 404, .. }));
    }
}
