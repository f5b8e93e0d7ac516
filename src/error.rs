use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitshuError {
    #[error("Version {0} not found")]
    VersionNotFound(String),

    #[error("Failed to install GitShu {specifier}: {source}")]
    InstallError {
        specifier: String,
        #[source]
        source: Box<GitshuError>,
    },

    #[error("GitShu {0} is not installed")]
    NotInstalled(String),

    #[error("Command \"{name}\" doesn't exist, run \"gitshu help\" to list commands")]
    UnknownCommand { name: String, available: Vec<String> },

    #[error("Invalid link: {0}")]
    LinkError(String),

    #[error("No version matching \"{0}\" in the registry")]
    UnknownSpecifier(String),

    #[error("Failed to download from {url}: {source}")]
    DownloadFailed {
        url: String,
        source: reqwest::Error,
    },

    #[error("Registry returned {status} for {url}")]
    RegistryStatus { url: String, status: u16 },

    #[error("Checksum verification failed for {file}")]
    ChecksumMismatch { file: String },

    #[error("Failed to extract archive: {0}")]
    ExtractionFailed(String),

    #[error("Invalid GitShu package at {path}: {reason}")]
    InvalidPackage { path: String, reason: String },

    #[error("Command {name} failed with exit code {code}")]
    CommandFailed { name: String, code: i32 },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),
}

impl GitshuError {
    /// Wrap a lower-level failure that happened while installing `specifier`.
    pub fn install(specifier: &str, source: GitshuError) -> Self {
        match source {
            already @ GitshuError::InstallError { .. } => already,
            source => GitshuError::InstallError {
                specifier: specifier.to_string(),
                source: Box::new(source),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, GitshuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_error_wraps_once() {
        let inner = GitshuError::UnknownSpecifier("9.9.9".to_string());
        let wrapped = GitshuError::install("9.9.9", inner);
        let rewrapped = GitshuError::install("latest", wrapped);

        match rewrapped {
            GitshuError::InstallError { specifier, source } => {
                assert_eq!(specifier, "9.9.9");
                assert!(matches!(*source, GitshuError::UnknownSpecifier(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_command_message() {
        let err = GitshuError::UnknownCommand {
            name: "serve".to_string(),
            available: vec!["build".to_string()],
        };
        assert!(err.to_string().contains("\"serve\""));
    }
}
