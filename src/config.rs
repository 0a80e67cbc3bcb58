//! Configuration - which providers exist and what paths they sync.

use std::collections::BTreeMap;
use std::{fs, io};

use anyhow::{anyhow, ensure, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde_derive::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub providers: BTreeMap<String, Provider>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// A local directory standing in for a bucket.
    Folder,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Provider {
    pub kind: ProviderKind,
    /// Where a folder provider keeps its objects.
    #[serde(default)]
    pub store_path: Option<Utf8PathBuf>,
    /// The directory to sync. Absolute, trailing slash.
    pub local_path: String,
    /// The bucket prefix to sync against. Trailing slash.
    pub cloud_path: String,
    /// Prefix for the two history snapshot files
    /// (`.local` and `.cloud` are appended).
    pub history_path: Utf8PathBuf,
    /// Credentials, endpoints, and whatever else a provider needs.
    /// Opaque to the sync core.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Provider {
    /// Normalizes the trailing slashes and rejects configurations the sync
    /// loop couldn't possibly run with.
    pub fn validated(mut self) -> Result<Provider> {
        if !self.local_path.ends_with('/') {
            self.local_path.push('/');
        }
        if !self.cloud_path.ends_with('/') {
            self.cloud_path.push('/');
        }
        ensure!(
            Utf8Path::new(&self.local_path).is_absolute(),
            "local_path must be absolute, got {}",
            self.local_path
        );
        ensure!(
            !self.history_path.as_str().is_empty(),
            "history_path can't be empty"
        );
        Ok(self)
    }
}

/// Loads the given config file, or the default one
/// (`~/.config/bucketsync.toml`, which may not exist yet).
pub fn load(path: Option<&Utf8Path>) -> Result<Configuration> {
    let confpath = match path {
        Some(p) => p.to_owned(),
        None => default_path()?,
    };
    let s = match fs::read_to_string(&confpath) {
        Err(e) if e.kind() == io::ErrorKind::NotFound && path.is_none() => {
            return Ok(Configuration::default())
        }
        found => found,
    }
    .with_context(|| format!("Couldn't open {confpath}"))?;
    let conf = toml::from_str(&s).with_context(|| format!("Couldn't parse {confpath}"))?;
    Ok(conf)
}

fn default_path() -> Result<Utf8PathBuf> {
    let mut confpath: Utf8PathBuf = home::home_dir()
        .ok_or_else(|| anyhow!("Can't find home directory"))?
        .try_into()
        .context("Home directory isn't UTF-8")?;
    confpath.extend([".config", "bucketsync.toml"]);
    Ok(confpath)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_and_validate() -> Result<()> {
        let conf: Configuration = toml::from_str(
            r#"
            [providers.mirror]
            kind = "folder"
            store_path = "/srv/bucket"
            local_path = "/home/me/sync"
            cloud_path = "mirror/"
            history_path = "/home/me/.cache/bucketsync/mirror.history"

            [providers.mirror.options]
            region = "here"
            "#,
        )?;
        let provider = conf.providers["mirror"].clone().validated()?;
        assert_eq!(provider.kind, ProviderKind::Folder);
        // Trailing slashes appear whether or not the user typed them.
        assert_eq!(provider.local_path, "/home/me/sync/");
        assert_eq!(provider.cloud_path, "mirror/");
        assert_eq!(provider.options["region"], "here");
        Ok(())
    }

    #[test]
    fn relative_local_path_is_rejected() {
        let provider = Provider {
            kind: ProviderKind::Folder,
            store_path: None,
            local_path: "relative/path/".to_owned(),
            cloud_path: "mirror/".to_owned(),
            history_path: Utf8PathBuf::from("/tmp/h"),
            options: BTreeMap::new(),
        };
        assert!(provider.validated().is_err());
    }

    #[test]
    fn missing_default_config_is_empty() -> Result<()> {
        // Pointing at an explicit missing file is an error, though.
        assert!(load(Some(Utf8Path::new("/no/such/config.toml"))).is_err());
        Ok(())
    }
}
