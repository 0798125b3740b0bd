//! Periodic maintenance: CRL and chain file refresh, credential file download.
//!
//! Every call blocks for the duration of the fetch and is meant to run on a
//! maintenance thread. Failures are returned as they are; retrying is up to the
//! caller's maintenance loop.

use std::path::Path;

use bytes::Bytes;
use tracing::{debug, info};

use crate::{
    cmhf::CmhfKind,
    config::{EngineConfig, SourceConfig},
    engine::SecurityEngine,
    error::{Error, Result},
    transport::{FetchSource, Fetched, Transport},
    Time64,
};

/// Result of a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// no source configured
    Skipped,
    /// the server offered the same file as last time
    Unchanged,
    /// number of new revocation records or trust chain entries
    Updated(usize),
}

#[derive(Debug)]
struct Tracked {
    source: FetchSource,
    /// filename of the last file that was applied successfully
    last_filename: Option<String>,
}

impl Tracked {
    fn new(source: FetchSource) -> Self {
        Self {
            source,
            last_filename: None,
        }
    }

    fn is_unchanged(&self, fetched: &Fetched) -> bool {
        fetched.filename.is_some() && fetched.filename == self.last_filename
    }
}

#[derive(Debug)]
pub struct LifecycleClient<T: Transport> {
    transport: T,
    crl: Option<Tracked>,
    chain: Option<Tracked>,
}

impl<T: Transport> LifecycleClient<T> {
    #[must_use]
    pub fn new(transport: T, crl: Option<FetchSource>, chain: Option<FetchSource>) -> Self {
        Self {
            transport,
            crl: crl.map(Tracked::new),
            chain: chain.map(Tracked::new),
        }
    }

    /// Sources and timeout from the engine configuration; pinned roots are read now
    pub fn from_config(transport: T, config: &EngineConfig) -> Result<Self> {
        let timeout = config.fetch_timeout();
        let load = |source: &Option<SourceConfig>| {
            source
                .as_ref()
                .map(|source| FetchSource::from_config(source, timeout))
                .transpose()
        };
        Ok(Self::new(
            transport,
            load(&config.crl_source)?,
            load(&config.chain_source)?,
        ))
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn fetch_changed(transport: &T, tracked: &Tracked) -> Result<Option<Fetched>> {
        let fetched = transport.fetch(&tracked.source)?;
        if tracked.is_unchanged(&fetched) {
            debug!(url = %tracked.source.url, filename = ?fetched.filename, "file unchanged");
            return Ok(None);
        }
        Ok(Some(fetched))
    }

    /// Downloads the CRL and merges it into the engine's revocation table
    pub fn refresh_crl(&mut self, engine: &SecurityEngine) -> Result<Refresh> {
        let Some(tracked) = self.crl.as_mut() else {
            return Ok(Refresh::Skipped);
        };
        let Some(fetched) = Self::fetch_changed(&self.transport, tracked)? else {
            return Ok(Refresh::Unchanged);
        };
        let added = engine.merge_revocation_blob(&fetched.body)?;
        tracked.last_filename = fetched.filename;
        info!(added, "CRL refreshed");
        Ok(Refresh::Updated(added))
    }

    /// Downloads the chain file and installs its certificates into the trust chain
    pub fn refresh_chain(&mut self, engine: &SecurityEngine, now: Time64) -> Result<Refresh> {
        let Some(tracked) = self.chain.as_mut() else {
            return Ok(Refresh::Skipped);
        };
        let Some(fetched) = Self::fetch_changed(&self.transport, tracked)? else {
            return Ok(Refresh::Unchanged);
        };
        let added = engine.install_chain_file(&fetched.body, now)?;
        tracked.last_filename = fetched.filename;
        info!(added, "chain file refreshed");
        Ok(Refresh::Updated(added))
    }

    /// Downloads one credential file and installs it
    pub fn obtain_credential_file(
        &self,
        engine: &SecurityEngine,
        source: &FetchSource,
        kind: CmhfKind,
    ) -> Result<Bytes> {
        let fetched = self.transport.fetch(source)?;
        engine.install_credential_file(&fetched.body, kind)?;
        Ok(fetched.body)
    }
}

/// Installs a credential file stored on disk
pub fn load_credential_file(engine: &SecurityEngine, path: &Path, kind: CmhfKind) -> Result<()> {
    let file = std::fs::read(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    engine.install_credential_file(&Bytes::from(file), kind)
}

#[cfg(feature = "fetch")]
impl LifecycleClient<crate::transport::HttpsTransport> {
    /// Client fetching over HTTPS with the configured pinned roots
    pub fn https(config: &EngineConfig) -> Result<Self> {
        Self::from_config(crate::transport::HttpsTransport, config)
    }
}
