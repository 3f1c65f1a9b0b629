//! # Islands: the framework's own services
//!
//! Islands are auxiliary services the framework depends on (a document
//! database, an artifact store, a router). They are built from a bundled
//! source directory and launched through a [`LongExpedition`], so a failed
//! setup leaves nothing behind.
//!
//! | Alias    | Port  | Default host port | Data volume                  |
//! |----------|-------|-------------------|------------------------------|
//! | `mongo`  | 27017 | 30017             | `/data/db`                   |
//! | `artif`  | 8081  | 30023             | `/var/opt/jfrog/artifactory` |
//! | `nexus`  | 8081  | 30023             | `/nexus-data`                |
//! | `router` | 80    | 30080             | none                         |
//!
//! No island is scalable. An island configured as foreign (`native: false`)
//! is managed by someone else and is never launched.

use crate::captain::{Backend, EngineApi, Handle};
use crate::cargo::Cargo;
use crate::compass::{Compass, IslandCompass};
use crate::constants::{DEFAULT_ISLAND_MB, DEFAULT_MONGO_MB, SECTION_ISLE};
use crate::error::{Error, Result};
use crate::expedition::{Expedition, LaunchOptions, LongExpedition, Mission};
use crate::image::{ImageBuilder, ImageSpec};
use crate::logging::LogContext;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// The known islands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IslandKind {
    Mongo,
    Artif,
    Nexus,
    Router,
}

const ISLAND_LOOKUP: &[(&str, IslandKind)] = &[
    ("mongo", IslandKind::Mongo),
    ("artif", IslandKind::Artif),
    ("nexus", IslandKind::Nexus),
    ("router", IslandKind::Router),
];

/// Resolves an island by alias.
pub fn get_island(name: &str) -> Result<IslandKind> {
    ISLAND_LOOKUP
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| Error::Resolution {
            reference: name.to_string(),
            options: ISLAND_LOOKUP.iter().map(|(a, _)| a.to_string()).collect(),
        })
}

impl IslandKind {
    pub fn alias(&self) -> &'static str {
        match self {
            IslandKind::Mongo => "mongo",
            IslandKind::Artif => "artif",
            IslandKind::Nexus => "nexus",
            IslandKind::Router => "router",
        }
    }

    /// Port the service listens on inside its container.
    pub fn original_port(&self) -> u16 {
        match self {
            IslandKind::Mongo => 27017,
            IslandKind::Artif | IslandKind::Nexus => 8081,
            IslandKind::Router => 80,
        }
    }

    /// Host port used when none is configured.
    pub fn default_host_port(&self) -> u16 {
        match self {
            IslandKind::Mongo => 30017,
            IslandKind::Artif | IslandKind::Nexus => 30023,
            IslandKind::Router => 30080,
        }
    }

    /// Where the data volume is mounted, if the island keeps data.
    pub fn data_path(&self) -> Option<&'static str> {
        match self {
            IslandKind::Mongo => Some("/data/db"),
            IslandKind::Artif => Some("/var/opt/jfrog/artifactory"),
            IslandKind::Nexus => Some("/nexus-data"),
            IslandKind::Router => None,
        }
    }

    pub fn default_disk_mb(&self) -> u64 {
        match self {
            IslandKind::Mongo => DEFAULT_MONGO_MB,
            _ => DEFAULT_ISLAND_MB,
        }
    }

    pub fn scalable(&self) -> bool {
        false
    }
}

impl fmt::Display for IslandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}

// =============================================================================
// Mission
// =============================================================================

/// Launch payload of an island.
#[derive(Debug, Clone)]
pub struct IslandMission {
    kind: IslandKind,
    port: u16,
    disk_mb: u64,
}

impl IslandMission {
    pub fn new(kind: IslandKind, config: &IslandCompass) -> Self {
        Self {
            kind,
            port: config.port.unwrap_or_else(|| kind.default_host_port()),
            disk_mb: config.disk_allocation_mb.unwrap_or_else(|| kind.default_disk_mb()),
        }
    }

    /// Host port the island is published on.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Mission for IslandMission {
    fn section(&self) -> &'static str {
        SECTION_ISLE
    }

    fn make_alias(&self) -> String {
        self.kind.alias().to_string()
    }

    fn make_cmd(&self, _debug: bool) -> Vec<String> {
        match self.kind {
            IslandKind::Mongo => vec!["mongod".into(), "--bind_ip".into(), "0.0.0.0".into()],
            _ => Vec::new(),
        }
    }

    fn make_ports(&self) -> Vec<String> {
        vec![format!("{}:{}", self.port, self.kind.original_port())]
    }

    /// A single pre-allocated data volume; islands need no staged files.
    fn make_vols(&self, _conf_dump: &str) -> Result<Vec<Cargo>> {
        Ok(self
            .kind
            .data_path()
            .map(|path| Cargo::empty(format!("data-{}", self.kind.alias()), path, self.disk_mb))
            .into_iter()
            .collect())
    }
}

// =============================================================================
// Island
// =============================================================================

/// An island ready to be built and launched.
pub struct Island {
    kind: IslandKind,
    config: IslandCompass,
    source: PathBuf,
    builder: ImageBuilder,
    expedition: LongExpedition<IslandMission>,
}

impl Island {
    /// Prepares `kind` with its configured settings.
    ///
    /// `captain` must serve the island section; `engine` builds the image.
    pub fn new(
        kind: IslandKind,
        compass: &Compass,
        captain: Backend,
        engine: Arc<dyn EngineApi>,
        log: LogContext,
    ) -> Result<Self> {
        let config = compass.islands.get(kind.alias());
        let img = ImageSpec::for_island(&compass.docker, kind.alias());
        let mission = IslandMission::new(kind, &config);
        let expedition = Expedition::new(mission, img.clone(), compass, captain, log)?;

        Ok(Self {
            kind,
            source: compass.islands.source(kind.alias()),
            builder: ImageBuilder::new(img, engine),
            expedition: LongExpedition::new(expedition),
            config,
        })
    }

    pub fn kind(&self) -> IslandKind {
        self.kind
    }

    /// Build context of the island's image.
    pub fn source(&self) -> &PathBuf {
        &self.source
    }

    pub fn expedition(&self) -> &Expedition<IslandMission> {
        self.expedition.expedition()
    }

    /// Builds and launches the island.
    ///
    /// Returns `None` when only the image was built.
    ///
    /// # Errors
    ///
    /// Asking for several replicas or launching a foreign island is a
    /// misusage, reported before anything touches the backend.
    pub async fn launch(&mut self, tasks: u32, skip_build: bool, just_build: bool) -> Result<Option<Handle>> {
        if !just_build {
            if !self.kind.scalable() && tasks != 1 {
                return Err(Error::Misusage(format!("Island '{}' is not scalable", self.kind)));
            }

            if !self.config.native {
                return Err(Error::Misusage(format!(
                    "There is no point in setting up the island '{}' because it's configured in foreign mode",
                    self.kind
                )));
            }
        }

        if !skip_build {
            self.builder.build(&self.source).await?;
        }

        if just_build {
            return Ok(None);
        }

        let opts = LaunchOptions {
            tasks,
            ..LaunchOptions::default()
        };
        let handle = self.expedition.launch(&opts).await?;

        let port = self.expedition.expedition().mission().port();
        info!(name = %handle.name(), port, "Mapping island to port");

        Ok(Some(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_island_unknown() {
        let err = get_island("redis").unwrap_err();
        assert!(matches!(err, Error::Resolution { ref options, .. } if options.len() == 4));
    }

    #[test]
    fn test_mongo_volume_defaults() {
        let mission = IslandMission::new(IslandKind::Mongo, &IslandCompass::default());
        let vols = mission.make_vols("").unwrap();

        assert_eq!(vols.len(), 1);
        assert_eq!(vols[0].name(), "data-mongo");
        assert_eq!(vols[0].require_mb(), 1024);
        assert_eq!(mission.make_ports(), vec!["30017:27017"]);
    }

    #[test]
    fn test_router_has_no_volumes() {
        let mission = IslandMission::new(IslandKind::Router, &IslandCompass::default());
        assert!(mission.make_vols("").unwrap().is_empty());
    }
}
