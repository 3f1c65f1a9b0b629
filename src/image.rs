//! # Image naming and the shipyard
//!
//! - **ImageSpec**: registry + section-prefixed name + tag
//! - **ImageBuilder**: builds an image from a local context and pushes it
//! - **ImageTagger**: pull, tag, push and untag through the engine
//!
//! ## Naming
//!
//! ```text
//! registry      section    name   tag
//!    │             │        │      │
//!    ▼             ▼        ▼      ▼
//! registry.io:5000/nha-proj-iris:v1.2
//! └──────── repo ──────────────┘
//! └──────────────── target ──────────┘
//! ```
//!
//! Empty segments are dropped, so a third-party image without registry or
//! section renders as plain `name:tag`.

use crate::captain::EngineApi;
use crate::compass::DockerCompass;
use crate::constants::{LATEST, LOCAL_REGISTRY, SECTION_ISLE, SECTION_PROJ};
use crate::error::Result;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Identifies a container image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    registry: String,
    section: String,
    name: String,
    tag: String,
    pushable: bool,
}

impl ImageSpec {
    /// Creates a spec on the local registry. Local images are never pushed.
    pub fn new(section: impl Into<String>, name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            registry: LOCAL_REGISTRY.to_string(),
            section: section.into(),
            name: name.into(),
            tag: tag.into(),
            pushable: false,
        }
    }

    /// Points the image at an explicit registry.
    ///
    /// The image becomes pushable iff the registry is non-empty.
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into().trim().trim_matches('/').to_string();
        self.pushable = !self.registry.is_empty();
        self
    }

    /// Creates a spec using the configured registry, if any.
    pub fn from_compass(
        compass: &DockerCompass,
        section: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        let spec = Self::new(section, name, tag);

        match compass.registry.as_deref() {
            Some(registry) if !registry.trim().is_empty() => spec.with_registry(registry),
            _ => spec,
        }
    }

    /// Image for a project build.
    pub fn for_project(compass: &DockerCompass, project: &str, tag: &str) -> Self {
        Self::from_compass(compass, SECTION_PROJ, project, tag)
    }

    /// Image for one of the framework's own services.
    pub fn for_island(compass: &DockerCompass, alias: &str) -> Self {
        Self::from_compass(compass, SECTION_ISLE, alias, LATEST)
    }

    /// Image maintained elsewhere, referenced by its plain name.
    pub fn third_party(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            registry: String::new(),
            section: String::new(),
            name: name.into(),
            tag: tag.into(),
            pushable: false,
        }
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns true when a registry was explicitly configured.
    pub fn pushable(&self) -> bool {
        self.pushable
    }

    /// `{section}-{name}`, without a leading dash.
    pub fn name_with_prefix(&self) -> String {
        format!("{}-{}", self.section, self.name)
            .trim_start_matches('-')
            .to_string()
    }

    /// `{registry}/{section}-{name}`, without empty segments.
    pub fn repo(&self) -> String {
        let name = self.name_with_prefix();

        [self.registry.as_str(), name.as_str()]
            .iter()
            .flat_map(|s| s.split('/'))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Fully qualified reference: `{repo}:{tag}`.
    pub fn target(&self) -> String {
        format!("{}:{}", self.repo(), self.tag)
    }
}

impl fmt::Display for ImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target())
    }
}

// =============================================================================
// Shipyard
// =============================================================================

/// Moves images between the local engine and the registry.
pub struct ImageTagger {
    engine: Arc<dyn EngineApi>,
}

impl ImageTagger {
    pub fn new(engine: Arc<dyn EngineApi>) -> Self {
        Self { engine }
    }

    /// Pulls a spec's image.
    pub async fn pull(&self, img: &ImageSpec) -> Result<()> {
        info!(image = %img, "Pulling image");
        self.engine.pull_image(&img.target()).await
    }

    /// Tags `source` as `img`.
    pub async fn tag(&self, source: &str, img: &ImageSpec) -> Result<()> {
        self.engine.tag_image(source, &img.target()).await
    }

    /// Pushes when the image has an explicit registry. Returns whether it did.
    pub async fn push(&self, img: &ImageSpec) -> Result<bool> {
        if !img.pushable() {
            warn!(image = %img, "No registry configured, image stays local");
            return Ok(false);
        }

        info!(image = %img, "Pushing image");
        self.engine.push_image(&img.target()).await?;
        Ok(true)
    }

    /// Removes the local tag. Failures are logged, never propagated.
    pub async fn untag(&self, img: &ImageSpec) -> bool {
        match self.engine.remove_image(&img.target()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(image = %img, error = %e, "Failed to remove image");
                false
            }
        }
    }
}

/// Builds images from a local build context.
pub struct ImageBuilder {
    img: ImageSpec,
    tagger: ImageTagger,
    engine: Arc<dyn EngineApi>,
}

impl ImageBuilder {
    pub fn new(img: ImageSpec, engine: Arc<dyn EngineApi>) -> Self {
        Self {
            img,
            tagger: ImageTagger::new(Arc::clone(&engine)),
            engine,
        }
    }

    /// Spec of the image this builder produces.
    pub fn img_spec(&self) -> &ImageSpec {
        &self.img
    }

    /// Builds from `context` and pushes if the image is pushable.
    pub async fn build(&self, context: &Path) -> Result<()> {
        if !context.is_dir() {
            return Err(crate::error::Error::Configuration(format!(
                "build context not found: {}",
                context.display()
            )));
        }

        info!(image = %self.img, context = %context.display(), "Building image");
        self.engine.build_image(context, &self.img.target()).await?;
        self.tagger.push(&self.img).await?;
        Ok(())
    }
}
