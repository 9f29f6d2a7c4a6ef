//! Map markers from external integrations.
//!
//! Integrations (weather systems, shops, transport networks and so on) expose
//! their points of interest through [`MarkerSource`]. The [`MarkerRegistry`]
//! gathers them into the marker document served to map clients:
//!
//! ```json
//! {"markers": {"storms": [...], "shops": [...], ...}}
//! ```
//!
//! Nothing in the tile pipeline depends on this module.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Marker type keys that are always present in the document.
pub const DEFAULT_MARKER_TYPES: [&str; 5] =
    ["storms", "shops", "transporters", "events", "dungeons"];

/// A point of interest on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: String,
    /// Marker type key, e.g. `storms`.
    #[serde(rename = "type")]
    pub kind: String,
    pub world: String,
    pub x: f64,
    pub z: f64,
    pub name: String,
    /// Integration-specific attributes.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl Marker {
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        world: impl Into<String>,
        x: f64,
        z: f64,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            world: world.into(),
            x,
            z,
            name: name.into(),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Producer of markers, implemented once per external integration.
pub trait MarkerSource: Send + Sync {
    /// Short identifier used in logs and for unregistering.
    fn name(&self) -> &str;

    /// Whether the backing system is currently reachable.
    fn is_available(&self) -> bool {
        true
    }

    fn markers(&self) -> Vec<Marker>;
}

/// Marker document grouped by type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerDocument {
    pub markers: BTreeMap<String, Vec<Marker>>,
}

/// Registered marker sources.
#[derive(Default)]
pub struct MarkerRegistry {
    sources: RwLock<Vec<Arc<dyn MarkerSource>>>,
}

impl MarkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a source, replacing any source registered under the same name.
    pub fn register(&self, source: Arc<dyn MarkerSource>) {
        let mut sources = self.sources.write();
        sources.retain(|s| s.name() != source.name());
        debug!(source = source.name(), "Marker source registered");
        sources.push(source);
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut sources = self.sources.write();
        let before = sources.len();
        sources.retain(|s| s.name() != name);
        sources.len() != before
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Collects markers from every available source.
    pub fn collect(&self) -> MarkerDocument {
        let mut markers: BTreeMap<String, Vec<Marker>> = DEFAULT_MARKER_TYPES
            .iter()
            .map(|kind| (kind.to_string(), Vec::new()))
            .collect();

        let sources: Vec<_> = self.sources.read().iter().cloned().collect();
        for source in sources {
            if !source.is_available() {
                debug!(source = source.name(), "Marker source unavailable, skipped");
                continue;
            }
            for marker in source.markers() {
                markers.entry(marker.kind.clone()).or_default().push(marker);
            }
        }

        MarkerDocument { markers }
    }

    /// The marker document as JSON text.
    pub fn to_json(&self) -> String {
        match serde_json::to_string(&self.collect()) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Marker document could not be serialized");
                r#"{"markers":{}}"#.to_string()
            }
        }
    }
}

impl std::fmt::Debug for MarkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkerRegistry")
            .field("sources", &self.source_names())
            .finish()
    }
}
