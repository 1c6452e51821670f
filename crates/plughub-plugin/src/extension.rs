//! Extension registry — versioned, weight-ordered plugin contributions.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use plughub_core::error::PlatformError;
use plughub_core::result::PlatformResult;
use plughub_core::version::{Version, VersionOracle};

/// The extension point types plugins can contribute to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtensionPointType {
    /// A reusable web UI fragment rendered at a named location.
    WebFragment,
    /// A background job with a trigger.
    ScheduledJob,
    /// A REST endpoint contributed under the plugin's path prefix.
    RestEndpoint,
    /// A listener for platform events.
    EventListener,
    /// A service made available to other plugins.
    Service,
    /// A server-side-rendered view.
    SsrView,
}

impl ExtensionPointType {
    /// The string tag of this extension point type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebFragment => "web-fragment",
            Self::ScheduledJob => "scheduled-job",
            Self::RestEndpoint => "rest-endpoint",
            Self::EventListener => "event-listener",
            Self::Service => "service",
            Self::SsrView => "ssr-view",
        }
    }
}

impl fmt::Display for ExtensionPointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The API version window a registration was compiled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersionRange {
    /// Oldest API version the registration works with.
    pub min: Version,
    /// Newest API version the registration is pinned to, if any.
    pub max: Option<Version>,
}

impl ApiVersionRange {
    /// A range open above the given minimum.
    pub fn from_min(min: Version) -> Self {
        Self { min, max: None }
    }

    /// Whether the platform's current API version falls inside this range.
    pub fn accepts(&self, oracle: &VersionOracle) -> bool {
        if !oracle.is_compatible(self.min) {
            return false;
        }
        match self.max {
            Some(max) => oracle.current() <= max,
            None => true,
        }
    }
}

impl fmt::Display for ApiVersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}..={}", self.min, max),
            None => write!(f, "{}..", self.min),
        }
    }
}

/// One plugin's contribution to an extension point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionRegistration {
    /// Key of the plugin that owns this registration.
    pub owner_plugin_key: String,
    /// The extension point contributed to.
    pub extension_type: ExtensionPointType,
    /// Key unique within the owner and type.
    pub key: String,
    /// Ordering weight; lower weights sort first.
    pub weight: i32,
    /// Rendering location for UI fragments (e.g. `"dashboard.widgets"`).
    pub location: Option<String>,
    /// Permission required to see or use the extension.
    pub required_permission: Option<String>,
    /// API version window the registration was compiled against.
    pub api_version_range: ApiVersionRange,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ExtensionRegistration {
    /// Create a registration with defaults (weight 100, no location, no
    /// permission, open API range from the given minimum).
    pub fn new(
        owner_plugin_key: impl Into<String>,
        extension_type: ExtensionPointType,
        key: impl Into<String>,
        api_min: Version,
    ) -> Self {
        Self {
            owner_plugin_key: owner_plugin_key.into(),
            extension_type,
            key: key.into(),
            weight: 100,
            location: None,
            required_permission: None,
            api_version_range: ApiVersionRange::from_min(api_min),
            metadata: HashMap::new(),
        }
    }

    /// Set the ordering weight.
    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    /// Set the rendering location.
    pub fn at_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the required permission.
    pub fn requiring_permission(mut self, permission: impl Into<String>) -> Self {
        self.required_permission = Some(permission.into());
        self
    }

    /// Attach a metadata value.
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Registry of extension registrations, bucketed by extension point type.
///
/// All buckets live under one lock so that removing a plugin's registrations
/// is atomic with respect to concurrent lookups: a lookup sees all of a
/// plugin's entries for a type, or none of them. Lookups copy a snapshot out
/// and never hold the lock while the caller consumes results.
#[derive(Debug)]
pub struct ExtensionRegistry {
    /// Version oracle consulted on registration.
    oracle: VersionOracle,
    /// Extension point type → registrations in insertion order.
    buckets: RwLock<HashMap<ExtensionPointType, Vec<ExtensionRegistration>>>,
}

impl ExtensionRegistry {
    /// Create an empty registry bound to the platform's version oracle.
    pub fn new(oracle: VersionOracle) -> Self {
        Self {
            oracle,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Register a contribution.
    ///
    /// Fails with [`PlatformError::DuplicateExtensionKey`] when the
    /// `(owner, type, key)` triple already exists and with
    /// [`PlatformError::IncompatibleApiVersion`] when the platform API
    /// version falls outside the registration's declared range. Visible to
    /// lookups immediately on success.
    pub async fn register(&self, registration: ExtensionRegistration) -> PlatformResult<()> {
        if !registration.api_version_range.accepts(&self.oracle) {
            return Err(PlatformError::IncompatibleApiVersion {
                key: registration.key.clone(),
                declared_range: registration.api_version_range.to_string(),
                current: self.oracle.current().to_string(),
            });
        }

        let mut buckets = self.buckets.write().await;
        let entries = buckets.entry(registration.extension_type).or_default();

        if entries.iter().any(|e| {
            e.owner_plugin_key == registration.owner_plugin_key && e.key == registration.key
        }) {
            return Err(PlatformError::DuplicateExtensionKey {
                owner: registration.owner_plugin_key.clone(),
                extension_type: registration.extension_type.to_string(),
                key: registration.key.clone(),
            });
        }

        info!(
            extension_type = %registration.extension_type,
            key = %registration.key,
            owner = %registration.owner_plugin_key,
            weight = registration.weight,
            "Extension registered"
        );
        entries.push(registration);
        Ok(())
    }

    /// Snapshot of registrations for an extension point, ordered by weight
    /// ascending with ties kept in insertion order. An optional location
    /// filter restricts the result.
    pub async fn lookup(
        &self,
        extension_type: ExtensionPointType,
        location: Option<&str>,
    ) -> Vec<ExtensionRegistration> {
        let buckets = self.buckets.read().await;
        let mut snapshot: Vec<ExtensionRegistration> = buckets
            .get(&extension_type)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| match location {
                        Some(loc) => e.location.as_deref() == Some(loc),
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(buckets);

        snapshot.sort_by_key(|e| e.weight);
        snapshot
    }

    /// Remove every registration owned by a plugin, across all extension
    /// point types, in one atomic sweep. Returns the number removed.
    pub async fn deregister_all(&self, owner_plugin_key: &str) -> usize {
        let mut buckets = self.buckets.write().await;
        let mut removed = 0;
        for entries in buckets.values_mut() {
            let before = entries.len();
            entries.retain(|e| e.owner_plugin_key != owner_plugin_key);
            removed += before - entries.len();
        }
        buckets.retain(|_, entries| !entries.is_empty());

        if removed > 0 {
            info!(owner = owner_plugin_key, removed, "Extensions deregistered");
        } else {
            debug!(owner = owner_plugin_key, "No extensions to deregister");
        }
        removed
    }

    /// Number of registrations owned by a plugin across all types.
    pub async fn count_for_owner(&self, owner_plugin_key: &str) -> usize {
        let buckets = self.buckets.read().await;
        buckets
            .values()
            .flat_map(|entries| entries.iter())
            .filter(|e| e.owner_plugin_key == owner_plugin_key)
            .count()
    }

    /// Total number of registrations.
    pub async fn count(&self) -> usize {
        let buckets = self.buckets.read().await;
        buckets.values().map(Vec::len).sum()
    }

    /// All extension point types with at least one registration.
    pub async fn registered_types(&self) -> Vec<ExtensionPointType> {
        let buckets = self.buckets.read().await;
        buckets.keys().copied().collect()
    }
}
