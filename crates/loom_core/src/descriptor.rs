//! Plug-in descriptors — the immutable, shared objects `install_plugin` consumes.
//!
//! The descriptor's on-disk (XML) representation is a collaborator's
//! contract; this module models only the parsed form the core actually
//! operates on.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ConfigTree;
use crate::ids::{ExtPointId, PluginId};
use crate::version::{MatchRule, Version};

/// A single import declared by a plug-in.
#[derive(Debug, Clone)]
pub struct Import {
    /// Identifier of the imported plug-in.
    pub plugin_id: PluginId,
    /// The version constraint to match against the imported plug-in's version.
    pub version: Version,
    /// The rule used to compare the imported plug-in's actual version against `version`.
    pub match_rule: MatchRule,
    /// When `true`, a missing or unsatisfied import is not an error — it
    /// simply never becomes a dependency edge.
    pub optional: bool,
}

/// An extension point declared by a plug-in.
#[derive(Debug, Clone)]
pub struct ExtensionPointDecl {
    /// Identifier unique within the declaring plug-in.
    pub local_id: String,
    /// Identifier unique across the whole environment.
    pub global_id: ExtPointId,
    /// Human-readable name.
    pub name: String,
    /// Path to the schema document describing valid extensions, if any.
    pub schema_path: Option<PathBuf>,
}

/// An extension contributed by a plug-in against an extension point declared
/// by (possibly) another plug-in.
#[derive(Debug, Clone)]
pub struct ExtensionDecl {
    /// Global id of the extension point this extension targets.
    pub extension_point_id: ExtPointId,
    /// Identifier unique within the declaring plug-in.
    pub local_id: String,
    /// Global identifier, if this extension is itself addressable by id.
    pub global_id: Option<String>,
    /// Human-readable name.
    pub name: String,
    /// The contributed configuration tree.
    pub configuration: ConfigTree,
}

/// Location and entry-point symbol of a plug-in's runtime shared library.
#[derive(Debug, Clone)]
pub struct RuntimeRef {
    /// Path to the shared library, relative to the plug-in's installation path.
    pub library_path: PathBuf,
    /// Name of the exported symbol resolving to the plug-in's function table.
    pub symbol_name: String,
}

/// The parsed, immutable form of a plug-in descriptor.
///
/// Descriptors are reference-counted, subject to the host's release
/// discipline so it may drop its own reference immediately after install —
/// every [`PluginDescriptor`] handed around the framework is an `Arc`.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    /// Unique plug-in identifier.
    pub id: PluginId,
    /// Version string.
    pub version: Version,
    /// Optional human-readable provider/vendor name.
    pub provider_name: Option<String>,
    /// Installation path on disk, when known (absent for programmatically
    /// constructed descriptors, e.g. in tests).
    pub install_path: Option<PathBuf>,
    /// Declared imports.
    pub imports: Vec<Import>,
    /// Runtime library reference, absent for descriptor-only (code-free) plug-ins.
    pub runtime: Option<RuntimeRef>,
    /// Declared extension points.
    pub extension_points: Vec<ExtensionPointDecl>,
    /// Contributed extensions.
    pub extensions: Vec<ExtensionDecl>,
}

impl PluginDescriptor {
    /// Wraps this descriptor for ref-counted sharing across the framework.
    #[must_use]
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// Convenience builder for constructing descriptors in tests and in simple
/// embedders that do not go through a descriptor loader.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    descriptor: PluginDescriptor,
}

impl DescriptorBuilder {
    /// Starts building a descriptor for `id` at `version`.
    #[must_use]
    pub fn new(id: impl Into<PluginId>, version: &str) -> Self {
        Self {
            descriptor: PluginDescriptor {
                id: id.into(),
                version: Version::parse(version),
                provider_name: None,
                install_path: None,
                imports: Vec::new(),
                runtime: None,
                extension_points: Vec::new(),
                extensions: Vec::new(),
            },
        }
    }

    /// Adds a mandatory or optional import.
    #[must_use]
    pub fn import(
        mut self,
        plugin_id: impl Into<PluginId>,
        version: &str,
        match_rule: MatchRule,
        optional: bool,
    ) -> Self {
        self.descriptor.imports.push(Import {
            plugin_id: plugin_id.into(),
            version: Version::parse(version),
            match_rule,
            optional,
        });
        self
    }

    /// Sets the runtime library reference.
    #[must_use]
    pub fn runtime(mut self, library_path: impl Into<PathBuf>, symbol_name: impl Into<String>) -> Self {
        self.descriptor.runtime = Some(RuntimeRef {
            library_path: library_path.into(),
            symbol_name: symbol_name.into(),
        });
        self
    }

    /// Declares an extension point.
    #[must_use]
    pub fn extension_point(
        mut self,
        local_id: impl Into<String>,
        global_id: impl Into<ExtPointId>,
        name: impl Into<String>,
    ) -> Self {
        self.descriptor.extension_points.push(ExtensionPointDecl {
            local_id: local_id.into(),
            global_id: global_id.into(),
            name: name.into(),
            schema_path: None,
        });
        self
    }

    /// Contributes an extension.
    #[must_use]
    pub fn extension(
        mut self,
        extension_point_id: impl Into<ExtPointId>,
        local_id: impl Into<String>,
        name: impl Into<String>,
        configuration: ConfigTree,
    ) -> Self {
        self.descriptor.extensions.push(ExtensionDecl {
            extension_point_id: extension_point_id.into(),
            local_id: local_id.into(),
            global_id: None,
            name: name.into(),
            configuration,
        });
        self
    }

    /// Finishes the descriptor.
    #[must_use]
    pub fn build(self) -> PluginDescriptor {
        self.descriptor
    }
}
