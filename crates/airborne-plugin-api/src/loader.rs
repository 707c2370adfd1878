//! Plugin discovery, dependency resolution and lifecycle management.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bus::{MessageBus, MessageHandler, PluginMessageHandler};
use crate::catalog::{PluginCatalog, PluginManifest};
use crate::context::PluginContext;
use crate::error::{panic_message, PluginError, PluginResult};
use crate::message::Topic;
use crate::metadata::{PluginInfo, PluginMetadata, PluginState};
use crate::plugin::{into_handle, Plugin, PluginFactory, PluginHandle};

/// Outcome of [`PluginLoader::load_all`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Plugins loaded by this call, in load order
    pub loaded: Vec<String>,
    /// Optional plugins that failed and were left out
    pub skipped: Vec<(String, PluginError)>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

struct BusSubscription {
    bus: Arc<MessageBus>,
    topic: Topic,
    handler: Arc<dyn MessageHandler>,
}

#[derive(Default)]
struct LoaderState {
    metadata: HashMap<String, PluginMetadata>,
    factories: HashMap<String, PluginFactory>,
    loaded: HashMap<String, PluginInfo>,
    load_order: Vec<String>,
    failed: HashMap<String, PluginInfo>,
    /// Names whose `load` is on the call stack
    in_progress: Vec<String>,
    subscriptions: HashMap<String, Vec<BusSubscription>>,
}

/// Loads plugins in dependency order and drives their lifecycle.
///
/// ```
/// use airborne_plugin_api::{
///     ConfigTree, Plugin, PluginCatalog, PluginContext, PluginLoader, PluginMetadata, PluginType,
/// };
///
/// struct Battery;
///
/// impl Plugin for Battery {
///     fn metadata(&self) -> PluginMetadata {
///         PluginMetadata::builder("battery", "1.0.0", "AirBorne Team", PluginType::AircraftSystem)
///             .build()
///     }
///     fn initialize(&mut self, _: &PluginContext) -> anyhow::Result<()> { Ok(()) }
///     fn update(&mut self, _: f64) -> anyhow::Result<()> { Ok(()) }
///     fn shutdown(&mut self) -> anyhow::Result<()> { Ok(()) }
/// }
///
/// let catalog = PluginCatalog::new().with("battery", || Box::new(Battery));
/// let mut loader = PluginLoader::new(catalog);
/// loader.discover_catalog();
///
/// let context = PluginContext::standalone(ConfigTree::new());
/// loader.load("battery", &context).unwrap();
/// assert_eq!(loader.list_loaded().len(), 1);
/// loader.shutdown_all();
/// ```
pub struct PluginLoader {
    catalog: PluginCatalog,
    state: LoaderState,
}

impl PluginLoader {
    pub fn new(catalog: PluginCatalog) -> Self {
        Self {
            catalog,
            state: LoaderState::default(),
        }
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    /// Scans `directories` recursively for `*_plugin.yaml` manifests and
    /// introspects the catalog entries they name.
    ///
    /// Bad manifests, unknown catalog keys and invalid metadata are logged and
    /// skipped. Returns the metadata of every plugin discovered by this call.
    pub fn discover<P: AsRef<Path>>(&mut self, directories: &[P]) -> Vec<PluginMetadata> {
        let mut discovered = Vec::new();

        for dir in directories {
            let dir = dir.as_ref();
            if !dir.is_dir() {
                tracing::warn!("Plugin directory does not exist: {}", dir.display());
                continue;
            }

            let mut manifests = Vec::new();
            if let Err(e) = collect_manifests(dir, &mut manifests) {
                tracing::error!("Failed to scan plugin directory {}: {}", dir.display(), e);
                continue;
            }
            manifests.sort();

            for path in manifests {
                let manifest = match PluginManifest::from_file(&path) {
                    Ok(manifest) => manifest,
                    Err(e) => {
                        tracing::error!("Skipping plugin manifest {}: {}", path.display(), e);
                        continue;
                    }
                };

                if !manifest.enabled {
                    tracing::info!("Plugin {} disabled by {}", manifest.plugin, path.display());
                    continue;
                }

                tracing::debug!("Found plugin manifest: {}", path.display());
                if let Some(metadata) = self.introspect_logged(&manifest.plugin) {
                    discovered.push(metadata);
                }
            }
        }

        tracing::info!("Discovered {} plugins", discovered.len());
        discovered
    }

    /// Introspects every catalog entry without touching the filesystem.
    pub fn discover_catalog(&mut self) -> Vec<PluginMetadata> {
        let keys: Vec<String> = self.catalog.names().into_iter().map(String::from).collect();
        let discovered: Vec<PluginMetadata> = keys
            .iter()
            .filter_map(|key| self.introspect_logged(key))
            .collect();
        tracing::info!("Discovered {} catalog plugins", discovered.len());
        discovered
    }

    fn introspect_logged(&mut self, key: &str) -> Option<PluginMetadata> {
        match self.introspect(key) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::error!("Failed to introspect plugin {}: {}", key, e);
                None
            }
        }
    }

    /// Instantiates a catalog entry once to read and validate its metadata,
    /// then caches metadata and factory under the plugin name.
    fn introspect(&mut self, key: &str) -> PluginResult<PluginMetadata> {
        let factory = self
            .catalog
            .factory(key)
            .ok_or_else(|| PluginError::NotFound(key.to_string()))?;

        let instance = instantiate(key, &factory)?;
        let metadata = catch_unwind(AssertUnwindSafe(|| instance.metadata())).map_err(|panic| {
            PluginError::InvalidMetadata {
                name: key.to_string(),
                reason: format!("metadata() panicked: {}", panic_message(panic.as_ref())),
            }
        })?;
        metadata.validate()?;

        if let Some(existing) = self.state.metadata.get(&metadata.name) {
            if existing != &metadata {
                tracing::warn!("Plugin {} discovered again with different metadata", metadata.name);
            }
        }

        tracing::debug!(
            "Discovered plugin {} v{} ({})",
            metadata.name,
            metadata.version,
            metadata.plugin_type
        );
        self.state
            .metadata
            .insert(metadata.name.clone(), metadata.clone());
        self.state.factories.insert(metadata.name.clone(), factory);
        Ok(metadata)
    }

    /// Loads `name` and, first, every dependency not yet loaded.
    ///
    /// Loading an already-loaded plugin returns the existing handle without
    /// initializing it again.
    pub fn load(&mut self, name: &str, context: &PluginContext) -> PluginResult<PluginHandle> {
        if let Some(info) = self.state.loaded.get(name) {
            return Ok(info.plugin.clone());
        }

        let metadata = self
            .state
            .metadata
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        if let Some(pos) = self.state.in_progress.iter().position(|n| n == name) {
            let mut remaining = self.state.in_progress[pos..].to_vec();
            remaining.push(name.to_string());
            return Err(PluginError::CircularDependency { remaining });
        }

        self.state.in_progress.push(name.to_string());
        let result = self.load_with_dependencies(metadata, context);
        self.state.in_progress.pop();
        result
    }

    fn load_with_dependencies(
        &mut self,
        metadata: PluginMetadata,
        context: &PluginContext,
    ) -> PluginResult<PluginHandle> {
        for dependency in &metadata.dependencies {
            if self.state.loaded.contains_key(dependency) {
                continue;
            }
            self.load(dependency, context)
                .map_err(|source| PluginError::DependencyFailed {
                    dependency: dependency.clone(),
                    plugin: metadata.name.clone(),
                    source: Box::new(source),
                })?;
        }

        let name = metadata.name.clone();
        let factory = self
            .state
            .factories
            .get(&name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(name.clone()))?;

        let handle = into_handle(instantiate(&name, &factory)?);
        let mut info = PluginInfo::new(handle.clone(), metadata, PluginState::Unregistered);
        info.transition(PluginState::Loading);
        tracing::info!("Loading plugin: {} v{}", name, info.metadata.version);

        let outcome = catch_unwind(AssertUnwindSafe(|| handle.lock().initialize(context)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(panic) => Some(format!("initialize panicked: {}", panic_message(panic.as_ref()))),
        };

        match failure {
            None => {
                info.transition(PluginState::Loaded);
                self.state.failed.remove(&name);
                self.state.loaded.insert(name.clone(), info);
                self.state.load_order.push(name.clone());
                tracing::info!("Successfully loaded plugin: {}", name);
                Ok(handle)
            }
            Some(reason) => {
                tracing::error!("Failed to initialize plugin {}: {}", name, reason);
                info.fail(reason.clone());
                self.state.failed.insert(name.clone(), info);
                Err(PluginError::InitFailed { name, reason })
            }
        }
    }

    /// Shuts a plugin down and removes it, returning its final record.
    ///
    /// Loaded dependents are only warned about. Errors and panics from
    /// `shutdown` are logged and leave the returned record in `Error`; the
    /// plugin is removed either way.
    pub fn unload(&mut self, name: &str) -> PluginResult<PluginInfo> {
        if !self.state.loaded.contains_key(name) {
            return Err(PluginError::NotLoaded(name.to_string()));
        }

        let dependents = self.dependents_of(name);
        if !dependents.is_empty() {
            tracing::warn!(
                "Unloading plugin {} while loaded plugins depend on it: {}",
                name,
                dependents.join(", ")
            );
        }

        let Some(mut info) = self.state.loaded.remove(name) else {
            return Err(PluginError::NotLoaded(name.to_string()));
        };
        self.state.load_order.retain(|n| n != name);

        for sub in self.state.subscriptions.remove(name).unwrap_or_default() {
            sub.bus.unsubscribe(sub.topic, &sub.handler);
        }

        info.transition(PluginState::Unloading);
        tracing::info!("Unloading plugin: {}", name);

        let handle = info.plugin.clone();
        match catch_unwind(AssertUnwindSafe(|| handle.lock().shutdown())) {
            Ok(Ok(())) => {
                info.transition(PluginState::UnloadedAfterRun);
                tracing::info!("Unloaded plugin: {}", name);
            }
            Ok(Err(e)) => {
                tracing::error!("Error shutting down plugin {}: {:#}", name, e);
                info.fail(format!("{:#}", e));
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!("Plugin {} panicked during shutdown: {}", name, reason);
                info.fail(format!("shutdown panicked: {}", reason));
            }
        }
        Ok(info)
    }

    /// Unloads and loads a plugin, producing a fresh instance.
    pub fn reload(&mut self, name: &str, context: &PluginContext) -> PluginResult<PluginHandle> {
        self.unload(name)?;
        self.load(name, context)
    }

    /// Orders `names` and their transitive dependencies so that every plugin
    /// comes after all of its dependencies.
    pub fn resolve_dependencies<S: AsRef<str>>(&self, names: &[S]) -> PluginResult<Vec<String>> {
        // Collect the induced subgraph, seeded in input order.
        let mut nodes: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<String> =
            names.iter().map(|n| n.as_ref().to_string()).collect();

        while let Some(name) = frontier.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let metadata = self
                .state
                .metadata
                .get(&name)
                .ok_or_else(|| PluginError::MissingMetadata(name.clone()))?;
            frontier.extend(metadata.dependencies.iter().cloned());
            nodes.push(name);
        }

        let graph: HashMap<&str, &[String]> = nodes
            .iter()
            .map(|n| (n.as_str(), self.state.metadata[n].dependencies.as_slice()))
            .collect();

        // In-degree counts the plugins that depend on each node.
        let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|n| (n.as_str(), 0)).collect();
        for deps in graph.values() {
            for dep in deps.iter() {
                if let Some(degree) = in_degree.get_mut(dep.as_str()) {
                    *degree += 1;
                }
            }
        }

        let mut queue: VecDeque<&str> = nodes
            .iter()
            .map(String::as_str)
            .filter(|n| in_degree[n] == 0)
            .collect();
        let mut order: Vec<String> = Vec::with_capacity(nodes.len());

        while let Some(name) = queue.pop_front() {
            order.push(name.to_string());
            for dep in graph[name].iter() {
                if let Some(degree) = in_degree.get_mut(dep.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dep.as_str());
                    }
                }
            }
        }

        if order.len() < nodes.len() {
            let resolved: HashSet<&str> = order.iter().map(String::as_str).collect();
            let remaining = nodes
                .iter()
                .filter(|n| !resolved.contains(n.as_str()))
                .cloned()
                .collect();
            return Err(PluginError::CircularDependency { remaining });
        }

        // Kahn yields dependents first.
        order.reverse();
        Ok(order)
    }

    /// Resolves and loads `names`. Failures of optional plugins are reported
    /// as skipped; the first failure of a required plugin aborts.
    ///
    /// Required roots are resolved as one batch. Each optional root is
    /// resolved on its own, so a missing dependency or cycle behind it only
    /// skips that root. Names without metadata count as required.
    pub fn load_all<S: AsRef<str>>(
        &mut self,
        names: &[S],
        context: &PluginContext,
    ) -> PluginResult<LoadReport> {
        let (optional, required): (Vec<&str>, Vec<&str>) = names
            .iter()
            .map(|name| name.as_ref())
            .partition(|name| self.is_optional(name));

        let mut report = LoadReport::default();
        let order = self.resolve_dependencies(required.as_slice())?;
        tracing::info!("Plugin load order: {}", order.join(" -> "));
        self.load_order_into(order, context, &mut report)?;

        for root in optional {
            if self.is_loaded(root) {
                continue;
            }
            match self.resolve_dependencies(&[root]) {
                Ok(order) => self.load_order_into(order, context, &mut report)?,
                Err(e) => {
                    tracing::warn!("Skipping optional plugin {}: {}", root, e);
                    report.skipped.push((root.to_string(), e));
                }
            }
        }
        Ok(report)
    }

    fn is_optional(&self, name: &str) -> bool {
        self.state.metadata.get(name).is_some_and(|m| m.optional)
    }

    fn load_order_into(
        &mut self,
        order: Vec<String>,
        context: &PluginContext,
        report: &mut LoadReport,
    ) -> PluginResult<()> {
        for name in order {
            if self.is_loaded(&name) {
                continue;
            }
            match self.load(&name, context) {
                Ok(_) => report.loaded.push(name),
                Err(e) => {
                    if !self.is_optional(&name) {
                        return Err(e);
                    }
                    tracing::warn!("Skipping optional plugin {}: {}", name, e);
                    report.skipped.push((name, e));
                }
            }
        }
        Ok(())
    }

    /// Updates every loaded physics plugin once, lowest `update_priority`
    /// first. Returns how many plugins were updated without error.
    pub fn update_all(&mut self, dt: f64) -> usize {
        let mut updated = 0;

        for name in self.plugins_by_priority() {
            let Some(info) = self.state.loaded.get_mut(&name) else {
                continue;
            };
            if !info.metadata.requires_physics {
                continue;
            }
            if info.state() == PluginState::Loaded {
                info.transition(PluginState::Running);
            }

            let handle = info.plugin.clone();
            let error = match catch_unwind(AssertUnwindSafe(|| handle.lock().update(dt))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(panic) => Some(anyhow::anyhow!(
                    "update panicked: {}",
                    panic_message(panic.as_ref())
                )),
            };

            match error {
                None => updated += 1,
                Some(e) => {
                    tracing::debug!("Update of plugin {} failed: {:#}", name, e);
                    let _ = catch_unwind(AssertUnwindSafe(|| handle.lock().on_error(&e)));
                }
            }
        }

        updated
    }

    /// Unloads every plugin in reverse load order.
    pub fn shutdown_all(&mut self) {
        let order: Vec<String> = self.state.load_order.iter().rev().cloned().collect();
        tracing::info!("Shutting down {} plugins", order.len());
        let mut failures = 0;
        for name in order {
            match self.unload(&name) {
                Ok(info) if info.state() == PluginState::Error => failures += 1,
                Ok(_) => {}
                Err(e) => tracing::error!("Failed to unload plugin {}: {}", name, e),
            }
        }
        if failures > 0 {
            tracing::warn!("{} plugins failed to shut down cleanly", failures);
        }
    }

    /// Routes `topic` on `bus` to the plugin's `handle_message`. The
    /// subscription is removed when the plugin is unloaded.
    pub fn subscribe_plugin(
        &mut self,
        name: &str,
        topic: Topic,
        bus: &Arc<MessageBus>,
    ) -> PluginResult<()> {
        let info = self
            .state
            .loaded
            .get(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;

        let handler: Arc<dyn MessageHandler> =
            Arc::new(PluginMessageHandler::new(name, &info.plugin));
        bus.subscribe(topic, name, handler.clone());
        self.state
            .subscriptions
            .entry(name.to_string())
            .or_default()
            .push(BusSubscription {
                bus: bus.clone(),
                topic,
                handler,
            });
        Ok(())
    }

    pub fn get_plugin(&self, name: &str) -> Option<PluginHandle> {
        self.state.loaded.get(name).map(|info| info.plugin.clone())
    }

    /// Loaded plugins, or the record of a plugin whose initialization failed.
    pub fn get_plugin_info(&self, name: &str) -> Option<&PluginInfo> {
        self.state
            .loaded
            .get(name)
            .or_else(|| self.state.failed.get(name))
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.state.loaded.contains_key(name)
    }

    /// Loaded plugins in load order.
    pub fn list_loaded(&self) -> Vec<&PluginInfo> {
        self.state
            .load_order
            .iter()
            .filter_map(|n| self.state.loaded.get(n))
            .collect()
    }

    /// Loaded plugin names by ascending `update_priority`, ties in load order.
    pub fn plugins_by_priority(&self) -> Vec<String> {
        let mut names = self.state.load_order.clone();
        names.sort_by_key(|n| {
            self.state
                .loaded
                .get(n)
                .map(|info| info.metadata.update_priority)
                .unwrap_or(u32::MAX)
        });
        names
    }

    pub fn discovered_metadata(&self, name: &str) -> Option<&PluginMetadata> {
        self.state.metadata.get(name)
    }

    /// Names of every discovered plugin, sorted.
    pub fn discovered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.metadata.keys().cloned().collect();
        names.sort();
        names
    }

    /// Loaded plugins that list `name` as a dependency, in load order.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.list_loaded()
            .into_iter()
            .filter(|info| info.metadata.depends_on(name))
            .map(|info| info.name().to_string())
            .collect()
    }
}

fn instantiate(name: &str, factory: &PluginFactory) -> PluginResult<Box<dyn Plugin>> {
    catch_unwind(AssertUnwindSafe(|| factory())).map_err(|panic| PluginError::InitFailed {
        name: name.to_string(),
        reason: format!("constructor panicked: {}", panic_message(panic.as_ref())),
    })
}

fn collect_manifests(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_manifests(&path, out)?;
        } else if PluginManifest::is_manifest_path(&path) {
            out.push(path);
        }
    }
    Ok(())
}
