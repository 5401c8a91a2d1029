//! Plugin exporter: turns plugin descriptions into renderer messages
//!
//! Every description goes through the plugin cache first. Only plugins that
//! are new, or attributes whose digest moved, reach the sink. Attribute times
//! are coalesced so a `SetCurrentTime` is only sent when the time actually
//! changes between consecutive attribute updates.

use scenelink_core::{CacheError, PluginAttr, PluginCache, PluginDesc, PluginRef};
use scenelink_wire::{ClientMessage, MessageSink, RendererAction};
use tracing::{debug, trace, warn};

/// Counters for what an exporter has sent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    /// `CreatePlugin` messages (new and re-created plugins)
    pub created: usize,
    /// `UpdateAttr` messages
    pub attr_updates: usize,
    /// `RemovePlugin` messages
    pub removed: usize,
    /// Descriptions that matched the cache and sent nothing
    pub unchanged: usize,
    /// Descriptions rejected before reaching the cache
    pub rejected: usize,
}

pub struct PluginExporter<S> {
    sink: S,
    cache: PluginCache,
    current_time: f32,
    last_sent_time: Option<f32>,
    send_failed: bool,
    stats: ExportStats,
}

impl<S: MessageSink> PluginExporter<S> {
    pub fn new(sink: S, cache: PluginCache) -> Self {
        Self {
            sink,
            cache,
            current_time: 0.0,
            last_sent_time: None,
            send_failed: false,
            stats: ExportStats::default(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn cache(&self) -> &PluginCache {
        &self.cache
    }

    pub fn stats(&self) -> ExportStats {
        self.stats
    }

    /// Export time recorded in the cache for subsequent updates
    pub fn set_current_time(&mut self, time: f32) {
        self.current_time = time;
    }

    /// Send a message; failures are logged once until a send succeeds again
    fn push(&mut self, msg: ClientMessage) -> bool {
        match self.sink.send(msg) {
            Ok(()) => {
                self.send_failed = false;
                true
            }
            Err(e) => {
                if !self.send_failed {
                    warn!(error = %e, "Failed to send to renderer");
                }
                self.send_failed = true;
                false
            }
        }
    }

    /// Send a renderer control command
    pub fn control(&mut self, action: RendererAction) -> bool {
        debug!(?action, "Renderer control");
        self.push(ClientMessage::Control(action))
    }

    fn send_attr(&mut self, plugin: &str, name: &str, attr: &PluginAttr) {
        if attr.value.is_unknown() {
            debug!(plugin, attr = name, "Skipping unresolved attribute");
            return;
        }
        if self.last_sent_time != Some(attr.time) {
            self.push(RendererAction::SetCurrentTime(attr.time).into());
            self.last_sent_time = Some(attr.time);
        }
        trace!(
            plugin,
            attr = name,
            kind = attr.value.type_name(),
            time = attr.time,
            "Sending attribute"
        );
        self.push(ClientMessage::UpdateAttr {
            plugin: plugin.to_string(),
            attr: name.to_string(),
            value: attr.value.clone(),
        });
        self.stats.attr_updates += 1;
    }

    fn send_create(&mut self, desc: &PluginDesc) {
        self.push(ClientMessage::CreatePlugin {
            name: desc.name.clone(),
            kind: desc.kind.clone(),
        });
        self.stats.created += 1;
        for (name, attr) in &desc.attrs {
            self.send_attr(&desc.name, name, attr);
        }
    }

    /// Synchronize one plugin with the renderer
    ///
    /// Returns the handle other plugins use to reference it, or an empty
    /// handle if the description was rejected.
    pub fn export_plugin(&mut self, desc: &PluginDesc) -> PluginRef {
        if !desc.is_valid() {
            warn!(plugin = %desc.name, "Plugin has no type, not exported");
            self.stats.rejected += 1;
            return PluginRef::default();
        }

        let existed = self.cache.contains(&desc.name);
        match self.cache.differences(desc) {
            Err(CacheError::KindMismatch { cached, .. }) => {
                debug!(plugin = %desc.name, from = %cached, to = %desc.kind, "Plugin type changed, re-creating");
                self.recreate(desc);
            }
            Ok(diff) if !existed => {
                debug!(plugin = %desc.name, kind = %desc.kind, attrs = diff.len(), "Creating plugin");
                self.send_create(&diff);
            }
            Ok(diff) => {
                let removed = self.cache.removed_attributes(desc);
                if !removed.is_empty() {
                    debug!(plugin = %desc.name, ?removed, "Attributes removed, re-creating");
                    self.recreate(desc);
                } else if diff.is_empty() {
                    self.stats.unchanged += 1;
                    return desc.plugin_ref();
                } else {
                    debug!(plugin = %desc.name, attrs = diff.len(), "Updating plugin");
                    for (name, attr) in &diff.attrs {
                        self.send_attr(&desc.name, name, attr);
                    }
                }
            }
        }

        self.cache.update(desc, self.current_time);
        desc.plugin_ref()
    }

    fn recreate(&mut self, desc: &PluginDesc) {
        self.send_remove(&desc.name);
        self.cache.remove(&desc.name);
        self.send_create(desc);
    }

    fn send_remove(&mut self, name: &str) {
        self.push(ClientMessage::RemovePlugin {
            name: name.to_string(),
        });
        self.stats.removed += 1;
    }

    /// Remove a plugin from the renderer and the cache
    pub fn remove_plugin(&mut self, name: &str) -> bool {
        if !self.cache.remove(name) {
            return false;
        }
        debug!(plugin = name, "Removing plugin");
        self.send_remove(name);
        true
    }

    /// Forget everything sent so far (scene reload or reconnect)
    pub fn reset(&mut self) {
        self.cache.clear();
        self.last_sent_time = None;
    }

    /// Flush and close the sink
    pub async fn release(&mut self) {
        self.sink.release().await;
    }
}
