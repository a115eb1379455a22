//! Builds plugin instances from configuration entries.

use crate::config::{AppConfig, PluginEntry, PluginKind};
use anyhow::Result;
use ib_plugins::{
    ForescoutConfig, ForescoutPlugin, HostSettings, InMemoryTagStore, MispConfig, MispPlugin,
    Plugin, SyslogConfig, SyslogPlugin, TagStore, VisoTrustConfig, VisoTrustPlugin,
};
use std::sync::Arc;

/// A configured plugin of any kind.
pub enum PluginInstance {
    Misp(MispPlugin),
    Forescout(ForescoutPlugin),
    Syslog(SyslogPlugin),
    VisoTrust(VisoTrustPlugin),
}

impl PluginInstance {
    /// Builds the plugin described by `entry`.
    pub fn build(
        name: &str,
        entry: &PluginEntry,
        settings: HostSettings,
        tags: Arc<dyn TagStore>,
    ) -> Result<Self> {
        let instance = match entry.kind {
            PluginKind::Misp => PluginInstance::Misp(MispPlugin::new(
                name,
                MispConfig::from_value(&entry.config)?,
                settings,
                tags,
            )?),
            PluginKind::Forescout => PluginInstance::Forescout(ForescoutPlugin::new(
                name,
                ForescoutConfig::from_value(&entry.config)?,
                settings,
            )?),
            PluginKind::Syslog => PluginInstance::Syslog(SyslogPlugin::new(
                name,
                SyslogConfig::from_value(&entry.config)?,
            )),
            PluginKind::VisoTrust => PluginInstance::VisoTrust(VisoTrustPlugin::new(
                name,
                VisoTrustConfig::from_value(&entry.config)?,
                settings,
            )?),
        };
        Ok(instance)
    }

    /// Builds a named plugin from the application configuration.
    pub fn from_config(config: &AppConfig, name: &str) -> Result<Self> {
        let entry = config.plugin(name)?;
        let tags: Arc<dyn TagStore> = Arc::new(InMemoryTagStore::new());
        Self::build(name, entry, config.host_settings(), tags)
    }

    pub fn as_plugin(&self) -> &dyn Plugin {
        match self {
            PluginInstance::Misp(p) => p,
            PluginInstance::Forescout(p) => p,
            PluginInstance::Syslog(p) => p,
            PluginInstance::VisoTrust(p) => p,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(kind: PluginKind, config: serde_json::Value) -> PluginEntry {
        PluginEntry {
            kind,
            enabled: true,
            config,
            actions: Vec::new(),
        }
    }

    #[test]
    fn test_build_each_kind() {
        let tags: Arc<dyn TagStore> = Arc::new(InMemoryTagStore::new());
        let cases = [
            (PluginKind::Misp, json!({"base_url": "https://misp.example.com", "api_key": "k"}), "CTE"),
            (PluginKind::Forescout, json!({"base_url": "https://fs.example.com"}), "CRE"),
            (PluginKind::Syslog, json!({"syslog_server": "10.0.0.5", "syslog_port": 514}), "CTE"),
            (PluginKind::VisoTrust, json!({"api_token": "t"}), "ARE"),
        ];
        for (kind, config, module) in cases {
            let plugin = PluginInstance::build(
                "p",
                &entry(kind, config),
                HostSettings::default(),
                tags.clone(),
            )
            .unwrap();
            assert_eq!(plugin.as_plugin().module(), module);
            assert_eq!(plugin.as_plugin().name(), "p");
        }
    }

    #[test]
    fn test_build_rejects_malformed_config() {
        let tags: Arc<dyn TagStore> = Arc::new(InMemoryTagStore::new());
        let result = PluginInstance::build(
            "p",
            &entry(PluginKind::Misp, json!({"attr_type": "md5"})),
            HostSettings::default(),
            tags,
        );
        assert!(result.is_err());
    }
}
