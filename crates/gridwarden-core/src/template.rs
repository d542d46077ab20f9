//! Engine-native configuration templates.
//!
//! The engine reads its own configuration file. We ship it as a template
//! with placeholder tokens and render a copy per deployment; the template
//! itself is never rewritten, so every restart renders from the pristine
//! source.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{ConfigError, ConfigResult, EnvSettings};

/// Template used when the admin client talks plain TCP.
pub const PLAIN_TEMPLATE: &str = "engine-config.xml";
/// Template used when the admin client needs TLS.
pub const CLIENT_TLS_TEMPLATE: &str = "engine-config-client-tls.xml";

/// A template file plus the substitutions to apply to it.
#[derive(Debug, Clone)]
pub struct ConfigTemplate {
    source: PathBuf,
    substitutions: Vec<(String, String)>,
}

impl ConfigTemplate {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            substitutions: Vec::new(),
        }
    }

    /// Pick the template in `config_dir` and derive substitutions from
    /// the environment.
    pub fn for_environment(config_dir: &Path, env: &EnvSettings) -> Self {
        let name = if env.use_client_ssl {
            CLIENT_TLS_TEMPLATE
        } else {
            PLAIN_TEMPLATE
        };
        let mut template = Self::new(config_dir.join(name));
        template
            .substitute("K8S_NAMESPACE", env.namespace.as_deref().unwrap_or_default())
            .substitute("K8S_SERVICE_NAME", env.service_name.as_deref().unwrap_or_default());

        if env.use_client_ssl {
            let path = |m: &Option<crate::config::StoreMaterial>| {
                m.as_ref()
                    .map(|m| m.path.display().to_string())
                    .unwrap_or_default()
            };
            let password = |m: &Option<crate::config::StoreMaterial>| {
                m.as_ref()
                    .and_then(|m| m.password.clone())
                    .unwrap_or_default()
            };
            template
                .substitute("SSL_KEY_STORE_FILE_PATH", &path(&env.key_store))
                .substitute("SSL_KEY_STORE_PASSWORD", &password(&env.key_store))
                .substitute("SSL_TRUST_STORE_FILE_PATH", &path(&env.trust_store))
                .substitute("SSL_TRUST_STORE_PASSWORD", &password(&env.trust_store));
        }
        template
    }

    pub fn substitute(&mut self, token: &str, value: &str) -> &mut Self {
        self.substitutions.push((token.to_string(), value.to_string()));
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// `engine-config.xml` → `engine-config.rendered.xml`.
    pub fn rendered_path(&self) -> PathBuf {
        let stem = self
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "engine-config".to_string());
        let ext = self
            .source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        self.source.with_file_name(format!("{stem}.rendered{ext}"))
    }

    /// Apply every substitution. Longer tokens are replaced first.
    pub fn render_str(&self, text: &str) -> String {
        let mut subs: Vec<&(String, String)> = self.substitutions.iter().collect();
        subs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        subs.into_iter()
            .fold(text.to_string(), |acc, (token, value)| acc.replace(token, value))
    }

    /// Render the template file and write the result next to it.
    pub fn render(&self) -> ConfigResult<PathBuf> {
        let text = std::fs::read_to_string(&self.source).map_err(|source| ConfigError::Read {
            path: self.source.clone(),
            source,
        })?;
        let out = self.rendered_path();
        std::fs::write(&out, self.render_str(&text)).map_err(|source| ConfigError::Write {
            path: out.clone(),
            source,
        })?;
        info!(template = ?self.source, rendered = ?out, "engine configuration rendered");
        Ok(out)
    }
}
