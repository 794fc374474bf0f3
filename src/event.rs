use crate::app::AppId;

/// A recoverable failure recorded during a fan-out: one plugin's sub-call
/// failed while its siblings carried on. Drained by the caller for logging
/// or display; never raised as the overall result.
#[derive(Debug, Clone)]
pub struct PluginEvent {
    pub plugin: String,
    pub op: &'static str,
    pub app: Option<AppId>,
    pub message: String,
}

impl PluginEvent {
    pub fn new(plugin: &str, op: &'static str, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.to_string(),
            op,
            app: None,
            message: message.into(),
        }
    }

    pub fn with_app(mut self, app: AppId) -> Self {
        self.app = Some(app);
        self
    }
}
