//! Side effects of a triggered alarm
//!
//! Everything here goes through the host's service registry. A failing
//! service is logged and the rest of the pipeline carries on; an alarm that
//! cannot flash the lights must still send its notifications.

use alarm_config::AlarmOptions;
use alarm_core::{Context, EntityId, State};
use alarm_hub::ServiceRegistry;
use alarm_template::TemplateEngine;
use chrono::Local;
use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const WWW_DIR: &str = "/config/www";
const LOCAL_URL: &str = "/local";

/// What tripped the alarm
#[derive(Debug, Clone, Default)]
pub struct TriggerSource {
    pub entity_id: Option<String>,
    pub name: Option<String>,
    /// Context the alarm's service calls descend from
    pub context: Context,
}

impl TriggerSource {
    pub fn from_state(state: &State) -> Self {
        Self {
            entity_id: Some(state.entity_id.to_string()),
            name: Some(state.name()),
            context: state.context.child(),
        }
    }
}

/// Outcome of the trigger side effects
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerReport {
    pub snapshot_url: Option<String>,
    pub title: String,
    pub message: String,
}

/// Public URL of a file under the web root, or the path itself
///
/// `/config/www/snapshots/a.jpg` is served as `/local/snapshots/a.jpg`.
pub fn public_url(path: &str) -> String {
    match path.strip_prefix(WWW_DIR) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => format!("{}{}", LOCAL_URL, rest),
        _ => path.to_string(),
    }
}

fn ids(entities: &[EntityId]) -> Vec<String> {
    entities.iter().map(|e| e.to_string()).collect()
}

/// Runs the trigger pipeline for one panel
pub struct ActionRunner {
    services: Arc<ServiceRegistry>,
    templates: Arc<TemplateEngine>,
    options: AlarmOptions,
    entry_id: String,
    panel_entity_id: String,
}

impl ActionRunner {
    pub fn new(
        services: Arc<ServiceRegistry>,
        templates: Arc<TemplateEngine>,
        options: AlarmOptions,
        entry_id: impl Into<String>,
        panel_entity_id: impl Into<String>,
    ) -> Self {
        Self {
            services,
            templates,
            options,
            entry_id: entry_id.into(),
            panel_entity_id: panel_entity_id.into(),
        }
    }

    async fn call(&self, domain: &str, service: &str, data: Value, context: &Context, blocking: bool) -> bool {
        match self
            .services
            .call(domain, service, data, context.child(), blocking)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(panel = %self.panel_entity_id, service = %format!("{}.{}", domain, service), error = %e, "Alarm action failed");
                false
            }
        }
    }

    /// Full pipeline: devices on, snapshot, render, notify
    pub async fn run(&self, source: &TriggerSource, context: &Context) -> TriggerReport {
        info!(
            panel = %self.panel_entity_id,
            source = source.entity_id.as_deref().unwrap_or("unknown"),
            "Running alarm actions"
        );

        self.devices_on(context).await;
        let snapshot_url = self.snapshot(context).await;
        let (title, message) = self.render_message(source, snapshot_url.as_deref());
        self.notify(&title, &message, snapshot_url.as_deref(), context).await;
        self.announce(&message, source, context).await;

        TriggerReport {
            snapshot_url,
            title,
            message,
        }
    }

    pub async fn devices_on(&self, context: &Context) {
        let o = &self.options;

        if !o.scenes.is_empty() {
            self.call("scene", "turn_on", json!({"entity_id": ids(&o.scenes)}), context, false)
                .await;
        }
        if !o.lights.is_empty() {
            let data = json!({"entity_id": ids(&o.lights), "brightness": o.light_brightness});
            self.call("light", "turn_on", data, context, false).await;
        }
        if !o.sirens.is_empty() {
            let data = json!({"entity_id": ids(&o.sirens), "duration": o.alarm_duration});
            self.call("siren", "turn_on", data, context, false).await;
        }
        if !o.switches.is_empty() {
            self.call("switch", "turn_on", json!({"entity_id": ids(&o.switches)}), context, false)
                .await;
        }
        if !o.scripts.is_empty() {
            self.call("script", "turn_on", json!({"entity_id": ids(&o.scripts)}), context, false)
                .await;
        }

        if let (false, Some(url)) = (o.media_players.is_empty(), &o.media_alarm_url) {
            let players = ids(&o.media_players);
            if let Some(volume) = o.media_volume {
                // Volume has to be applied before playback starts
                self.call(
                    "media_player",
                    "volume_set",
                    json!({"entity_id": players, "volume_level": volume}),
                    context,
                    true,
                )
                .await;
            }
            let data = json!({
                "entity_id": players,
                "media_content_id": url,
                "media_content_type": "music",
            });
            self.call("media_player", "play_media", data, context, false).await;
        }
    }

    /// Save a picture of the first camera; returns its public URL
    pub async fn snapshot(&self, context: &Context) -> Option<String> {
        if !self.options.send_snapshot {
            return None;
        }
        let camera = self.options.camera_entities.first()?;

        let dir = self.options.snapshot_path.trim_end_matches('/');
        if let Err(e) = tokio::fs::create_dir_all(Path::new(dir)).await {
            warn!(dir, error = %e, "Cannot create snapshot directory");
            return None;
        }

        let filename = format!("{}/alarm_{}.jpg", dir, Local::now().format("%Y%m%d_%H%M%S"));
        let data = json!({"entity_id": camera.to_string(), "filename": filename});
        if !self.call("camera", "snapshot", data, context, true).await {
            return None;
        }

        debug!(%camera, %filename, "Snapshot saved");
        Some(public_url(&filename))
    }

    fn render(&self, template: &str, vars: &Value) -> String {
        if !TemplateEngine::is_template(template) {
            return template.to_string();
        }
        match self.templates.render_with_context(template, vars) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(template, error = %e, "Template failed, sending it unrendered");
                template.to_string()
            }
        }
    }

    fn template_vars(&self, source: &TriggerSource, snapshot_url: Option<&str>) -> Value {
        json!({
            "source_entity": source.entity_id,
            "source_name": source.name,
            "panel": self.options.name,
            "state": "triggered",
            "snapshot_url": snapshot_url,
        })
    }

    /// `(title, message)` from the configured templates
    pub fn render_message(&self, source: &TriggerSource, snapshot_url: Option<&str>) -> (String, String) {
        let vars = self.template_vars(source, snapshot_url);
        (
            self.render(&self.options.notify_title, &vars),
            self.render(&self.options.notify_message, &vars),
        )
    }

    /// Fan out to notify targets, legacy notify services and the
    /// persistent notification concurrently
    pub async fn notify(&self, title: &str, message: &str, snapshot_url: Option<&str>, context: &Context) {
        let o = &self.options;
        let mut calls: Vec<BoxFuture<'_, bool>> = Vec::new();

        if !o.notify_targets.is_empty() {
            let data = json!({
                "entity_id": ids(&o.notify_targets),
                "title": title,
                "message": message,
            });
            calls.push(self.call("notify", "send_message", data, context, false).boxed());
        }

        for (domain, service) in o.legacy_notify_services() {
            let mut data = json!({"title": title, "message": message});
            if let Some(url) = snapshot_url {
                data["data"] = json!({"image": url});
            }
            calls.push(
                async move { self.call(&domain, &service, data, context, false).await }.boxed(),
            );
        }

        if o.persistent_enable {
            let body = match snapshot_url {
                Some(url) => format!("{}\nSnapshot: {}", message, url),
                None => message.to_string(),
            };
            let data = json!({
                "title": title,
                "message": body,
                "notification_id": format!("alarmcontrol_{}", self.entry_id),
            });
            calls.push(
                self.call("persistent_notification", "create", data, context, false)
                    .boxed(),
            );
        }

        let sent = join_all(calls).await;
        debug!(
            channels = sent.len(),
            failed = sent.iter().filter(|ok| !**ok).count(),
            "Notifications dispatched"
        );
    }

    /// Speak the alarm on the media players through every TTS engine
    async fn announce(&self, message: &str, source: &TriggerSource, context: &Context) {
        let o = &self.options;
        if o.tts_entities.is_empty() {
            return;
        }
        if o.media_players.is_empty() {
            warn!(panel = %self.panel_entity_id, "TTS configured without media players, skipping");
            return;
        }

        let spoken = match &o.tts_message {
            Some(template) => self.render(template, &self.template_vars(source, None)),
            None => message.to_string(),
        };

        for engine in &o.tts_entities {
            let mut data = json!({
                "entity_id": engine.to_string(),
                "media_player_entity_id": ids(&o.media_players),
                "message": spoken,
            });
            if let Some(language) = &o.tts_language {
                data["language"] = json!(language);
            }
            self.call("tts", "speak", data, context, false).await;
        }
    }

    /// Lights and sirens off, alarm sound stopped
    pub async fn devices_off(&self, context: &Context) {
        let o = &self.options;

        if !o.lights.is_empty() {
            self.call("light", "turn_off", json!({"entity_id": ids(&o.lights)}), context, false)
                .await;
        }
        if !o.sirens.is_empty() {
            self.call("siren", "turn_off", json!({"entity_id": ids(&o.sirens)}), context, false)
                .await;
        }
        if !o.media_players.is_empty() && o.media_alarm_url.is_some() {
            let data = json!({"entity_id": ids(&o.media_players)});
            self.call("media_player", "media_stop", data, context, false).await;
        }
    }
}
