//! The alarm panel entity
//!
//! One [`AlarmPanel`] per config entry. All mutable state sits behind one
//! async mutex; timers (exit delay, entry delay, alarm duration) are spawned
//! tasks whose handles live in that state so disarm and unbind can abort
//! them.

use crate::actions::{ActionRunner, TriggerSource};
use crate::error::{PanelError, PanelResult};
use crate::presence::{Presence, PresenceAction};
use crate::schedule::ArmWindow;
use crate::state::AlarmState;
use alarm_config::AlarmOptions;
use alarm_core::events::StateChangedData;
use alarm_core::{Context, EntityId, State, STATE_OFF, STATE_ON};
use alarm_hub::{track_state_change, Hub, Subscription};
use alarm_template::TemplateEngine;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// `SUPPORT_ARM_AWAY | SUPPORT_ARM_NIGHT`
pub const SUPPORTED_FEATURES: u32 = 2 | 4;

pub const PANEL_DOMAIN: &str = "alarm_control_panel";

/// Object id for a panel name: `"Main House"` becomes `main_house`
pub fn panel_object_id(name: &str) -> String {
    let slug = slug::slugify(name).replace('-', "_");
    if slug.is_empty() {
        crate::DOMAIN.to_string()
    } else {
        slug
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: AlarmState,
    arming_target: Option<AlarmState>,
    arming_task: Option<JoinHandle<()>>,
    entry_task: Option<JoinHandle<()>>,
    alarm_task: Option<JoinHandle<()>>,
    /// Armed mode that was active when the alarm went off
    previous_armed: Option<AlarmState>,
    cooldown_until: Option<Instant>,
    cooldown_until_wall: Option<DateTime<Utc>>,
    last_trigger_entity: Option<String>,
    last_snapshot_url: Option<String>,
    /// Last value queued for the armed helper
    helper_armed: Option<bool>,
    helper_task: Option<JoinHandle<()>>,
}

impl Inner {
    fn cooldown_active(&self) -> bool {
        self.cooldown_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    fn abort_delays(&mut self) {
        if let Some(task) = self.arming_task.take() {
            task.abort();
        }
        if let Some(task) = self.entry_task.take() {
            task.abort();
        }
        self.arming_target = None;
    }
}

pub struct AlarmPanel {
    entry_id: String,
    entity_id: EntityId,
    options: AlarmOptions,
    hub: Hub,
    actions: ActionRunner,
    presence: Presence,
    window: Option<ArmWindow>,
    inner: Mutex<Inner>,
    subscriptions: Mutex<Vec<Subscription>>,
    /// Latest armed value for the helper writer
    helper_tx: watch::Sender<Option<bool>>,
}

impl std::fmt::Debug for AlarmPanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmPanel")
            .field("entry_id", &self.entry_id)
            .field("entity_id", &self.entity_id)
            .finish_non_exhaustive()
    }
}

impl AlarmPanel {
    pub fn new(
        entry_id: impl Into<String>,
        entity_id: EntityId,
        options: AlarmOptions,
        hub: Hub,
        templates: Arc<TemplateEngine>,
    ) -> PanelResult<Arc<Self>> {
        let entry_id = entry_id.into();
        let window = ArmWindow::from_options(&options)?;
        let actions = ActionRunner::new(
            hub.services.clone(),
            templates,
            options.clone(),
            entry_id.clone(),
            entity_id.to_string(),
        );

        Ok(Arc::new(Self {
            presence: Presence::from_options(&options),
            entry_id,
            entity_id,
            options,
            hub,
            actions,
            window,
            inner: Mutex::new(Inner::default()),
            subscriptions: Mutex::new(Vec::new()),
            helper_tx: watch::channel(None).0,
        }))
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &AlarmOptions {
        &self.options
    }

    pub async fn state(&self) -> AlarmState {
        self.inner.lock().await.state
    }

    pub async fn cooldown_active(&self) -> bool {
        self.inner.lock().await.cooldown_active()
    }

    pub async fn last_trigger_entity(&self) -> Option<String> {
        self.inner.lock().await.last_trigger_entity.clone()
    }

    pub async fn last_snapshot_url(&self) -> Option<String> {
        self.inner.lock().await.last_snapshot_url.clone()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    // --- Commands ---

    pub async fn disarm(&self, _code: Option<&str>) {
        let mut inner = self.inner.lock().await;
        inner.abort_delays();

        if inner.state == AlarmState::Triggered {
            if let Some(task) = inner.alarm_task.take() {
                task.abort();
            }
            info!(panel = %self.entity_id, "Alarm silenced by disarm");
            self.actions.devices_off(&Context::new()).await;
            self.start_cooldown(&mut inner);
        }

        self.transition(&mut inner, AlarmState::Disarmed);
    }

    pub async fn arm_away(self: &Arc<Self>, _code: Option<&str>) -> PanelResult<()> {
        self.arm(AlarmState::ArmedAway).await
    }

    pub async fn arm_night(self: &Arc<Self>, _code: Option<&str>) -> PanelResult<()> {
        self.arm(AlarmState::ArmedNight).await
    }

    async fn arm(self: &Arc<Self>, target: AlarmState) -> PanelResult<()> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            AlarmState::Triggered => {
                return Err(PanelError::InvalidTransition {
                    from: AlarmState::Triggered,
                    to: target,
                })
            }
            state if state == target => return Ok(()),
            AlarmState::Arming if inner.arming_target == Some(target) => return Ok(()),
            _ => {}
        }

        inner.abort_delays();

        let delay = self.options.exit_delay();
        if delay.is_zero() {
            self.transition(&mut inner, target);
            return Ok(());
        }

        info!(panel = %self.entity_id, target = %target, delay = ?delay, "Exit delay started");
        inner.arming_target = Some(target);
        self.transition(&mut inner, AlarmState::Arming);

        let panel = self.clone();
        inner.arming_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            panel.finish_arming(target).await;
        }));
        Ok(())
    }

    async fn finish_arming(&self, target: AlarmState) {
        let mut inner = self.inner.lock().await;
        if inner.state != AlarmState::Arming || inner.arming_target != Some(target) {
            debug!(panel = %self.entity_id, state = %inner.state, "Exit delay ended, arming no longer pending");
            return;
        }
        inner.arming_task = None;
        inner.arming_target = None;
        self.transition(&mut inner, target);
    }

    // --- Sensor handlers ---

    pub async fn handle_instant(self: &Arc<Self>, new_state: Option<State>) {
        let Some(state) = new_state.filter(State::is_on) else {
            return;
        };
        let mut inner = self.inner.lock().await;
        if !inner.state.is_armed() {
            debug!(panel = %self.entity_id, sensor = %state.entity_id, "Instant sensor ignored, not armed");
            return;
        }
        self.trigger_locked(&mut inner, TriggerSource::from_state(&state));
    }

    pub async fn handle_delayed(self: &Arc<Self>, new_state: Option<State>) {
        let Some(state) = new_state.filter(State::is_on) else {
            return;
        };
        let mut inner = self.inner.lock().await;
        if !inner.state.is_armed() {
            debug!(panel = %self.entity_id, sensor = %state.entity_id, "Delayed sensor ignored, not armed");
            return;
        }
        if inner.entry_task.is_some() {
            debug!(panel = %self.entity_id, sensor = %state.entity_id, "Entry delay already running");
            return;
        }

        let source = TriggerSource::from_state(&state);
        let delay = self.options.entry_delay();
        if delay.is_zero() {
            self.trigger_locked(&mut inner, source);
            return;
        }

        info!(panel = %self.entity_id, sensor = %state.entity_id, delay = ?delay, "Entry delay started");
        let panel = self.clone();
        inner.entry_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = panel.inner.lock().await;
            inner.entry_task = None;
            if inner.state.is_armed() {
                panel.trigger_locked(&mut inner, source);
            } else {
                debug!(panel = %panel.entity_id, state = %inner.state, "Entry delay ended, no longer armed");
            }
        }));
    }

    pub async fn handle_person_change(self: &Arc<Self>) {
        let current = self.state().await;
        match self.presence.decide(&self.hub.states, current) {
            Some(PresenceAction::Disarm) => {
                info!(panel = %self.entity_id, "Person in safe zone, disarming");
                self.disarm(None).await;
            }
            Some(PresenceAction::ArmAway) => {
                info!(panel = %self.entity_id, "All persons away, arming");
                if let Err(e) = self.arm_away(None).await {
                    debug!(panel = %self.entity_id, error = %e, "Auto-arm skipped");
                }
            }
            None => {}
        }
    }

    pub async fn handle_window_start(self: &Arc<Self>) {
        if self.window.is_none() {
            return;
        }
        info!(panel = %self.entity_id, "Arm window opened");
        if let Err(e) = self.arm_night(None).await {
            debug!(panel = %self.entity_id, error = %e, "Window arm skipped");
        }
    }

    pub async fn handle_window_end(&self) {
        if self.window.is_none() {
            return;
        }
        info!(panel = %self.entity_id, "Arm window closed");
        self.disarm(None).await;
    }

    pub async fn handle_manual_switch(self: &Arc<Self>, new_state: Option<State>) {
        let Some(state) = new_state else {
            return;
        };
        match state.state.as_str() {
            STATE_ON => {
                if let Err(e) = self.arm_away(None).await {
                    warn!(panel = %self.entity_id, error = %e, "Manual arm rejected");
                }
            }
            STATE_OFF => self.disarm(None).await,
            other => debug!(panel = %self.entity_id, state = other, "Manual switch state ignored"),
        }
    }

    // --- Trigger ---

    /// Set off the alarm; false when suppressed
    pub async fn trigger(self: &Arc<Self>, source: TriggerSource) -> bool {
        let mut inner = self.inner.lock().await;
        self.trigger_locked(&mut inner, source)
    }

    fn trigger_locked(self: &Arc<Self>, inner: &mut Inner, source: TriggerSource) -> bool {
        if inner.state == AlarmState::Triggered {
            debug!(panel = %self.entity_id, "Already triggered");
            return false;
        }
        if inner.cooldown_active() {
            debug!(panel = %self.entity_id, "Cooldown active, trigger suppressed");
            return false;
        }

        inner.abort_delays();
        inner.previous_armed = inner.state.is_armed().then_some(inner.state);
        inner.last_trigger_entity = source.entity_id.clone();

        warn!(
            panel = %self.entity_id,
            source = source.entity_id.as_deref().unwrap_or("unknown"),
            "Alarm triggered"
        );
        self.transition(inner, AlarmState::Triggered);

        let panel = self.clone();
        let duration = self.options.alarm_duration();
        inner.alarm_task = Some(tokio::spawn(async move {
            let context = source.context.clone();
            let report = panel.actions.run(&source, &context).await;
            if report.snapshot_url.is_some() {
                let mut inner = panel.inner.lock().await;
                inner.last_snapshot_url = report.snapshot_url;
                panel.publish(&inner);
            }
            tokio::time::sleep(duration).await;
            panel.finish_alarm().await;
        }));
        true
    }

    async fn finish_alarm(&self) {
        let mut inner = self.inner.lock().await;
        inner.alarm_task = None;
        if inner.state != AlarmState::Triggered {
            return;
        }

        info!(panel = %self.entity_id, "Alarm duration elapsed");
        self.actions.devices_off(&Context::new()).await;
        self.start_cooldown(&mut inner);

        let next = match inner.previous_armed.take() {
            Some(armed) if self.options.rearm_after_trigger => armed,
            _ => AlarmState::Disarmed,
        };
        self.transition(&mut inner, next);
    }

    fn start_cooldown(&self, inner: &mut Inner) {
        let cooldown = self.options.retrigger_cooldown();
        if cooldown.is_zero() {
            inner.cooldown_until = None;
            inner.cooldown_until_wall = None;
            return;
        }
        inner.cooldown_until = Some(Instant::now() + cooldown);
        inner.cooldown_until_wall =
            Some(Utc::now() + chrono::Duration::seconds(self.options.retrigger_cooldown as i64));
        debug!(panel = %self.entity_id, cooldown = ?cooldown, "Cooldown started");
    }

    // --- Publishing ---

    fn transition(&self, inner: &mut Inner, to: AlarmState) {
        if inner.state != to {
            info!(panel = %self.entity_id, from = %inner.state, to = %to, "State changed");
            inner.state = to;
        }
        self.publish(inner);
        self.sync_helper(inner);
    }

    fn publish(&self, inner: &Inner) {
        let mut attributes: HashMap<String, Value> = HashMap::new();
        attributes.insert("friendly_name".into(), json!(self.options.name));
        attributes.insert("supported_features".into(), json!(SUPPORTED_FEATURES));
        attributes.insert("code_arm_required".into(), json!(false));
        attributes.insert("last_trigger_entity".into(), json!(inner.last_trigger_entity));
        attributes.insert("last_snapshot_url".into(), json!(inner.last_snapshot_url));
        attributes.insert(
            "cooldown_until".into(),
            json!(inner.cooldown_until_wall.map(|t| t.to_rfc3339())),
        );

        self.hub.states.set(
            self.entity_id.clone(),
            inner.state.as_str(),
            attributes,
            Context::new(),
        );
    }

    /// Mirror `is_armed()` onto the armed helper
    fn sync_helper(&self, inner: &mut Inner) {
        if self.options.armed_helper_entity.is_none() {
            return;
        }
        let armed = inner.state.is_armed();
        if inner.helper_armed == Some(armed) {
            return;
        }
        inner.helper_armed = Some(armed);
        self.helper_tx.send_replace(Some(armed));
    }

    /// Single writer for the armed helper. Writes are applied one at a time
    /// and only the latest queued value is kept, so the helper always ends
    /// on the panel's last armed status.
    fn spawn_helper_writer(&self) -> Option<JoinHandle<()>> {
        let helper = self.options.armed_helper_entity.clone()?;
        let services = self.hub.services.clone();
        let mut rx = self.helper_tx.subscribe();
        rx.mark_changed();

        Some(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let Some(armed) = *rx.borrow_and_update() else {
                    continue;
                };
                let service = if armed { "turn_on" } else { "turn_off" };
                let data = json!({"entity_id": helper.to_string()});
                if let Err(e) = services
                    .call("input_boolean", service, data, Context::new(), true)
                    .await
                {
                    warn!(%helper, error = %e, "Cannot update armed helper");
                }
            }
        }))
    }

    // --- Bindings ---

    fn track<F, Fut>(self: &Arc<Self>, entity_ids: &[EntityId], handler: F) -> Subscription
    where
        F: Fn(Arc<AlarmPanel>, StateChangedData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        track_state_change(&self.hub.bus, entity_ids.iter().cloned(), move |change| {
            let pending = weak.upgrade().map(|panel| handler(panel, change));
            async move {
                if let Some(pending) = pending {
                    pending.await;
                }
            }
        })
    }

    /// Subscribe to sensors, persons, the manual switch and the arm window,
    /// replacing any earlier bindings, then publish the current state
    pub async fn bind(self: &Arc<Self>) {
        let o = &self.options;
        let mut subscriptions = Vec::new();

        if !o.instant_sensors.is_empty() {
            subscriptions.push(self.track(&o.instant_sensors, |panel, change| async move {
                panel.handle_instant(change.new_state).await
            }));
        }
        if !o.delayed_sensors.is_empty() {
            subscriptions.push(self.track(&o.delayed_sensors, |panel, change| async move {
                panel.handle_delayed(change.new_state).await
            }));
        }
        if !o.persons.is_empty() {
            subscriptions.push(self.track(&o.persons, |panel, _| async move {
                panel.handle_person_change().await
            }));
        }
        if let Some(switch) = &o.manual_arm_switch_entity {
            subscriptions.push(self.track(std::slice::from_ref(switch), |panel, change| async move {
                panel.handle_manual_switch(change.new_state).await
            }));
        }
        if let Some(window) = &self.window {
            let (start, end) = (Arc::downgrade(self), Arc::downgrade(self));
            subscriptions.extend(window.bind(
                move |_| {
                    let panel = start.upgrade();
                    async move {
                        if let Some(panel) = panel {
                            panel.handle_window_start().await;
                        }
                    }
                },
                move |_| {
                    let panel = end.upgrade();
                    async move {
                        if let Some(panel) = panel {
                            panel.handle_window_end().await;
                        }
                    }
                },
            ));
        }

        debug!(panel = %self.entity_id, count = subscriptions.len(), "Panel bound");
        *self.subscriptions.lock().await = subscriptions;

        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.helper_task.take() {
            task.abort();
        }
        inner.helper_task = self.spawn_helper_writer();
        self.publish(&inner);
        self.sync_helper(&mut inner);
    }

    /// Drop every subscription and abort pending timers
    pub async fn unbind(&self) {
        self.subscriptions.lock().await.clear();

        let mut inner = self.inner.lock().await;
        inner.abort_delays();
        if let Some(task) = inner.alarm_task.take() {
            task.abort();
        }
        if let Some(task) = inner.helper_task.take() {
            task.abort();
        }
        debug!(panel = %self.entity_id, "Panel unbound");
    }
}
