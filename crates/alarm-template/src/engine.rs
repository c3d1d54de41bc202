//! Template engine

use crate::error::TemplateResult;
use crate::filters;
use crate::globals;
use crate::states::StatesObject;
use alarm_hub::StateStore;
use minijinja::{Environment, Value};
use std::sync::Arc;
use tracing::debug;

/// Renders notification templates against the live state store
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    pub fn new(store: Arc<StateStore>) -> Self {
        let states = Arc::new(StatesObject::new(store));
        let mut env = Environment::new();
        env.set_debug(true);

        Self::register_filters(&mut env);
        Self::register_globals(&mut env, states);

        Self { env }
    }

    fn register_filters(env: &mut Environment<'static>) {
        env.add_filter("slugify", filters::slugify);
        env.add_filter("regex_replace", filters::regex_replace);
        env.add_filter("float", filters::to_float);
        env.add_filter("int", filters::to_int);
    }

    fn register_globals(env: &mut Environment<'static>, states: Arc<StatesObject>) {
        env.add_global("states", Value::from_object((*states).clone()));

        env.add_function("now", globals::now);
        env.add_function("utcnow", globals::utcnow);
        env.add_function("today_at", globals::today_at);
        env.add_function("as_timestamp", globals::as_timestamp);

        let s = states.clone();
        env.add_function("is_state", move |entity_id: &str, state: Value| {
            s.is_state(entity_id, &state)
        });
        let s = states.clone();
        env.add_function("state_attr", move |entity_id: &str, attribute: &str| {
            s.state_attr(entity_id, attribute)
        });
        env.add_function("has_value", move |entity_id: &str| {
            states.has_value(entity_id)
        });
    }

    pub fn render(&self, template: &str) -> TemplateResult<String> {
        self.render_with_context(template, ())
    }

    /// Render with extra variables, e.g. `source_entity` for alarm messages
    pub fn render_with_context(
        &self,
        template: &str,
        context: impl serde::Serialize,
    ) -> TemplateResult<String> {
        debug!(template, "Rendering template");
        let tmpl = self.env.template_from_str(template)?;
        Ok(tmpl.render(context)?)
    }

    /// Evaluate a bare expression such as `is_state('person.anna', 'home')`
    pub fn evaluate(&self, expression: &str) -> TemplateResult<Value> {
        let expr = self.env.compile_expression(expression)?;
        Ok(expr.eval(())?)
    }

    pub fn is_template(template: &str) -> bool {
        template.contains("{{") || template.contains("{%") || template.contains("{#")
    }
}
