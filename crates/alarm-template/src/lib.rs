//! Jinja-style templates for alarm notifications
//!
//! Built on minijinja with the host extensions that notification titles and
//! messages use:
//!
//! - `now()`, `utcnow()`, `today_at('22:00')`, `as_timestamp(dt)`
//! - datetime objects with `.strftime(fmt)`, `.isoformat()`, `.hour`, ...
//! - `states('person.anna')`, `is_state(id, value)`, `state_attr(id, attr)`,
//!   `has_value(id)`
//! - filters `slugify`, `regex_replace`, `int`, `float`
//!
//! ```ignore
//! let engine = TemplateEngine::new(states);
//! let message = engine.render_with_context(
//!     "{{ now().strftime('%H:%M') }} alarm from {{ source_entity }}",
//!     &serde_json::json!({"source_entity": "binary_sensor.front_door"}),
//! )?;
//! ```

mod engine;
mod error;
mod filters;
mod globals;
mod states;

pub use engine::TemplateEngine;
pub use error::{TemplateError, TemplateResult};
pub use globals::DateTimeWrapper;

pub use minijinja::Value;
