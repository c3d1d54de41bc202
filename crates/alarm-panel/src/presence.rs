//! Presence rules for auto-arm and auto-disarm

use crate::state::AlarmState;
use alarm_config::AlarmOptions;
use alarm_core::{EntityId, STATE_HOME};
use alarm_hub::StateStore;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    Disarm,
    ArmAway,
}

/// Tracked persons and the zones that count as being home
///
/// A safe zone is `home` or the object id of a configured `zone.*` entity,
/// compared case-insensitively against the person's state.
#[derive(Debug, Clone)]
pub struct Presence {
    persons: Vec<EntityId>,
    safe_zones: HashSet<String>,
    auto_arm: bool,
    auto_disarm: bool,
}

impl Presence {
    pub fn from_options(options: &AlarmOptions) -> Self {
        let safe_zones = std::iter::once(STATE_HOME.to_string())
            .chain(options.safe_zones.iter().map(|z| z.object_id().to_string()))
            .collect();

        Self {
            persons: options.persons.clone(),
            safe_zones,
            auto_arm: options.auto_arm_all_away,
            auto_disarm: options.auto_disarm_on_any_home,
        }
    }

    pub fn persons(&self) -> &[EntityId] {
        &self.persons
    }

    fn in_safe_zone(&self, state: &str) -> bool {
        self.safe_zones.contains(&state.to_lowercase())
    }

    pub fn any_person_in_safe_zone(&self, states: &StateStore) -> bool {
        self.persons.iter().any(|person| {
            states
                .get_state(&person.to_string())
                .map(|s| self.in_safe_zone(&s))
                .unwrap_or(false)
        })
    }

    /// Every person has a known state outside the safe zones
    ///
    /// Persons without a state, or with `unknown`/`unavailable`, are not
    /// away. No persons means nobody is away.
    pub fn all_persons_away(&self, states: &StateStore) -> bool {
        !self.persons.is_empty()
            && self.persons.iter().all(|person| {
                states
                    .get(&person.to_string())
                    .map(|s| !s.is_unknown() && !s.is_unavailable() && !self.in_safe_zone(&s.state))
                    .unwrap_or(false)
            })
    }

    /// What a presence change should do to a panel in `current`
    ///
    /// Anyone home wins over everyone away. Auto-arm only starts from
    /// `disarmed` so it never overrides a chosen armed mode.
    pub fn decide(&self, states: &StateStore, current: AlarmState) -> Option<PresenceAction> {
        if self.persons.is_empty() {
            return None;
        }

        if self.any_person_in_safe_zone(states) {
            return (self.auto_disarm && current != AlarmState::Disarmed)
                .then_some(PresenceAction::Disarm);
        }

        (self.auto_arm && current == AlarmState::Disarmed && self.all_persons_away(states))
            .then_some(PresenceAction::ArmAway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarm_core::Context;
    use alarm_hub::EventBus;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn store(states: &[(&str, &str)]) -> StateStore {
        let store = StateStore::new(Arc::new(EventBus::new()));
        for (id, state) in states {
            store.set(id.parse().unwrap(), *state, HashMap::new(), Context::new());
        }
        store
    }

    fn presence(zones: &[&str]) -> Presence {
        Presence::from_options(&AlarmOptions {
            persons: vec!["person.anna".parse().unwrap(), "person.bob".parse().unwrap()],
            safe_zones: zones.iter().map(|z| z.parse().unwrap()).collect(),
            ..Default::default()
        })
    }

    #[test]
    fn test_safe_zone_includes_home_and_configured_zones() {
        let p = presence(&["zone.grandma"]);
        assert!(p.any_person_in_safe_zone(&store(&[("person.anna", "home")])));
        assert!(p.any_person_in_safe_zone(&store(&[("person.bob", "Grandma")])));
        assert!(!p.any_person_in_safe_zone(&store(&[("person.anna", "work")])));
    }

    #[test]
    fn test_all_away_needs_every_person_known() {
        let p = presence(&[]);
        assert!(p.all_persons_away(&store(&[
            ("person.anna", "not_home"),
            ("person.bob", "work")
        ])));
        // Bob has no state yet
        assert!(!p.all_persons_away(&store(&[("person.anna", "not_home")])));
        assert!(!p.all_persons_away(&store(&[
            ("person.anna", "not_home"),
            ("person.bob", "unavailable")
        ])));
    }

    #[test]
    fn test_no_persons_never_acts() {
        let p = Presence::from_options(&AlarmOptions::default());
        assert!(!p.all_persons_away(&store(&[])));
        assert_eq!(p.decide(&store(&[]), AlarmState::ArmedAway), None);
    }

    #[test]
    fn test_decide() {
        let p = presence(&[]);
        let away = store(&[("person.anna", "not_home"), ("person.bob", "not_home")]);
        let one_home = store(&[("person.anna", "home"), ("person.bob", "not_home")]);

        assert_eq!(p.decide(&away, AlarmState::Disarmed), Some(PresenceAction::ArmAway));
        assert_eq!(p.decide(&away, AlarmState::ArmedNight), None);
        assert_eq!(p.decide(&one_home, AlarmState::ArmedAway), Some(PresenceAction::Disarm));
        assert_eq!(p.decide(&one_home, AlarmState::Triggered), Some(PresenceAction::Disarm));
        assert_eq!(p.decide(&one_home, AlarmState::Disarmed), None);
    }

    #[test]
    fn test_decide_respects_flags() {
        let p = Presence::from_options(&AlarmOptions {
            persons: vec!["person.anna".parse().unwrap()],
            auto_arm_all_away: false,
            auto_disarm_on_any_home: false,
            ..Default::default()
        });
        assert_eq!(p.decide(&store(&[("person.anna", "work")]), AlarmState::Disarmed), None);
        assert_eq!(p.decide(&store(&[("person.anna", "home")]), AlarmState::ArmedAway), None);
    }
}
