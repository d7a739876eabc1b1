//! Script compositor: assembles the injected guest runtime.
//!
//! The composed unit is an isolating wrapper that keeps the secret and the
//! bridge internals out of page-global scope, inlines the shared runtime and
//! document-start scripts, and defers document-end scripts until the
//! content-ready event.

use uuid::Uuid;

use crate::protocol::SecretToken;

/// When a content script executes relative to the hosted content's
/// lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionPhase {
    /// Before content parsing begins.
    DocumentStart,
    /// After the content is fully parsed.
    DocumentEnd,
}

/// An ordered unit of guest-side source registered for injection.
#[derive(Debug, Clone)]
pub struct ContentScript {
    pub source: String,
    pub phase: InjectionPhase,
}

impl ContentScript {
    pub fn new(source: impl Into<String>, phase: InjectionPhase) -> Self {
        Self {
            source: source.into(),
            phase,
        }
    }
}

/// Identity of a registered content script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptId(Uuid);

impl ScriptId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Identity of one injected unit in the surrounding engine's script list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(Uuid);

/// One self-contained script installed in the guest context.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectedUnit {
    pub id: UnitId,
    pub source: String,
}

impl InjectedUnit {
    pub fn new(source: String) -> Self {
        Self {
            id: UnitId(Uuid::new_v4()),
            source,
        }
    }
}

/// The surrounding engine's list of injected scripts.
///
/// The bridge owns exactly one unit in it and must not disturb or duplicate
/// units it does not own.
pub trait ScriptRegistrar: Send + Sync {
    fn installed(&self) -> Vec<InjectedUnit>;
    fn replace_all(&self, units: Vec<InjectedUnit>);
}

pub(crate) fn compose(
    runtime_source: &str,
    scripts: &[(ScriptId, ContentScript)],
    secret: &SecretToken,
    isolated_context: bool,
) -> String {
    let start = sources_for(scripts, InjectionPhase::DocumentStart);
    let end = sources_for(scripts, InjectionPhase::DocumentEnd);

    let mut unit = String::new();
    unit.push_str("(function () {\n");
    unit.push_str("  'use strict';\n");
    unit.push_str(&format!("  var __bridge_secret__ = '{}';\n", secret.expose()));
    unit.push_str(&format!("  {runtime_source}\n"));
    unit.push_str(&format!("  {start}\n"));
    unit.push_str("  document.addEventListener('DOMContentLoaded', function () {\n");
    unit.push_str(&format!("    {end}\n"));
    unit.push_str("  }, false);\n");
    if !isolated_context {
        unit.push_str("  window.bridge = bridge;\n");
    }
    unit.push_str("}) ();");
    unit
}

fn sources_for(scripts: &[(ScriptId, ContentScript)], phase: InjectionPhase) -> String {
    scripts
        .iter()
        .filter(|(_, script)| script.phase == phase)
        .map(|(_, script)| script.source.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replace-in-place: substitute the bridge's previous unit with `new_unit`
/// at its position, preserving the relative order of units the bridge does
/// not own; append when no previous unit is installed.
pub(crate) fn swap_unit(
    mut units: Vec<InjectedUnit>,
    previous: Option<UnitId>,
    new_unit: InjectedUnit,
) -> Vec<InjectedUnit> {
    if let Some(prev) = previous
        && let Some(slot) = units.iter_mut().find(|unit| unit.id == prev)
    {
        *slot = new_unit;
        return units;
    }
    units.push(new_unit);
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_start_and_end_scripts_around_content_ready() {
        let secret = SecretToken::generate();
        let scripts = vec![
            (
                ScriptId::new(),
                ContentScript::new("startA();", InjectionPhase::DocumentStart),
            ),
            (
                ScriptId::new(),
                ContentScript::new("endB();", InjectionPhase::DocumentEnd),
            ),
        ];

        let unit = compose("var bridge = {};", &scripts, &secret, true);

        let runtime = unit.find("var bridge = {};").unwrap();
        let start = unit.find("startA();").unwrap();
        let listener = unit.find("DOMContentLoaded").unwrap();
        let end = unit.find("endB();").unwrap();

        assert!(runtime < start);
        assert!(start < listener);
        assert!(listener < end);
    }

    #[test]
    fn same_phase_scripts_keep_registration_order() {
        let secret = SecretToken::generate();
        let scripts = vec![
            (
                ScriptId::new(),
                ContentScript::new("first();", InjectionPhase::DocumentStart),
            ),
            (
                ScriptId::new(),
                ContentScript::new("second();", InjectionPhase::DocumentStart),
            ),
        ];

        let unit = compose("", &scripts, &secret, true);
        assert!(unit.find("first();").unwrap() < unit.find("second();").unwrap());
    }

    #[test]
    fn secret_is_a_wrapper_local_constant() {
        let secret = SecretToken::generate();
        let unit = compose("", &[], &secret, true);

        assert!(unit.starts_with("(function () {"));
        assert!(unit.ends_with("}) ();"));
        assert!(unit.contains(&format!("var __bridge_secret__ = '{}';", secret.expose())));
    }

    #[test]
    fn page_scope_export_follows_the_isolation_flag() {
        let secret = SecretToken::generate();
        assert!(!compose("", &[], &secret, true).contains("window.bridge"));
        assert!(compose("", &[], &secret, false).contains("window.bridge = bridge;"));
    }

    #[test]
    fn swap_replaces_in_place_preserving_foreign_units() {
        let foreign_before = InjectedUnit::new("f1".into());
        let ours = InjectedUnit::new("old".into());
        let foreign_after = InjectedUnit::new("f2".into());
        let replacement = InjectedUnit::new("new".into());
        let replacement_id = replacement.id;

        let updated = swap_unit(
            vec![foreign_before.clone(), ours.clone(), foreign_after.clone()],
            Some(ours.id),
            replacement,
        );

        assert_eq!(updated.len(), 3);
        assert_eq!(updated[0].id, foreign_before.id);
        assert_eq!(updated[1].id, replacement_id);
        assert_eq!(updated[1].source, "new");
        assert_eq!(updated[2].id, foreign_after.id);
    }

    #[test]
    fn swap_appends_when_no_previous_unit_is_installed() {
        let foreign = InjectedUnit::new("f".into());
        let fresh = InjectedUnit::new("new".into());
        let fresh_id = fresh.id;

        let updated = swap_unit(vec![foreign.clone()], None, fresh);
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[0].id, foreign.id);
        assert_eq!(updated[1].id, fresh_id);
    }

    #[test]
    fn swap_appends_when_the_previous_unit_is_gone() {
        let foreign = InjectedUnit::new("f".into());
        let fresh = InjectedUnit::new("new".into());
        let fresh_id = fresh.id;
        let departed = UnitId(Uuid::new_v4());

        let updated = swap_unit(vec![foreign], Some(departed), fresh);
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[1].id, fresh_id);
    }
}
