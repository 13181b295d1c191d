//! Tests for selector parsing and AutomationId fallbacks

use crate::keys::Key;
use crate::selector::{Selector, SelectorKind};

#[test]
fn parses_prefixed_selectors() {
    let s: Selector = "accessibility_id:BtnCobro".parse().unwrap();
    assert_eq!(s, Selector::accessibility_id("BtnCobro"));

    let s: Selector = "name:Buscar producto".parse().unwrap();
    assert_eq!(s, Selector::name("Buscar producto"));

    let s: Selector = "//Button[@Name='Agregar']".parse().unwrap();
    assert_eq!(s.kind, SelectorKind::Xpath);

    let s: Selector = "Cobrar".parse().unwrap();
    assert_eq!(s, Selector::name("Cobrar"));
}

#[test]
fn rejects_unknown_kinds_and_empty_values() {
    assert!(Selector::from_parts("telepathy", "x").is_err());
    assert!(Selector::from_parts("name", "  ").is_err());
    assert!("".parse::<Selector>().is_err());
}

#[test]
fn extracts_automation_id_from_xpath() {
    let s = Selector::xpath("//*[@AutomationId='BtnCobro']");
    assert_eq!(s.automation_id().as_deref(), Some("BtnCobro"));

    let s = Selector::xpath(r#"//Button[@AutomationId="txtMonto"]"#);
    assert_eq!(s.automation_id().as_deref(), Some("txtMonto"));

    assert_eq!(Selector::xpath("//Button[@Name='Cobrar']").automation_id(), None);
    assert_eq!(Selector::name("AutomationId='x'").automation_id(), None);
}

#[test]
fn fallbacks_only_for_automation_id_xpaths() {
    let s = Selector::xpath("//Pane/Button[@AutomationId='BtnCobro']");
    assert_eq!(
        s.fallbacks(),
        vec![
            Selector::accessibility_id("BtnCobro"),
            Selector::xpath("//*[@AutomationId='BtnCobro']"),
        ]
    );
    assert!(Selector::name("Cobrar").fallbacks().is_empty());
    assert!(Selector::accessibility_id("BtnCobro").fallbacks().is_empty());
}

#[test]
fn webdriver_strategies() {
    assert_eq!(SelectorKind::AccessibilityId.webdriver_strategy(), "accessibility id");
    assert_eq!(SelectorKind::Css.webdriver_strategy(), "css selector");
    assert_eq!(SelectorKind::ClassName.webdriver_strategy(), "class name");
}

#[test]
fn selector_kind_serde_is_snake_case() {
    let json = serde_json::to_string(&SelectorKind::AccessibilityId).unwrap();
    assert_eq!(json, "\"accessibility_id\"");
}

#[test]
fn key_vocabulary() {
    assert_eq!(Key::parse("Enter"), Key::Enter);
    assert_eq!(Key::parse("escape"), Key::Escape);
    assert_eq!(Key::parse("F5").native_code(), "{F5}");
    assert_eq!(Key::parse("Escape").native_code(), "{ESC}");
    assert_eq!(Key::parse("abc"), Key::Literal("abc".into()));
    assert!(Key::Tab.is_non_critical());
    assert!(!Key::Delete.is_non_critical());
    assert!(!Key::Literal("x".into()).is_non_critical());
}
