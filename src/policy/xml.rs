//! Loader for instrumentation extension documents.
//!
//! ```xml
//! <extension>
//!   <instrumentation>
//!     <tracerFactory name="CheckoutTracer" captureArgs="true">
//!       <match assemblyName="Shop" className="Shop.Cart">
//!         <exactMethodMatcher methodName="Checkout" parameters="System.Int32" />
//!       </match>
//!     </tracerFactory>
//!   </instrumentation>
//! </extension>
//! ```
//!
//! Every `exactMethodMatcher` yields one [`Rule`], in document order. A `match` without
//! `assemblyName` applies to every assembly. Elements the loader does not know are skipped
//! together with their attributes.

use std::borrow::Cow;

use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};

use crate::{
    policy::{Rule, DEFAULT_PROBE_ID},
    Error, Result,
};

struct Factory {
    probe_id: String,
    capture_args: bool,
}

struct Match {
    assembly: Option<String>,
    class_name: String,
}

pub(crate) fn parse_rules(document: &str) -> Result<Vec<Rule>> {
    let mut reader = Reader::from_str(document);
    reader.config_mut().trim_text(true);

    let mut rules = Vec::new();
    let mut factory: Option<Factory> = None;
    let mut current_match: Option<Match> = None;
    let mut depth = 0_usize;

    loop {
        let (element, is_empty) = match reader.read_event()? {
            Event::Start(element) => {
                depth += 1;
                (element, false)
            }
            Event::Empty(element) => (element, true),
            Event::End(element) => {
                depth = depth.saturating_sub(1);
                match element.local_name().as_ref() {
                    b"tracerFactory" => factory = None,
                    b"match" => current_match = None,
                    _ => {}
                }
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        match element.local_name().as_ref() {
            b"tracerFactory" => {
                if factory.is_some() {
                    return Err(Error::RuleSet("nested tracerFactory".to_string()));
                }
                let parsed = parse_factory(&element)?;
                if !is_empty {
                    factory = Some(parsed);
                }
            }
            b"match" => {
                if factory.is_none() {
                    return Err(Error::RuleSet(
                        "match outside of a tracerFactory".to_string(),
                    ));
                }
                let parsed = Match {
                    assembly: attribute(&element, "assemblyName")?
                        .map(|name| name.trim().to_string())
                        .filter(|name| !name.is_empty()),
                    class_name: required(&element, "className")?,
                };
                if !is_empty {
                    current_match = Some(parsed);
                }
            }
            b"exactMethodMatcher" => {
                let (Some(factory), Some(target)) = (&factory, &current_match) else {
                    return Err(Error::RuleSet(
                        "exactMethodMatcher outside of a match".to_string(),
                    ));
                };

                let mut rule = Rule::new(
                    &target.class_name,
                    &required(&element, "methodName")?,
                    &factory.probe_id,
                )
                .capture_args(factory.capture_args);
                if let Some(assembly) = &target.assembly {
                    rule = rule.assembly(assembly);
                }
                if let Some(parameters) = attribute(&element, "parameters")? {
                    rule = rule.parameters(&parameters);
                }
                rules.push(rule);
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(Error::RuleSet(format!(
            "document ends with {depth} unclosed elements"
        )));
    }

    Ok(rules)
}

fn parse_factory(element: &BytesStart<'_>) -> Result<Factory> {
    let probe_id = match attribute(element, "name")? {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => DEFAULT_PROBE_ID.to_string(),
    };

    let capture_args = match attribute(element, "captureArgs")?.as_deref() {
        None | Some("false" | "0") => false,
        Some("true" | "1") => true,
        Some(other) => {
            return Err(Error::RuleSet(format!(
                "captureArgs must be true or false, got '{other}'"
            )))
        }
    };

    Ok(Factory {
        probe_id,
        capture_args,
    })
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == name.as_bytes() {
            let value: Cow<'_, str> = attr.unescape_value()?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn required(element: &BytesStart<'_>, name: &str) -> Result<String> {
    match attribute(element, name)? {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(Error::RuleSet(format!(
            "<{}> requires a non-empty '{name}' attribute",
            String::from_utf8_lossy(element.local_name().as_ref())
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{decide, InstrumentationDecision, QualifiedMethod, RuleSet};

    const DOCUMENT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<extension xmlns="urn:cilweave:extension">
  <instrumentation>
    <tracerFactory name="CheckoutTracer" captureArgs="true">
      <match assemblyName="Shop" className="Shop.Cart">
        <exactMethodMatcher methodName="Checkout" parameters="System.Int32, System.String" />
        <exactMethodMatcher methodName="Clear" parameters="void" />
      </match>
    </tracerFactory>
    <tracerFactory>
      <match assemblyName="Shop*" className="Shop.Controllers.*">
        <exactMethodMatcher methodName="*" />
      </match>
    </tracerFactory>
  </instrumentation>
</extension>"#;

    #[test]
    fn test_parse_document() -> Result<()> {
        let rules = parse_rules(DOCUMENT)?;
        assert_eq!(rules.len(), 3);

        assert_eq!(rules[0].probe_id, "CheckoutTracer");
        assert!(rules[0].capture_args);
        assert_eq!(rules[0].parameters.as_deref(), Some("System.Int32,System.String"));
        assert_eq!(rules[1].parameters.as_deref(), Some(""));

        assert_eq!(rules[2].probe_id, DEFAULT_PROBE_ID);
        assert!(!rules[2].capture_args);
        assert_eq!(rules[2].parameters, None);
        Ok(())
    }

    #[test]
    fn test_rules_drive_decisions() -> Result<()> {
        let rules = RuleSet::from_xml(DOCUMENT)?;

        let clear = QualifiedMethod::new("Shop", "Shop.Cart", "Clear", "");
        assert_eq!(
            decide(&clear, &rules),
            InstrumentationDecision::WrapWithProbe {
                probe_id: "CheckoutTracer".into(),
                capture_args: true
            }
        );

        let index = QualifiedMethod::new("Shop.Web", "Shop.Controllers.Home", "Index", "");
        assert_eq!(
            decide(&index, &rules),
            InstrumentationDecision::WrapWithProbe {
                probe_id: DEFAULT_PROBE_ID.into(),
                capture_args: false
            }
        );

        let clear_overload = QualifiedMethod::new("Shop", "Shop.Cart", "Clear", "System.Boolean");
        assert_eq!(decide(&clear_overload, &rules), InstrumentationDecision::Skip);
        Ok(())
    }

    #[test]
    fn test_missing_required_attribute() {
        let document = r#"<extension><instrumentation><tracerFactory>
            <match assemblyName="Shop"><exactMethodMatcher methodName="Run"/></match>
        </tracerFactory></instrumentation></extension>"#;
        assert!(matches!(parse_rules(document), Err(Error::RuleSet(message)) if message.contains("className")));
    }

    #[test]
    fn test_match_without_assembly_covers_every_assembly() -> Result<()> {
        let document = r#"<extension><instrumentation><tracerFactory name="RunTracer">
            <match className="Shop.Cart"><exactMethodMatcher methodName="Run"/></match>
        </tracerFactory></instrumentation></extension>"#;
        let rules = RuleSet::from_xml(document)?;
        assert_eq!(rules.len(), 1);

        for assembly in ["Shop", "Warehouse", ""] {
            let run = QualifiedMethod::new(assembly, "Shop.Cart", "Run", "");
            assert_eq!(
                decide(&run, &rules),
                InstrumentationDecision::WrapWithProbe {
                    probe_id: "RunTracer".into(),
                    capture_args: false
                }
            );
        }
        Ok(())
    }

    #[test]
    fn test_matcher_outside_match() {
        let document = r#"<extension><exactMethodMatcher methodName="Run"/></extension>"#;
        assert!(matches!(parse_rules(document), Err(Error::RuleSet(_))));
    }

    #[test]
    fn test_invalid_capture_flag() {
        let document = r#"<tracerFactory captureArgs="maybe"></tracerFactory>"#;
        assert!(matches!(parse_rules(document), Err(Error::RuleSet(_))));
    }

    #[test]
    fn test_malformed_xml() {
        let document = r#"<extension><tracerFactory></extension>"#;
        assert!(matches!(parse_rules(document), Err(Error::Xml(_))));
    }

    #[test]
    fn test_unclosed_document() {
        let document = r#"<extension><instrumentation>"#;
        assert!(parse_rules(document).is_err());
    }

    #[test]
    fn test_escaped_names() -> Result<()> {
        let document = r#"<tracerFactory name="A&amp;B"><match assemblyName="Shop" className="Shop.List`1">
            <exactMethodMatcher methodName="Add"/></match></tracerFactory>"#;
        let rules = parse_rules(document)?;
        assert_eq!(rules[0].probe_id, "A&B");
        assert_eq!(rules[0].type_pattern.as_str(), "Shop.List`1");
        Ok(())
    }

    #[test]
    fn test_documents_merge_in_order() -> Result<()> {
        let first = r#"<tracerFactory name="First"><match assemblyName="A" className="T">
            <exactMethodMatcher methodName="M"/></match></tracerFactory>"#;
        let second = r#"<tracerFactory name="Second"><match assemblyName="A" className="T">
            <exactMethodMatcher methodName="M"/></match></tracerFactory>"#;
        let rules = RuleSet::from_xml_documents([first, second])?;
        assert_eq!(rules.len(), 2);

        let method = QualifiedMethod::new("A", "T", "M", "");
        assert_eq!(
            decide(&method, &rules),
            InstrumentationDecision::WrapWithProbe {
                probe_id: "First".into(),
                capture_args: false
            }
        );
        Ok(())
    }
}
