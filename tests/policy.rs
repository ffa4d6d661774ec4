//! Integration tests for rule loading and method selection.

use std::{sync::Arc, thread};

use cilweave::{
    injector::{InjectorConfig, MethodOutcome, ModuleInjector, SkipReason},
    metadata::{
        method::{MethodAttributes, MethodDef},
        token::Token,
    },
    module::{InMemoryModule, ModuleId},
    policy::{decide, InstrumentationDecision, QualifiedMethod, RuleSet},
    Error, Result,
};

const EXTENSION: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<extension xmlns="urn:cilweave-extension">
  <instrumentation>
    <tracerFactory name="ItemTracer" captureArgs="true">
      <match assemblyName="Shop" className="Shop.Cart">
        <exactMethodMatcher methodName="Add" parameters="Shop.Item" />
      </match>
    </tracerFactory>
    <tracerFactory name="CartTracer">
      <match assemblyName="Shop" className="Shop.Cart">
        <exactMethodMatcher methodName="*" />
      </match>
    </tracerFactory>
  </instrumentation>
</extension>"#;

fn def(row: u32, name: &str, signature: &[u8]) -> MethodDef {
    MethodDef {
        token: Token::new(0x0600_0000 | row),
        declaring_type: "Shop.Cart".into(),
        name: name.into(),
        flags: MethodAttributes::STATIC,
        impl_flags: 0,
        declaring_type_is_value: false,
        signature: signature.to_vec(),
    }
}

fn probe_of(outcome: Option<&MethodOutcome>) -> Option<&str> {
    match outcome? {
        MethodOutcome::Rewritten { probe_id, .. } => Some(probe_id.as_str()),
        MethodOutcome::Skipped(_) => None,
    }
}

#[test]
fn test_overloads_are_told_apart_by_parameters() -> Result<()> {
    let module = Arc::new(
        InMemoryModule::new(ModuleId(1), "Shop")
            .with_type_name(Token::new(0x0200_0002), "Shop.Item")
            // static void Add(Shop.Item)
            .with_method(def(1, "Add", &[0x00, 0x01, 0x01, 0x12, 0x08]), vec![(1 << 2) | 0x2, 0x2A])
            // static void Add(int)
            .with_method(def(2, "Add", &[0x00, 0x01, 0x01, 0x08]), vec![(1 << 2) | 0x2, 0x2A]),
    );
    let injector = ModuleInjector::new(InjectorConfig::default(), RuleSet::from_xml(EXTENSION)?);

    let report = injector.on_module_load(module)?;
    assert_eq!(probe_of(report.outcome(Token::new(0x0600_0001))), Some("ItemTracer"));
    assert_eq!(probe_of(report.outcome(Token::new(0x0600_0002))), Some("CartTracer"));
    Ok(())
}

#[test]
fn test_unmatched_assemblies_are_left_alone() -> Result<()> {
    let module = Arc::new(
        InMemoryModule::new(ModuleId(2), "Warehouse")
            .with_method(def(1, "Add", &[0x00, 0x00, 0x01]), vec![(1 << 2) | 0x2, 0x2A]),
    );
    let injector = ModuleInjector::new(InjectorConfig::default(), RuleSet::from_xml(EXTENSION)?);

    let report = injector.on_module_load(module.clone())?;
    assert_eq!(
        report.outcome(Token::new(0x0600_0001)),
        Some(&MethodOutcome::Skipped(SkipReason::NotSelected))
    );
    assert!(module.commits().is_empty());
    Ok(())
}

#[test]
fn test_earlier_documents_win() -> Result<()> {
    let override_document = r#"<extension><instrumentation>
        <tracerFactory name="Override"><match assemblyName="*" className="Shop.*">
          <exactMethodMatcher methodName="Add" />
        </match></tracerFactory>
      </instrumentation></extension>"#;

    let rules = RuleSet::from_xml_documents([override_document, EXTENSION])?;
    assert_eq!(rules.len(), 3);

    let add = QualifiedMethod::new("Shop", "Shop.Cart", "Add", "Shop.Item");
    assert_eq!(
        decide(&add, &rules),
        InstrumentationDecision::WrapWithProbe {
            probe_id: "Override".into(),
            capture_args: false,
        }
    );

    let clear = QualifiedMethod::new("Shop", "Shop.Cart", "Clear", "");
    assert!(matches!(
        decide(&clear, &rules),
        InstrumentationDecision::WrapWithProbe { probe_id, .. } if probe_id == "CartTracer"
    ));
    Ok(())
}

#[test]
fn test_decisions_do_not_depend_on_the_thread() -> Result<()> {
    let rules = Arc::new(RuleSet::from_xml(EXTENSION)?);
    let methods: Vec<QualifiedMethod> = ["Add", "Clear", "Total", "Remove"]
        .iter()
        .flat_map(|name| {
            [
                QualifiedMethod::new("Shop", "Shop.Cart", name, "Shop.Item"),
                QualifiedMethod::new("Shop", "Shop.Cart", name, "System.Int32"),
                QualifiedMethod::new("Shop", "Shop.Audit", name, ""),
            ]
        })
        .collect();
    let expected: Vec<InstrumentationDecision> =
        methods.iter().map(|method| decide(method, &rules)).collect();

    thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    methods
                        .iter()
                        .rev()
                        .map(|method| decide(method, &rules))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            let mut decisions = handle.join().expect("decision thread panicked");
            decisions.reverse();
            assert_eq!(decisions, expected);
        }
    });
    Ok(())
}

#[test]
fn test_rule_files_load_from_disk() -> Result<()> {
    let path = std::env::temp_dir().join(format!("cilweave-rules-{}.xml", std::process::id()));
    std::fs::write(&path, EXTENSION)?;
    let loaded = RuleSet::from_file(&path);
    std::fs::remove_file(&path)?;

    assert_eq!(loaded?, RuleSet::from_xml(EXTENSION)?);
    assert!(matches!(
        RuleSet::from_file(&path),
        Err(Error::FileError(_))
    ));
    Ok(())
}

#[test]
fn test_malformed_documents_are_rejected() {
    assert!(RuleSet::from_xml("<extension><instrumentation>").is_err());
    assert!(RuleSet::from_xml(
        r#"<extension><instrumentation><tracerFactory>
             <match className="Shop.Cart"><exactMethodMatcher /></match>
           </tracerFactory></instrumentation></extension>"#
    )
    .is_err());
}
