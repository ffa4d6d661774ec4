//! The Instrumentation Policy: which methods get wrapped, and with which probe.
//!
//! A [`RuleSet`] is an ordered list of [`Rule`]s, loaded once before any module is seen and never
//! changed afterwards. [`decide`] is a pure function of a [`QualifiedMethod`] and the rule set:
//! the first matching rule wins, no match means [`InstrumentationDecision::Skip`].
//!
//! # Examples
//!
//! ```rust
//! use cilweave::policy::{decide, InstrumentationDecision, QualifiedMethod, Rule, RuleSet};
//!
//! let rules = RuleSet::new()
//!     .with_rule(Rule::new("Shop.*", "Checkout", "CheckoutTracer").capture_args(true))
//!     .with_rule(Rule::new("Shop.*", "*", "DefaultWrapper"));
//!
//! let checkout = QualifiedMethod::new("Shop", "Shop.Cart", "Checkout", "System.Int32");
//! assert_eq!(
//!     decide(&checkout, &rules),
//!     InstrumentationDecision::WrapWithProbe {
//!         probe_id: "CheckoutTracer".into(),
//!         capture_args: true
//!     }
//! );
//!
//! let other = QualifiedMethod::new("Billing", "Billing.Invoice", "Send", "");
//! assert_eq!(decide(&other, &rules), InstrumentationDecision::Skip);
//! ```

mod pattern;
mod xml;

pub use pattern::Pattern;

use std::{fmt, path::Path};

use crate::{
    metadata::{
        method::MethodIdentity,
        signatures::{SignatureMethod, SignatureParameter, TypeSignature},
        token::Token,
    },
    Result,
};

/// Probe identifier used when a rule does not name one
pub const DEFAULT_PROBE_ID: &str = "DefaultWrapper";

/// What to do with one method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstrumentationDecision {
    /// Leave the method untouched
    Skip,
    /// Wrap the method body with probe calls
    WrapWithProbe {
        /// Identifier passed to the entry probe
        probe_id: String,
        /// Snapshot the arguments into an `object[]` for the entry probe
        capture_args: bool,
    },
}

/// The name a method is matched by: assembly, declaring type, method and rendered parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedMethod {
    /// Simple assembly name
    pub assembly: String,
    /// Full declaring type name, nested types joined with `+`
    pub type_name: String,
    /// Method name
    pub method_name: String,
    /// Comma separated parameter type names, empty for no parameters
    pub parameters: String,
}

impl QualifiedMethod {
    /// Create a qualified method from its parts
    #[must_use]
    pub fn new(assembly: &str, type_name: &str, method_name: &str, parameters: &str) -> Self {
        QualifiedMethod {
            assembly: assembly.to_string(),
            type_name: type_name.to_string(),
            method_name: method_name.to_string(),
            parameters: parameters.to_string(),
        }
    }

    /// Qualify a method identity, naming class and value types through `resolve`
    pub fn from_identity<F>(assembly: &str, identity: &MethodIdentity, resolve: F) -> Self
    where
        F: Fn(Token) -> Option<String>,
    {
        QualifiedMethod {
            assembly: assembly.to_string(),
            type_name: identity.declaring_type.clone(),
            method_name: identity.name.clone(),
            parameters: render_parameters(&identity.signature, &resolve),
        }
    }
}

impl fmt::Display for QualifiedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]{}::{}({})",
            self.assembly, self.type_name, self.method_name, self.parameters
        )
    }
}

/// One instrumentation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Assembly the rule is restricted to, any when `None`
    pub assembly: Option<Pattern>,
    /// Declaring type pattern
    pub type_pattern: Pattern,
    /// Method name pattern
    pub method_pattern: Pattern,
    /// Exact parameter list, any overload when `None`
    pub parameters: Option<String>,
    /// Probe identifier
    pub probe_id: String,
    /// Capture arguments for the entry probe
    pub capture_args: bool,
}

impl Rule {
    /// Create a rule matching any assembly and overload
    #[must_use]
    pub fn new(type_pattern: &str, method_pattern: &str, probe_id: &str) -> Self {
        Rule {
            assembly: None,
            type_pattern: Pattern::new(type_pattern),
            method_pattern: Pattern::new(method_pattern),
            parameters: None,
            probe_id: probe_id.to_string(),
            capture_args: false,
        }
    }

    /// Restrict the rule to assemblies matching `pattern`
    #[must_use]
    pub fn assembly(mut self, pattern: &str) -> Self {
        self.assembly = Some(Pattern::new(pattern));
        self
    }

    /// Restrict the rule to one overload; `"void"` selects the parameterless one
    #[must_use]
    pub fn parameters(mut self, parameters: &str) -> Self {
        self.parameters = Some(normalize_parameters(parameters));
        self
    }

    /// Set argument capture
    #[must_use]
    pub fn capture_args(mut self, capture: bool) -> Self {
        self.capture_args = capture;
        self
    }

    /// Returns `true` if the rule selects `method`
    #[must_use]
    pub fn matches(&self, method: &QualifiedMethod) -> bool {
        if let Some(assembly) = &self.assembly {
            if !assembly.matches(&method.assembly) {
                return false;
            }
        }

        if !self.type_pattern.matches(&method.type_name)
            || !self.method_pattern.matches(&method.method_name)
        {
            return false;
        }

        match &self.parameters {
            Some(parameters) => *parameters == normalize_parameters(&method.parameters),
            None => true,
        }
    }
}

/// An ordered, immutable list of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Create an empty rule set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append every rule of `other`, keeping order
    #[must_use]
    pub fn merge(mut self, other: RuleSet) -> Self {
        self.rules.extend(other.rules);
        self
    }

    /// Parse one instrumentation extension document.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Xml`] for malformed XML and [`crate::Error::RuleSet`] for missing
    /// or invalid attributes.
    pub fn from_xml(document: &str) -> Result<Self> {
        Ok(RuleSet {
            rules: xml::parse_rules(document)?,
        })
    }

    /// Parse several documents into one rule set, in the order given.
    ///
    /// # Errors
    ///
    /// Fails on the first document that does not parse.
    pub fn from_xml_documents<I, S>(documents: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        documents
            .into_iter()
            .try_fold(RuleSet::new(), |rules, document| {
                Ok(rules.merge(RuleSet::from_xml(document.as_ref())?))
            })
    }

    /// Load one document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be read, and the parse errors of
    /// [`Self::from_xml`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let document = std::fs::read_to_string(path)?;
        let rules = Self::from_xml(&document)?;
        log::info!("Loaded {} rules from {}", rules.len(), path.display());
        Ok(rules)
    }

    /// The rules in order
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if there are no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The first rule selecting `method`
    #[must_use]
    pub fn first_match(&self, method: &QualifiedMethod) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(method))
    }
}

/// Decide how to instrument `method`. Deterministic and free of side effects.
#[must_use]
pub fn decide(method: &QualifiedMethod, rules: &RuleSet) -> InstrumentationDecision {
    match rules.first_match(method) {
        Some(rule) => InstrumentationDecision::WrapWithProbe {
            probe_id: rule.probe_id.clone(),
            capture_args: rule.capture_args,
        },
        None => InstrumentationDecision::Skip,
    }
}

/// Render the parameter list of a signature as comma separated type names.
///
/// Primitives use their `System.*` names, class and value types the name `resolve` returns (or
/// the token when it returns `None`), generic parameters `!n` and `!!n`, arrays `[]` and by-ref
/// parameters a trailing `&`.
pub fn render_parameters<F>(signature: &SignatureMethod, resolve: &F) -> String
where
    F: Fn(Token) -> Option<String>,
{
    signature
        .params
        .iter()
        .map(|param| render_parameter(param, resolve))
        .collect::<Vec<_>>()
        .join(",")
}

fn render_parameter<F>(param: &SignatureParameter, resolve: &F) -> String
where
    F: Fn(Token) -> Option<String>,
{
    let mut rendered = render_type(&param.base, resolve);
    if param.by_ref {
        rendered.push('&');
    }
    rendered
}

fn render_type<F>(signature: &TypeSignature, resolve: &F) -> String
where
    F: Fn(Token) -> Option<String>,
{
    let primitive = match signature {
        TypeSignature::Void => "System.Void",
        TypeSignature::Boolean => "System.Boolean",
        TypeSignature::Char => "System.Char",
        TypeSignature::I1 => "System.SByte",
        TypeSignature::U1 => "System.Byte",
        TypeSignature::I2 => "System.Int16",
        TypeSignature::U2 => "System.UInt16",
        TypeSignature::I4 => "System.Int32",
        TypeSignature::U4 => "System.UInt32",
        TypeSignature::I8 => "System.Int64",
        TypeSignature::U8 => "System.UInt64",
        TypeSignature::R4 => "System.Single",
        TypeSignature::R8 => "System.Double",
        TypeSignature::String => "System.String",
        TypeSignature::Object => "System.Object",
        TypeSignature::I => "System.IntPtr",
        TypeSignature::U => "System.UIntPtr",
        TypeSignature::TypedByRef => "System.TypedReference",
        TypeSignature::Unknown => "?",
        TypeSignature::FnPtr(_) => "method",
        _ => "",
    };
    if !primitive.is_empty() {
        return primitive.to_string();
    }

    match signature {
        TypeSignature::Class(token) | TypeSignature::ValueType(token) => {
            resolve(*token).unwrap_or_else(|| token.to_string())
        }
        TypeSignature::GenericParamType(index) => format!("!{index}"),
        TypeSignature::GenericParamMethod(index) => format!("!!{index}"),
        TypeSignature::SzArray(element) => format!("{}[]", render_type(element, resolve)),
        TypeSignature::Array(array) => format!(
            "{}[{}]",
            render_type(&array.base, resolve),
            ",".repeat(array.rank.saturating_sub(1) as usize)
        ),
        TypeSignature::Ptr(inner) => format!("{}*", render_type(inner, resolve)),
        TypeSignature::ByRef(inner) => format!("{}&", render_type(inner, resolve)),
        TypeSignature::Pinned(inner) => render_type(inner, resolve),
        TypeSignature::GenericInst(base, args) => format!(
            "{}<{}>",
            render_type(base, resolve),
            args.iter()
                .map(|arg| render_type(arg, resolve))
                .collect::<Vec<_>>()
                .join(",")
        ),
        _ => "?".to_string(),
    }
}

fn normalize_parameters(parameters: &str) -> String {
    let compact: String = parameters.chars().filter(|c| !c.is_whitespace()).collect();
    if compact == "void" {
        String::new()
    } else {
        compact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signatures::parse_method_signature;

    fn rules() -> RuleSet {
        RuleSet::new()
            .with_rule(Rule::new("Shop.Cart", "Add", "AddTracer").parameters("System.String, System.Int32"))
            .with_rule(Rule::new("Shop.Cart", "Add", "AnyAdd").assembly("Shop*"))
            .with_rule(Rule::new("Shop.*", "Get?", "Getter").capture_args(true))
    }

    #[test]
    fn test_first_match_wins() {
        let exact = QualifiedMethod::new("Shop", "Shop.Cart", "Add", "System.String,System.Int32");
        assert_eq!(
            decide(&exact, &rules()),
            InstrumentationDecision::WrapWithProbe {
                probe_id: "AddTracer".into(),
                capture_args: false
            }
        );

        let overload = QualifiedMethod::new("Shop.Core", "Shop.Cart", "Add", "System.Int32");
        assert_eq!(
            decide(&overload, &rules()),
            InstrumentationDecision::WrapWithProbe {
                probe_id: "AnyAdd".into(),
                capture_args: false
            }
        );

        let elsewhere = QualifiedMethod::new("Other", "Shop.Cart", "Add", "System.Int32");
        assert_eq!(decide(&elsewhere, &rules()), InstrumentationDecision::Skip);
    }

    #[test]
    fn test_wildcards() {
        let getter = QualifiedMethod::new("Shop", "Shop.Inventory", "GetX", "");
        assert_eq!(
            decide(&getter, &rules()),
            InstrumentationDecision::WrapWithProbe {
                probe_id: "Getter".into(),
                capture_args: true
            }
        );

        let long_name = QualifiedMethod::new("Shop", "Shop.Inventory", "GetAll", "");
        assert_eq!(decide(&long_name, &rules()), InstrumentationDecision::Skip);
    }

    #[test]
    fn test_void_parameters() {
        let rule = Rule::new("T", "M", "P").parameters("void");
        assert!(rule.matches(&QualifiedMethod::new("A", "T", "M", "")));
        assert!(!rule.matches(&QualifiedMethod::new("A", "T", "M", "System.Int32")));
    }

    #[test]
    fn test_decide_is_deterministic() {
        let method = QualifiedMethod::new("Shop", "Shop.Cart", "Add", "System.Int32");
        let rules = rules();
        assert_eq!(decide(&method, &rules), decide(&method, &rules));
    }

    #[test]
    fn test_render_parameters() -> Result<()> {
        // instance void M<T>(string, int32&, !!0, class 0x02000003[], valuetype 0x01000001)
        let signature = parse_method_signature(&[
            0x30, 0x01, 0x05, 0x01, 0x0E, 0x10, 0x08, 0x1E, 0x00, 0x1D, 0x12, 0x0C, 0x11, 0x05,
        ])?;
        let rendered = render_parameters(&signature, &|token: Token| {
            (token.value() == 0x0200_0003).then(|| "Shop.Item".to_string())
        });
        assert_eq!(
            rendered,
            "System.String,System.Int32&,!!0,Shop.Item[],0x01000001"
        );
        Ok(())
    }

    #[test]
    fn test_display() {
        let method = QualifiedMethod::new("Shop", "Shop.Cart", "Add", "System.Int32");
        assert_eq!(method.to_string(), "[Shop]Shop.Cart::Add(System.Int32)");
    }

    #[test]
    fn test_merge_keeps_order() {
        let merged = RuleSet::new()
            .with_rule(Rule::new("A", "*", "First"))
            .merge(RuleSet::new().with_rule(Rule::new("A", "*", "Second")));
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.rules()[0].probe_id, "First");
    }
}
