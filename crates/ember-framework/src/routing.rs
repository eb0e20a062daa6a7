//! Route resolution.
//!
//! The engine only talks to the [`Router`] trait. [`RuleMap`] is the default
//! implementation and understands rules such as:
//!
//! ```text
//! /                      static
//! /users/                static, with trailing-slash redirect for /users
//! /users/<name>          one non-empty segment
//! /users/<int:id>        one segment of digits, captured as an integer
//! /price/<float:amount>  one segment such as 3.50, captured as a float
//! /files/<path:rest>     the remainder of the path, slashes included
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};

use http::Method;
use serde_json::{Map, Value};

use ember_core::Error;

use crate::error::{SetupError, SetupResult};

/// Path parameters extracted by the router, keyed by variable name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewArgs(pub Map<String, Value>);

impl ViewArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl Deref for ViewArgs {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for ViewArgs {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// A route registration handed to a [`Router`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub pattern: String,
    pub endpoint: String,
    /// Accepted methods. `HEAD` is implied by `GET`.
    pub methods: Vec<Method>,
    /// Whether the engine answers `OPTIONS` for this rule itself.
    pub provide_automatic_options: bool,
}

/// A successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub rule: String,
    pub endpoint: String,
    pub view_args: ViewArgs,
    pub methods: Vec<Method>,
    pub provide_automatic_options: bool,
}

impl RouteMatch {
    /// The blueprint owning the matched endpoint, if any.
    pub fn blueprint(&self) -> Option<&str> {
        self.endpoint.rsplit_once('.').map(|(bp, _)| bp)
    }
}

/// Resolves requests to endpoints.
pub trait Router: Send + Sync + 'static {
    /// Adds a rule. Called only during application setup.
    fn add_rule(&mut self, rule: Rule) -> SetupResult<()>;

    /// Resolves a request.
    ///
    /// Fails with `404` when nothing matches, `405` when the path matches but
    /// the method does not, or a `RequestRedirect` routing error when the
    /// path needs a trailing slash.
    fn resolve(&self, method: &Method, path: &str, host: Option<&str>) -> Result<RouteMatch, Error>;

    /// Every method accepted for `path`, sorted.
    fn allowed_methods(&self, path: &str, host: Option<&str>) -> Vec<Method>;
}

// =============================================================================
// RuleMap
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Converter {
    String,
    Int,
    Float,
    Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Variable { name: String, converter: Converter },
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: Rule,
    segments: Vec<Segment>,
    static_count: usize,
}

impl CompiledRule {
    fn compile(rule: Rule) -> SetupResult<Self> {
        let invalid = |reason: &str| SetupError::InvalidRule {
            rule: rule.pattern.clone(),
            reason: reason.to_string(),
        };

        let body = rule
            .pattern
            .strip_prefix('/')
            .ok_or_else(|| invalid("rules must start with a slash"))?;

        let mut segments = Vec::new();
        let mut names: Vec<&str> = Vec::new();
        let parts: Vec<&str> = body.split('/').collect();
        for (i, part) in parts.iter().enumerate() {
            let Some(inner) = part.strip_prefix('<').and_then(|p| p.strip_suffix('>')) else {
                if part.contains('<') || part.contains('>') {
                    return Err(invalid("variables must span a whole segment"));
                }
                segments.push(Segment::Static((*part).to_string()));
                continue;
            };

            let (converter, name) = match inner.split_once(':') {
                Some(("int", name)) => (Converter::Int, name),
                Some(("float", name)) => (Converter::Float, name),
                Some(("path", name)) => (Converter::Path, name),
                Some(("string", name)) => (Converter::String, name),
                Some((other, _)) => {
                    return Err(invalid(&format!("unknown converter '{other}'")));
                }
                None => (Converter::String, inner),
            };
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(invalid(&format!("invalid variable name '{name}'")));
            }
            if names.contains(&name) {
                return Err(invalid(&format!("variable '{name}' is used twice")));
            }
            if converter == Converter::Path && i + 1 != parts.len() {
                return Err(invalid("a path variable must be the last segment"));
            }
            names.push(name);
            segments.push(Segment::Variable {
                name: name.to_string(),
                converter,
            });
        }

        let static_count = segments
            .iter()
            .filter(|s| matches!(s, Segment::Static(text) if !text.is_empty()))
            .count();
        Ok(Self {
            rule,
            segments,
            static_count,
        })
    }

    fn match_path(&self, path: &str) -> Option<ViewArgs> {
        let body = path.strip_prefix('/')?;
        let parts: Vec<&str> = body.split('/').collect();
        let mut args = ViewArgs::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Static(text) => {
                    if parts.get(i) != Some(&text.as_str()) {
                        return None;
                    }
                }
                Segment::Variable { name, converter } => {
                    if *converter == Converter::Path {
                        let rest = parts.get(i..)?.join("/");
                        if rest.is_empty() {
                            return None;
                        }
                        args.insert(name.clone(), Value::String(rest));
                        return Some(args);
                    }
                    let value = convert(parts.get(i)?, *converter)?;
                    args.insert(name.clone(), value);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(args)
    }

    fn allows(&self, method: &Method) -> bool {
        self.rule.methods.contains(method)
    }
}

fn convert(raw: &str, converter: Converter) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    match converter {
        Converter::String => Some(Value::String(raw.to_string())),
        Converter::Int => {
            if !raw.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            raw.parse::<u64>().ok().map(Value::from)
        }
        Converter::Float => {
            if !raw.contains('.') || !raw.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
                return None;
            }
            raw.parse::<f64>().ok().map(Value::from)
        }
        Converter::Path => Some(Value::String(raw.to_string())),
    }
}

/// The default [`Router`].
///
/// When several rules match a path, the one with the most static segments
/// wins; ties go to the rule registered first. Host matching is not
/// supported and the `host` argument is ignored.
#[derive(Debug, Clone, Default)]
pub struct RuleMap {
    rules: Vec<CompiledRule>,
}

impl RuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterates over registered rules in registration order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|r| &r.rule)
    }

    fn candidates(&self, path: &str) -> Vec<(&CompiledRule, ViewArgs)> {
        let mut found: Vec<(&CompiledRule, ViewArgs)> = self
            .rules
            .iter()
            .filter_map(|rule| rule.match_path(path).map(|args| (rule, args)))
            .collect();
        // Stable sort keeps registration order among equals.
        found.sort_by(|a, b| b.0.static_count.cmp(&a.0.static_count));
        found
    }
}

impl Router for RuleMap {
    fn add_rule(&mut self, mut rule: Rule) -> SetupResult<()> {
        if rule.methods.contains(&Method::GET) && !rule.methods.contains(&Method::HEAD) {
            rule.methods.push(Method::HEAD);
        }
        let compiled = CompiledRule::compile(rule)?;
        self.rules.push(compiled);
        Ok(())
    }

    fn resolve(&self, method: &Method, path: &str, _host: Option<&str>) -> Result<RouteMatch, Error> {
        let mut allowed: Vec<Method> = Vec::new();
        for (rule, view_args) in self.candidates(path) {
            if rule.allows(method) {
                return Ok(RouteMatch {
                    rule: rule.rule.pattern.clone(),
                    endpoint: rule.rule.endpoint.clone(),
                    view_args,
                    methods: rule.rule.methods.clone(),
                    provide_automatic_options: rule.rule.provide_automatic_options,
                });
            }
            allowed.extend(rule.rule.methods.iter().cloned());
        }

        if !allowed.is_empty() {
            return Err(Error::method_not_allowed(&sorted_methods(allowed)));
        }

        // A slash redirect only comes from a rule that takes the method.
        if !path.ends_with('/') {
            let with_slash = format!("{path}/");
            let slashed = self.candidates(&with_slash);
            if slashed.iter().any(|(rule, _)| rule.allows(method)) {
                return Err(Error::redirect(&with_slash));
            }
            if !slashed.is_empty() {
                let methods = slashed
                    .iter()
                    .flat_map(|(rule, _)| rule.rule.methods.iter().cloned())
                    .collect();
                return Err(Error::method_not_allowed(&sorted_methods(methods)));
            }
        }

        Err(Error::not_found())
    }

    fn allowed_methods(&self, path: &str, _host: Option<&str>) -> Vec<Method> {
        sorted_methods(
            self.candidates(path)
                .into_iter()
                .flat_map(|(rule, _)| rule.rule.methods.iter().cloned())
                .collect(),
        )
    }
}

fn sorted_methods(mut methods: Vec<Method>) -> Vec<Method> {
    methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    methods.dedup();
    methods
}

/// Options for [`Application::add_url_rule`](crate::Application::add_url_rule).
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub(crate) endpoint: Option<String>,
    pub(crate) methods: Option<Vec<Method>>,
    pub(crate) provide_automatic_options: Option<bool>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the endpoint. Defaults to the handler's function name.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Accepted methods. Defaults to `GET`.
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    /// Controls the automatic `OPTIONS` response. Defaults to on unless the
    /// methods already include `OPTIONS`.
    pub fn provide_automatic_options(mut self, provide: bool) -> Self {
        self.provide_automatic_options = Some(provide);
        self
    }

    /// Turns these options into a rule for `pattern`.
    pub(crate) fn into_rule(self, pattern: &str, endpoint: String) -> Rule {
        let mut methods = self.methods.unwrap_or_else(|| vec![Method::GET]);
        let provide_automatic_options = self
            .provide_automatic_options
            .unwrap_or_else(|| !methods.contains(&Method::OPTIONS));
        if provide_automatic_options && !methods.contains(&Method::OPTIONS) {
            methods.push(Method::OPTIONS);
        }
        Rule {
            pattern: pattern.to_string(),
            endpoint,
            methods: sorted_methods(methods),
            provide_automatic_options,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: Vec<&str> = self.methods.iter().map(Method::as_str).collect();
        write!(f, "{} ({}) -> {}", self.pattern, methods.join(", "), self.endpoint)
    }
}
