use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Default parameters of one predicate type: field name -> value
pub type DefaultParams = Map<String, Value>;

/// Default parameters of every predicate type, set by `default`
pub type Defaults = BTreeMap<String, DefaultParams>;

/// Facts about the incoming HTTP request
///
/// Header names are stored lower-cased; only the first value of a
/// repeated header is kept. Query parameters keep every value.
#[derive(Debug, Clone, Default)]
pub struct Incoming {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

impl Incoming {
    /// Create request facts for a method and path
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Add a header (the name is lower-cased, the first value wins)
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| value.into());
        self
    }

    /// Add one value of a query parameter
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Set the raw request body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Parse a raw query string (`a=1&b=2&a=3`) into query parameters
    pub fn with_query_string(mut self, query: &str) -> Self {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            self.query
                .entry(percent_decode(name))
                .or_default()
                .push(percent_decode(value));
        }
        self
    }

    /// Look up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The view of the request exposed to expressions as `In`
    fn to_value(&self) -> Value {
        json!({
            "Method": self.method,
            "Path": self.path,
            "Header": self.headers,
            "Query": self.query,
        })
    }
}

/// Form-style decoding: `+` is a space, then `%XX` escapes
fn percent_decode(s: &str) -> String {
    let spaced = s.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

/// Mutable evaluation state for one lifetime (one request, or `init`)
///
/// `V` and `R` are flat and never restored; `Default` is snapshotted and
/// restored around every pipe by the executor. A Context is only ever
/// used by one worker at a time.
#[derive(Debug, Clone)]
pub struct Context {
    incoming: Incoming,
    /// Cached `In` view of `incoming`
    input: Value,
    defaults: Defaults,
    /// `V`, always an object
    variables: Value,
    /// `R`, always an object of objects
    registered: Value,
    /// Outcome of the most recently evaluated step
    pub result: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::with_incoming(Incoming::default())
    }

    /// Create a context for an incoming request
    pub fn with_incoming(incoming: Incoming) -> Self {
        Self {
            input: incoming.to_value(),
            incoming,
            defaults: Defaults::new(),
            variables: Value::Object(Map::new()),
            registered: Value::Object(Map::new()),
            result: false,
        }
    }

    /// Copy a seed context (the outcome of `init`) for a new request
    ///
    /// Variables, defaults and registered results are deep-copied, so the
    /// seed itself is never mutated after `init`.
    pub fn from_seed(seed: &Context, incoming: Incoming) -> Self {
        Self {
            input: incoming.to_value(),
            incoming,
            defaults: seed.defaults.clone(),
            variables: seed.variables.clone(),
            registered: seed.registered.clone(),
            result: false,
        }
    }

    /// Set a variable (builder version)
    ///
    /// # Example
    /// ```
    /// use broker::pipeline::Context;
    /// use serde_json::json;
    ///
    /// let ctx = Context::new()
    ///     .with_var("user", json!({"id": "123"}))
    ///     .with_var("count", json!(42));
    /// assert_eq!(ctx.var("count"), Some(&json!(42)));
    /// ```
    pub fn with_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set_var(name, value);
        self
    }

    /// Set a variable; it stays visible for the rest of the lifetime
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        if let Value::Object(vars) = &mut self.variables {
            vars.insert(name.into(), value);
        }
    }

    /// Get a variable by name
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Store a registered result, replacing any previous one of that name
    pub fn register(&mut self, name: impl Into<String>, result: Map<String, Value>) {
        if let Value::Object(registered) = &mut self.registered {
            registered.insert(name.into(), Value::Object(result));
        }
    }

    /// Default parameters of a predicate type, if any
    pub fn defaults_for(&self, predicate: &str) -> Option<&DefaultParams> {
        self.defaults.get(predicate)
    }

    /// Merge fields into the defaults of a predicate type, field by field
    pub fn merge_defaults(&mut self, predicate: &str, fields: DefaultParams) {
        let entry = self.defaults.entry(predicate.to_string()).or_default();
        for (field, value) in fields {
            entry.insert(field, value);
        }
    }

    /// Deep copy of every default, taken when a pipe is entered
    pub fn snapshot_defaults(&self) -> Defaults {
        self.defaults.clone()
    }

    /// Put back defaults saved by [`Context::snapshot_defaults`]
    pub fn restore_defaults(&mut self, defaults: Defaults) {
        self.defaults = defaults;
    }

    /// All defaults
    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    /// The incoming request facts
    pub fn incoming(&self) -> &Incoming {
        &self.incoming
    }

    /// `In`, as seen by expressions
    pub fn input_value(&self) -> &Value {
        &self.input
    }

    /// `V`, as seen by expressions
    pub fn variables_value(&self) -> &Value {
        &self.variables
    }

    /// `R`, as seen by expressions
    pub fn registered_value(&self) -> &Value {
        &self.registered
    }
}
