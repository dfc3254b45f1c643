/// Pipeline executor and dependencies
///
/// This module contains the execution engine: the per-step state machine,
/// the pipe drivers, the value binder and the plugin contract.

pub mod binder;
pub mod traits;

use serde_json::Value;
use tracing::{debug, debug_span, error, trace, warn};

use crate::config::{Content, Directives, Pipe, PipelineConfig, Step};
use crate::pipeline::{ConfigError, Context};
use binder::{bind_params, convert};
use traits::PluginRegistry;

/// The pipeline executor
///
/// The executor is stateless; everything a run changes lives in the
/// [`Context`] it is given. Nothing here returns an error: problems are
/// logged and turn into `false`.
pub struct Executor<'a> {
    /// Plugins available to steps
    pub registry: &'a PluginRegistry,
}

impl<'a> Executor<'a> {
    /// Create a new executor over a plugin registry
    pub fn new(registry: &'a PluginRegistry) -> Self {
        Self { registry }
    }

    /// Run the `init` block against the seed context
    ///
    /// Defaults set here stay in the seed, so every request starts with them.
    pub fn run_init(&self, steps: &[Step], ctx: &mut Context) -> bool {
        let _span = debug_span!("init").entered();
        let outcome = self.run_steps(steps, ctx);
        debug!(result = outcome, "Init finished");
        outcome
    }

    /// Run every top-level pipe for one request
    ///
    /// Returns the result of the last pipe, or `false` without pipes.
    pub fn run_request(&self, config: &PipelineConfig, ctx: &mut Context) -> bool {
        let mut outcome = false;
        for pipe in &config.pipes {
            outcome = self.run_pipe(pipe, ctx);
        }
        outcome
    }

    /// Run one top-level pipe
    ///
    /// The pipe gets its own default scope: its `default` mapping and any
    /// `default` step inside are gone once it returns.
    pub fn run_pipe(&self, pipe: &Pipe, ctx: &mut Context) -> bool {
        let _span = debug_span!("pipe", pipe = %pipe.label()).entered();
        debug!("Pipe started");

        let saved = ctx.snapshot_defaults();
        let outcome = match self.apply_defaults(&pipe.defaults, ctx) {
            Ok(()) => self.run_steps(&pipe.steps, ctx),
            Err(e) => {
                error!(position = %pipe.position, error = %e, "Invalid pipe default");
                false
            }
        };
        ctx.restore_defaults(saved);

        debug!(result = outcome, "Pipe finished");
        outcome
    }

    /// Run steps in order, stopping at the first `false`
    ///
    /// An empty list is `false`.
    pub fn run_steps(&self, steps: &[Step], ctx: &mut Context) -> bool {
        if steps.is_empty() {
            return false;
        }
        steps.iter().all(|step| self.process(step, ctx))
    }

    /// Evaluate one step and record its outcome in `ctx.result`
    pub fn process(&self, step: &Step, ctx: &mut Context) -> bool {
        let Some(outcome) = self.evaluate(step, ctx) else {
            return true;
        };
        debug!(position = %step.position, step = %step.label(), result = outcome, "Step finished");
        ctx.result = outcome;
        outcome
    }

    /// `None` when the guard skipped the step; the context is then untouched
    fn evaluate(&self, step: &Step, ctx: &mut Context) -> Option<bool> {
        let directives = match &step.directives {
            Ok(directives) => directives,
            Err(e) => {
                error!(position = %step.position, error = %e, "Invalid step");
                return Some(false);
            }
        };

        if let Some(when) = &directives.when {
            match boolean("when", when, ctx) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(position = %step.position, "Guard is false, skipping step");
                    return None;
                }
                Err(e) => {
                    warn!(position = %step.position, error = %e, "Guard failed, skipping step");
                    return None;
                }
            }
        }

        match self.dispatch(directives, ctx) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(position = %step.position, step = %step.label(), error = %e, "Step failed");
                Some(false)
            }
        }
    }

    fn dispatch(&self, directives: &Directives, ctx: &mut Context) -> Result<bool, ConfigError> {
        match &directives.content {
            Content::Variables(assignments) => {
                for (name, raw) in assignments {
                    let value = convert(raw, ctx).map_err(|e| ConfigError::binding("variable", e))?;
                    trace!(variable = %name, value = %value, "Variable set");
                    ctx.set_var(name.as_str(), value);
                }
                Ok(true)
            }

            Content::Defaults(entries) => {
                self.apply_defaults(entries, ctx)?;
                Ok(true)
            }

            Content::Pipe(steps) => {
                let saved = ctx.snapshot_defaults();
                let inner = self.run_steps(steps, ctx);
                ctx.restore_defaults(saved);
                debug!(result = inner, "Sub-pipe finished");

                match &directives.result {
                    Some(result) => boolean("result", result, ctx),
                    None => Ok(true),
                }
            }

            Content::Plugin { name, params } => self.invoke(name, params, directives, ctx),
        }
    }

    fn invoke(
        &self,
        name: &str,
        raw: &Value,
        directives: &Directives,
        ctx: &mut Context,
    ) -> Result<bool, ConfigError> {
        let params = bind_params(name, raw, ctx)?;
        trace!(plugin = name, params = ?params, "Parameters bound");

        let Some(mut plugin) = self.registry.instantiate(name, &params)? else {
            return Err(ConfigError::UnknownPredicate {
                name: name.to_string(),
            });
        };

        let mut outcome = match plugin.call(&params, ctx) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(plugin = name, error = %e, "Plugin failed");
                false
            }
        };

        if let Some(register) = &directives.register {
            let mut result = plugin.result().unwrap_or_default();
            if let Some(discarded) = result.insert("result".to_string(), Value::Bool(outcome)) {
                warn!(plugin = name, register = %register, discarded = %discarded, "Plugin field 'result' discarded");
            }
            ctx.register(register.as_str(), result);
        }

        if let Some(result) = &directives.result {
            outcome = boolean("result", result, ctx)?;
        }
        Ok(outcome)
    }

    /// Bind `predicate -> fields` entries and merge them into the defaults
    fn apply_defaults(&self, entries: &[(String, Value)], ctx: &mut Context) -> Result<(), ConfigError> {
        for (predicate, raw) in entries {
            let fields = match convert(raw, ctx).map_err(|e| ConfigError::binding("default", e))? {
                Value::Object(fields) => fields,
                other => {
                    return Err(ConfigError::invalid_directive(
                        "default",
                        format!("fields of '{}' bound to {}", predicate, other),
                    ));
                }
            };
            ctx.merge_defaults(predicate, fields);
        }
        Ok(())
    }
}

/// Bind a `when` or `result` directive and require a boolean
fn boolean(directive: &str, raw: &Value, ctx: &Context) -> Result<bool, ConfigError> {
    let value = convert(raw, ctx).map_err(|e| ConfigError::binding(directive, e))?;
    value.as_bool().ok_or_else(|| ConfigError::NotBoolean {
        directive: directive.to_string(),
        actual: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_str;
    use crate::executor::traits::Predicate;
    use crate::pipeline::PluginError;
    use serde_json::{Map, json};
    use std::path::Path;

    /// Answers its `answer` parameter and exposes `data` as its result
    #[derive(Default)]
    struct Check {
        data: Option<Map<String, Value>>,
    }

    impl Predicate for Check {
        fn name(&self) -> &str {
            "check"
        }

        fn params_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "answer": {"type": "boolean"},
                    "data": {"type": "object"},
                },
                "required": ["answer"],
            })
        }

        fn call(&mut self, params: &Map<String, Value>, _ctx: &mut Context) -> Result<bool, PluginError> {
            self.data = params.get("data").and_then(Value::as_object).cloned();
            Ok(params["answer"] == json!(true))
        }

        fn result(&self) -> Option<Map<String, Value>> {
            self.data.clone()
        }
    }

    /// Counts its invocations in `V.count`
    struct Count;

    impl Predicate for Count {
        fn name(&self) -> &str {
            "count"
        }

        fn params_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn call(&mut self, _params: &Map<String, Value>, ctx: &mut Context) -> Result<bool, PluginError> {
            let count = ctx.var("count").and_then(Value::as_i64).unwrap_or(0);
            ctx.set_var("count", json!(count + 1));
            Ok(true)
        }
    }

    /// Always fails
    struct Fail;

    impl Predicate for Fail {
        fn name(&self) -> &str {
            "fail"
        }

        fn params_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn call(&mut self, _params: &Map<String, Value>, _ctx: &mut Context) -> Result<bool, PluginError> {
            Err(PluginError::failed("boom"))
        }
    }

    fn create_test_registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry.register(|| Box::new(Check::default())).unwrap();
        registry.register(|| Box::new(Count)).unwrap();
        registry.register(|| Box::new(Fail)).unwrap();
        registry
    }

    fn run(yaml: &str) -> (bool, Context) {
        run_with(yaml, Context::new())
    }

    fn run_with(yaml: &str, mut ctx: Context) -> (bool, Context) {
        let registry = create_test_registry();
        let config = load_str("test.yml", yaml, Path::new("."), &registry).unwrap();
        let executor = Executor::new(&registry);
        if let Some(init) = &config.init {
            executor.run_init(init, &mut ctx);
        }
        let outcome = executor.run_request(&config, &mut ctx);
        (outcome, ctx)
    }

    #[test]
    fn test_single_step_pipe() {
        let (outcome, ctx) = run("- pipe:\n    - check: {answer: true}\n");
        assert!(outcome);
        assert!(ctx.result);
    }

    #[test]
    fn test_stops_at_first_false() {
        let (outcome, ctx) = run(
            r#"
- pipe:
    - count: {}
    - check: {answer: false}
    - count: {}
    - variable: {after: true}
"#,
        );
        assert!(!outcome);
        assert_eq!(ctx.var("count"), Some(&json!(1)));
        assert_eq!(ctx.var("after"), None);
    }

    #[test]
    fn test_empty_pipe_is_false() {
        let (outcome, _) = run("- pipe: []\n");
        assert!(!outcome);
    }

    #[test]
    fn test_no_pipes_is_false() {
        let (outcome, _) = run("[]");
        assert!(!outcome);
    }

    #[test]
    fn test_last_pipe_decides() {
        let (outcome, ctx) = run(
            r#"
- pipe:
    - check: {answer: false}
- pipe:
    - count: {}
"#,
        );
        assert!(outcome);
        assert_eq!(ctx.var("count"), Some(&json!(1)));
    }

    #[test]
    fn test_variables_in_order() {
        let (_, ctx) = run(
            r#"
- pipe:
    - variable:
        variable1: value1
        variable2: [value21, value22]
        picked: "=V.variable2[1]"
        upper: "=upper(V.variable1)"
"#,
        );
        assert_eq!(ctx.var("picked"), Some(&json!("value22")));
        assert_eq!(ctx.var("upper"), Some(&json!("VALUE1")));
    }

    #[test]
    fn test_variable_list_runs_in_order() {
        let (outcome, ctx) = run(
            r#"
- pipe:
    - variable:
        - v1: val1
        - v2: "=V.v1 + \"-2\""
        - v1: again
    - check: {answer: "=V.v2 == \"val1-2\""}
"#,
        );
        assert!(outcome);
        assert_eq!(ctx.var("v1"), Some(&json!("again")));
        assert_eq!(ctx.var("v2"), Some(&json!("val1-2")));
    }

    #[test]
    fn test_variable_binding_error_is_false() {
        let (outcome, ctx) = run(
            r#"
- pipe:
    - variable: {a: "=V.missing"}
    - count: {}
"#,
        );
        assert!(!outcome);
        assert_eq!(ctx.var("count"), None);
    }

    #[test]
    fn test_defaults_are_scoped_to_sub_pipe() {
        let (outcome, ctx) = run(
            r#"
- pipe:
    - default: {check: {answer: true}}
    - pipe:
        - default: {check: {answer: false}}
        - variable: {inside: yes}
        - check: null
          register: inner
    - check: null
      register: outer
"#,
        );
        assert!(outcome);
        assert_eq!(ctx.registered_value()["inner"]["result"], json!(false));
        assert_eq!(ctx.registered_value()["outer"]["result"], json!(true));
        assert_eq!(ctx.var("inside"), Some(&json!("yes")));
        assert!(ctx.defaults().is_empty());
    }

    #[test]
    fn test_sibling_pipes_do_not_share_defaults() {
        let (outcome, _) = run(
            r#"
- pipe:
    - default: {check: {answer: true}}
- pipe:
    - check: null
"#,
        );
        assert!(!outcome);
    }

    #[test]
    fn test_pipe_level_default() {
        let (outcome, ctx) = run(
            r#"
- default: {check: {answer: true}}
  pipe:
    - check: {}
"#,
        );
        assert!(outcome);
        assert!(ctx.defaults().is_empty());
    }

    #[test]
    fn test_init_defaults_persist() {
        let (outcome, ctx) = run(
            r#"
- init:
    - default: {check: {answer: true}}
- pipe:
    - check: {}
"#,
        );
        assert!(outcome);
        assert!(ctx.defaults_for("check").is_some());
    }

    #[test]
    fn test_sub_pipe_result_does_not_propagate() {
        let (outcome, ctx) = run(
            r#"
- pipe:
    - pipe:
        - check: {answer: false}
        - count: {}
    - count: {}
"#,
        );
        assert!(outcome);
        assert_eq!(ctx.var("count"), Some(&json!(1)));
    }

    #[test]
    fn test_sub_pipe_result_override_sees_registrations() {
        let (outcome, _) = run(
            r#"
- pipe:
    - pipe:
        - check: {answer: false}
          register: inner
      result: "=R.inner.result"
    - count: {}
"#,
        );
        assert!(!outcome);
    }

    #[test]
    fn test_register_overwrites_result_field() {
        let (outcome, ctx) = run(
            r#"
- pipe:
    - check: {answer: true, data: {result: discarded, k: 1}}
      register: r
"#,
        );
        assert!(outcome);
        assert_eq!(ctx.registered_value()["r"], json!({"result": true, "k": 1}));
    }

    #[test]
    fn test_register_without_plugin_result() {
        let (_, ctx) = run("- pipe:\n    - count: {}\n      register: c\n");
        assert_eq!(ctx.registered_value()["c"], json!({"result": true}));
    }

    #[test]
    fn test_result_override() {
        let (outcome, ctx) = run(
            r#"
- pipe:
    - check: {answer: false}
      register: r
      result: "=!R.r.result"
"#,
        );
        assert!(outcome);
        assert_eq!(ctx.registered_value()["r"]["result"], json!(false));
    }

    #[test]
    fn test_result_not_boolean_is_false() {
        let (outcome, _) = run("- pipe:\n    - check: {answer: true}\n      result: \"=1\"\n");
        assert!(!outcome);
    }

    #[test]
    fn test_when_false_skips_step() {
        let (outcome, ctx) = run(
            r#"
- pipe:
    - check: {answer: false}
      when: false
    - count: {}
      when: "=1 > 2"
    - variable: {reached: true}
"#,
        );
        assert!(outcome);
        assert_eq!(ctx.var("count"), None);
        assert_eq!(ctx.var("reached"), Some(&json!(true)));
    }

    #[test]
    fn test_skipped_step_leaves_result_alone() {
        let registry = create_test_registry();
        let config = load_str(
            "test.yml",
            "- pipe:\n    - check: {answer: true}\n      when: false\n    - count: {}\n      when: \"=V.missing\"\n",
            Path::new("."),
            &registry,
        )
        .unwrap();
        let executor = Executor::new(&registry);
        let mut ctx = Context::new();
        ctx.result = false;

        for step in &config.pipes[0].steps {
            assert!(executor.process(step, &mut ctx));
            assert!(!ctx.result);
        }
        assert_eq!(ctx.var("count"), None);
    }

    #[test]
    fn test_when_error_skips_step_but_continues() {
        let (outcome, ctx) = run(
            r#"
- pipe:
    - count: {}
      when: "=V.missing.field"
    - count: {}
      when: "=\"not a boolean\""
    - variable: {reached: true}
"#,
        );
        assert!(outcome);
        assert_eq!(ctx.var("count"), None);
        assert_eq!(ctx.var("reached"), Some(&json!(true)));
    }

    #[test]
    fn test_when_true_runs_step() {
        let (_, ctx) = run("- pipe:\n    - count: {}\n      when: \"=true\"\n");
        assert_eq!(ctx.var("count"), Some(&json!(1)));
    }

    #[test]
    fn test_invalid_steps_are_false() {
        for yaml in [
            "- pipe:\n    - check: {answer: true}\n      count: {}\n",
            "- pipe:\n    - unknown: {}\n",
            "- pipe:\n    - name: only\n",
            "- pipe:\n    - register: r\n      pipe: [{count: {}}]\n",
            "- pipe:\n    - check: {answer: yes-ish}\n",
            "- pipe:\n    - check: [1]\n",
        ] {
            let (outcome, ctx) = run(yaml);
            assert!(!outcome, "{}", yaml);
            assert_eq!(ctx.var("count"), None, "{}", yaml);
        }
    }

    #[test]
    fn test_plugin_error_is_false() {
        let (outcome, ctx) = run("- pipe:\n    - fail: {}\n      register: f\n");
        assert!(!outcome);
        assert_eq!(ctx.registered_value()["f"], json!({"result": false}));
    }

    #[test]
    fn test_request_facts_visible() {
        let ctx = Context::with_incoming(crate::pipeline::Incoming::new("POST", "/hook"));
        let (outcome, _) = run_with(
            "- pipe:\n    - check: {answer: \"=In.Method == \\\"POST\\\"\"}\n",
            ctx,
        );
        assert!(outcome);
    }
}
