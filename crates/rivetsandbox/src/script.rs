//! Shared interpreter setup for the script-based backends.

use crate::config::SandboxConfig;
use crate::helpers;
use rhai::module_resolvers::{DummyModuleResolver, FileModuleResolver};
use rhai::packages::{Package, StandardPackage};
use rhai::{Dynamic, Engine, EvalAltResult, Map, Scope};
use rivetcore::{SandboxError, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

/// Capabilities bound into one engine instance
#[derive(Debug, Clone, Default)]
pub(crate) struct Grants {
    pub fetch: bool,
    pub rivet: bool,
    pub process: bool,
    /// Set when `import` may load modules from disk
    pub modules: Option<PathBuf>,
}

/// Evaluate `code` on a blocking thread with a fresh engine
pub(crate) async fn run_blocking(
    config: SandboxConfig,
    code: String,
    inputs: HashMap<String, Value>,
    grants: Grants,
) -> Result<HashMap<String, Value>, SandboxError> {
    let handle = Handle::current();
    tokio::task::spawn_blocking(move || evaluate(&config, &code, inputs, &grants, handle))
        .await
        .map_err(|e| SandboxError::Internal(format!("Script task failed: {}", e)))?
}

fn build_engine(config: &SandboxConfig, grants: &Grants, handle: Handle) -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(StandardPackage::new().as_shared_module());

    engine.on_print(|text| tracing::debug!(target: "rivet::script", "{}", text));
    engine.on_debug(|text, source, pos| {
        tracing::debug!(target: "rivet::script", "{} @ {:?} {}", text, source, pos)
    });

    engine.set_max_operations(config.max_operations);
    engine.set_max_call_levels(config.max_call_levels);
    engine.set_max_string_size(config.max_string_size);
    engine.set_max_array_size(config.max_array_size);
    engine.set_max_map_size(config.max_map_size);

    let deadline = Instant::now() + Duration::from_millis(config.timeout_ms);
    engine.on_progress(move |_| {
        if Instant::now() >= deadline {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });

    match &grants.modules {
        Some(dir) => engine.set_module_resolver(FileModuleResolver::new_with_path(dir)),
        None => engine.set_module_resolver(DummyModuleResolver::new()),
    };

    if grants.fetch {
        register_fetch(&mut engine, handle, deadline);
    }
    if grants.rivet {
        engine.register_static_module("rivet", helpers::module().into());
    }
    if grants.process {
        register_process(&mut engine);
    }
    engine
}

pub(crate) fn evaluate(
    config: &SandboxConfig,
    code: &str,
    inputs: HashMap<String, Value>,
    grants: &Grants,
    handle: Handle,
) -> Result<HashMap<String, Value>, SandboxError> {
    let engine = build_engine(config, grants, handle);

    let mut scope = Scope::new();
    let bound: Map = inputs
        .into_iter()
        .map(|(name, value)| (name.into(), to_dynamic(&value)))
        .collect();
    scope.push("inputs", bound);

    let result = engine
        .eval_with_scope::<Dynamic>(&mut scope, code)
        .map_err(|e| classify(*e, config))?;

    if !result.is_map() {
        return Err(SandboxError::InvalidOutput(format!(
            "Code must return an object map of outputs, got {}",
            result.type_name()
        )));
    }
    match from_dynamic(result)? {
        Value::Object(outputs) => Ok(outputs),
        _ => Err(SandboxError::InvalidOutput(
            "Code must return an object map of outputs".to_string(),
        )),
    }
}

fn classify(error: EvalAltResult, config: &SandboxConfig) -> SandboxError {
    match error {
        EvalAltResult::ErrorTerminated(..) => SandboxError::Timeout {
            ms: config.timeout_ms,
        },
        other => SandboxError::Script(other.to_string()),
    }
}

/// `fetch(url)` performs a GET and returns `#{ status, body }`. The request
/// gets whatever is left of the snippet's wall-clock budget.
fn register_fetch(engine: &mut Engine, handle: Handle, deadline: Instant) {
    let client = reqwest::Client::new();
    engine.register_fn(
        "fetch",
        move |url: &str| -> Result<Map, Box<EvalAltResult>> {
            let client = client.clone();
            let url = url.to_string();
            let remaining = deadline.saturating_duration_since(Instant::now());
            tracing::debug!("Script fetch: GET {} ({}ms left)", url, remaining.as_millis());
            handle.block_on(async move {
                let request = async {
                    let response = client
                        .get(&url)
                        .send()
                        .await
                        .map_err(|e| format!("fetch {} failed: {}", url, e))?;
                    let status = response.status().as_u16();
                    let body = response
                        .text()
                        .await
                        .map_err(|e| format!("fetch {} failed reading body: {}", url, e))?;

                    let mut result = Map::new();
                    result.insert("status".into(), Dynamic::from(status as rhai::INT));
                    result.insert("body".into(), Dynamic::from(body));
                    Ok::<_, Box<EvalAltResult>>(result)
                };
                tokio::time::timeout(remaining, request)
                    .await
                    .map_err(|_| -> Box<EvalAltResult> {
                        format!("fetch {} timed out after {}ms", url, remaining.as_millis()).into()
                    })?
            })
        },
    );
}

fn register_process(engine: &mut Engine) {
    engine.register_fn("env", |name: &str| -> Dynamic {
        std::env::var(name)
            .map(Dynamic::from)
            .unwrap_or(Dynamic::UNIT)
    });
    engine.register_fn("cwd", || -> Result<String, Box<EvalAltResult>> {
        std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .map_err(|e| e.to_string().into())
    });
}

pub(crate) fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
            Dynamic::from(*n as rhai::INT)
        }
        Value::Number(n) => Dynamic::from(*n),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Bytes(bytes) => Dynamic::from_blob(bytes.clone()),
        Value::Json(json) => to_dynamic(&Value::from_plain_json(json.clone())),
        Value::Array(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
        Value::Object(fields) => Dynamic::from_map(
            fields
                .iter()
                .map(|(k, v)| (k.as_str().into(), to_dynamic(v)))
                .collect(),
        ),
    }
}

fn unexpected(type_name: &str) -> SandboxError {
    SandboxError::InvalidOutput(format!("Unexpected script value of type {}", type_name))
}

pub(crate) fn from_dynamic(value: Dynamic) -> Result<Value, SandboxError> {
    if value.is_unit() {
        return Ok(Value::Null);
    }
    if value.is::<bool>() {
        return value.as_bool().map(Value::Bool).map_err(unexpected);
    }
    if value.is_int() {
        return value
            .as_int()
            .map(|n| Value::Number(n as f64))
            .map_err(unexpected);
    }
    if value.is_float() {
        return value.as_float().map(Value::Number).map_err(unexpected);
    }
    if value.is::<char>() {
        return value
            .as_char()
            .map(|c| Value::String(c.to_string()))
            .map_err(unexpected);
    }
    if value.is_string() {
        return value.into_string().map(Value::String).map_err(unexpected);
    }
    if value.is_blob() {
        return value.into_blob().map(Value::Bytes).map_err(unexpected);
    }
    if value.is_array() {
        return value
            .into_array()
            .map_err(unexpected)?
            .into_iter()
            .map(from_dynamic)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    if value.is_map() {
        let map = value.try_cast::<Map>().ok_or_else(|| unexpected("map"))?;
        return map
            .into_iter()
            .map(|(k, v)| Ok((k.to_string(), from_dynamic(v)?)))
            .collect::<Result<HashMap<_, _>, SandboxError>>()
            .map(Value::Object);
    }
    Err(unexpected(value.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::{Context, SubscriberExt};

    /// Records the level of every event logged under the script target
    struct ScriptLevels(Arc<Mutex<Vec<tracing::Level>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ScriptLevels {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let meta = event.metadata();
            if meta.target() == "rivet::script" {
                self.0.lock().unwrap().push(*meta.level());
            }
        }
    }

    #[tokio::test]
    async fn print_and_debug_log_at_debug_level() {
        let levels = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(ScriptLevels(levels.clone()));
        let handle = Handle::current();

        let outputs = tracing::subscriber::with_default(subscriber, || {
            evaluate(
                &SandboxConfig::default(),
                "print(\"hello\"); debug(\"there\"); #{}",
                HashMap::new(),
                &Grants::default(),
                handle,
            )
        })
        .unwrap();

        assert!(outputs.is_empty());
        assert_eq!(
            *levels.lock().unwrap(),
            vec![tracing::Level::DEBUG, tracing::Level::DEBUG]
        );
    }

    #[test]
    fn integral_numbers_become_integers() {
        assert!(to_dynamic(&Value::Number(3.0)).is_int());
        assert!(to_dynamic(&Value::Number(3.5)).is_float());
    }

    #[test]
    fn nested_values_convert_back() {
        let value = Value::Object(HashMap::from([(
            "items".to_string(),
            Value::Array(vec![Value::Number(1.0), Value::String("x".into()), Value::Null]),
        )]));
        assert_eq!(from_dynamic(to_dynamic(&value)).unwrap(), value);
    }

    #[test]
    fn json_values_are_unwrapped() {
        let value = Value::Json(serde_json::json!({"a": [1, true]}));
        let back = from_dynamic(to_dynamic(&value)).unwrap();
        assert_eq!(back, Value::from_plain_json(serde_json::json!({"a": [1, true]})));
    }
}
