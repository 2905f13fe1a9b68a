//! The `rivet` helper module exposed to snippets granted `include_rivet`.

use crate::script::{from_dynamic, to_dynamic};
use rhai::{Dynamic, EvalAltResult, Module};
use rivetcore::Value;

pub(crate) fn module() -> Module {
    let mut module = Module::new();

    module.set_native_fn("version", || -> Result<String, Box<EvalAltResult>> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    });

    module.set_native_fn(
        "to_json",
        |value: Dynamic| -> Result<String, Box<EvalAltResult>> {
            let value = from_dynamic(value).map_err(|e| e.to_string())?;
            Ok(value.to_plain_json().to_string())
        },
    );

    module.set_native_fn(
        "parse_json",
        |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let json: serde_json::Value =
                serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))?;
            Ok(to_dynamic(&Value::from_plain_json(json)))
        },
    );

    module
}
