//! User supplied `Decode` / `Encode` functions run in a QuickJS sandbox.
//!
//! Every call gets a fresh runtime bounded by a wall-clock deadline, a stack
//! limit and a heap limit. Scripts see `fPort`, the payload (or object) and
//! the device variables as plain JSON values.
use lora_as_error::{ASError, ASResult};
use lora_as_models::settings::Codec;
use rquickjs::{CatchResultExt, Context, Function, Runtime};
use serde_json::Value;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy)]
pub struct JsLimits {
    pub max_execution_time: Duration,
    pub max_stack_size: usize,
    pub memory_limit: usize,
}

impl From<&Codec> for JsLimits {
    fn from(c: &Codec) -> Self {
        Self {
            max_execution_time: Duration::from_millis(c.js_max_execution_time),
            max_stack_size: c.js_max_stack_size,
            memory_limit: c.js_memory_limit,
        }
    }
}

pub async fn decode(
    limits: JsLimits,
    script: String,
    f_port: u8,
    variables: HashMap<String, String>,
    data: Vec<u8>,
) -> ASResult<Value> {
    let args = vec![
        Value::from(f_port),
        serde_json::to_value(data)?,
        serde_json::to_value(variables)?,
    ];
    run(limits, script, "Decode", args).await
}

/// The `Encode` result must be an array of byte values.
pub async fn encode(
    limits: JsLimits,
    script: String,
    f_port: u8,
    variables: HashMap<String, String>,
    object: Value,
) -> ASResult<Vec<u8>> {
    let args = vec![Value::from(f_port), object, serde_json::to_value(variables)?];
    let out = run(limits, script, "Encode", args).await?;

    let Value::Array(items) = out else {
        return Err(ASError::Codec(format!(
            "Encode must return an array of bytes, got {out}"
        )));
    };
    items
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| ASError::Codec(format!("Encode returned invalid byte value {v}")))
        })
        .collect()
}

async fn run(
    limits: JsLimits,
    script: String,
    function: &'static str,
    args: Vec<Value>,
) -> ASResult<Value> {
    tokio::task::spawn_blocking(move || execute(limits, &script, function, &args)).await?
}

fn execute(limits: JsLimits, script: &str, function: &str, args: &[Value]) -> ASResult<Value> {
    let rt = Runtime::new().map_err(js_err)?;
    rt.set_memory_limit(limits.memory_limit);
    rt.set_max_stack_size(limits.max_stack_size);

    let deadline = Instant::now() + limits.max_execution_time;
    rt.set_interrupt_handler(Some(Box::new(move || Instant::now() > deadline)));

    let ctx = Context::full(&rt).map_err(js_err)?;
    let res = ctx.with(|ctx| -> Result<Value, String> {
        ctx.eval::<(), _>(script)
            .catch(&ctx)
            .map_err(|e| e.to_string())?;

        let func: Function = ctx
            .globals()
            .get(function)
            .map_err(|_| format!("script does not define function {function}"))?;

        let mut js_args = Vec::with_capacity(args.len());
        for a in args {
            let s = serde_json::to_string(a).map_err(|e| e.to_string())?;
            js_args.push(ctx.json_parse(s).map_err(|e| e.to_string())?);
        }
        let [a, b, c]: [rquickjs::Value; 3] = js_args
            .try_into()
            .map_err(|_| format!("{function} expects three arguments"))?;

        let out: rquickjs::Value = func
            .call((a, b, c))
            .catch(&ctx)
            .map_err(|e| e.to_string())?;

        match ctx.json_stringify(out).map_err(|e| e.to_string())? {
            Some(s) => {
                let s = s.to_string().map_err(|e| e.to_string())?;
                serde_json::from_str(&s).map_err(|e| e.to_string())
            }
            None => Ok(Value::Null),
        }
    });

    res.map_err(|e| {
        if Instant::now() > deadline {
            ASError::Codec(format!(
                "{function} exceeded max execution time of {:?}",
                limits.max_execution_time
            ))
        } else {
            ASError::Codec(format!("{function} failed: {e}"))
        }
    })
}

fn js_err(e: rquickjs::Error) -> ASError {
    ASError::Codec(format!("JavaScript runtime error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> JsLimits {
        JsLimits::from(&Codec::default())
    }

    #[tokio::test]
    async fn decode_exposes_port_bytes_and_variables() {
        let script = r#"
            function Decode(fPort, bytes, variables) {
                return { port: fPort, sum: bytes[0] + bytes[1], unit: variables.unit };
            }
        "#;
        let vars = HashMap::from([("unit".to_string(), "C".to_string())]);
        let v = decode(limits(), script.into(), 10, vars, vec![1, 2])
            .await
            .unwrap();
        assert_eq!(v, json!({"port": 10, "sum": 3, "unit": "C"}));
    }

    #[tokio::test]
    async fn encode_requires_byte_array() {
        let script = r#"
            function Encode(fPort, obj, variables) {
                return obj.ok ? [fPort, obj.value] : [256];
            }
        "#;
        let out = encode(limits(), script.into(), 5, HashMap::new(), json!({"ok": true, "value": 7}))
            .await
            .unwrap();
        assert_eq!(out, vec![5, 7]);

        let err = encode(limits(), script.into(), 5, HashMap::new(), json!({"ok": false}))
            .await
            .unwrap_err();
        assert!(matches!(err, ASError::Codec(_)));
    }

    #[tokio::test]
    async fn runaway_script_is_interrupted() {
        let script = "function Decode(fPort, bytes, variables) { while (true) {} }";
        let err = decode(limits(), script.into(), 1, HashMap::new(), vec![])
            .await
            .unwrap_err();
        match err {
            ASError::Codec(msg) => assert!(msg.contains("max execution time"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_function_is_reported() {
        let err = decode(limits(), "var x = 1;".into(), 1, HashMap::new(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ASError::Codec(_)));
    }
}
