//! Handler parameter binding.
//!
//! Every handler parameter is described once, when its route is declared, by a
//! [`ParameterBindingSpec`]. At request time [`bind`] walks the specs in
//! declared order and produces [`Arguments`], from which the handler takes its
//! typed values by name.
//!
//! Path and query values are coerced to `i32`, `i64`, `f32`, `f64`, `bool`,
//! [`rust_decimal::Decimal`] or `String`. Any other declared type is rejected
//! with [`Error::UnsupportedParameterType`] when the route is hit.

use crate::{Error, RequestContext};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

type JsonDecodeFn = fn(&[u8]) -> Result<Box<dyn Any + Send>, serde_json::Error>;

/// Where a parameter's value comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingSource {
    /// A `{name}` placeholder in the route pattern
    Path,
    /// The query string (the default source)
    Query,
    /// The whole body as UTF-8 text
    RawBody,
    /// The body deserialized from JSON
    JsonBody,
    /// The request context itself
    Context,
}

/// Semantic type a parameter is bound to
#[derive(Clone)]
pub enum ParamType {
    I32,
    I64,
    F32,
    F64,
    Bool,
    Decimal,
    String,
    Json {
        type_name: &'static str,
        decode: JsonDecodeFn,
    },
    Context,
    Unsupported(&'static str),
}

impl ParamType {
    /// Classify a scalar parameter type
    pub fn of<T: Any>() -> Self {
        let id = TypeId::of::<T>();
        if id == TypeId::of::<i32>() {
            ParamType::I32
        } else if id == TypeId::of::<i64>() {
            ParamType::I64
        } else if id == TypeId::of::<f32>() {
            ParamType::F32
        } else if id == TypeId::of::<f64>() {
            ParamType::F64
        } else if id == TypeId::of::<bool>() {
            ParamType::Bool
        } else if id == TypeId::of::<Decimal>() {
            ParamType::Decimal
        } else if id == TypeId::of::<String>() {
            ParamType::String
        } else {
            ParamType::Unsupported(std::any::type_name::<T>())
        }
    }

    /// JSON-deserialized parameter of type `T`
    pub fn json<T: DeserializeOwned + Send + 'static>() -> Self {
        ParamType::Json {
            type_name: std::any::type_name::<T>(),
            decode: decode_json::<T>,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ParamType::I32 => "i32",
            ParamType::I64 => "i64",
            ParamType::F32 => "f32",
            ParamType::F64 => "f64",
            ParamType::Bool => "bool",
            ParamType::Decimal => "Decimal",
            ParamType::String => "String",
            ParamType::Json { type_name, .. } => type_name,
            ParamType::Context => "RequestContext",
            ParamType::Unsupported(type_name) => type_name,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, ParamType::Unsupported(_))
    }
}

impl fmt::Debug for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

fn decode_json<T: DeserializeOwned + Send + 'static>(bytes: &[u8]) -> Result<Box<dyn Any + Send>, serde_json::Error> {
    Ok(Box::new(serde_json::from_slice::<T>(bytes)?))
}

/// How one handler parameter is bound
#[derive(Clone, Debug)]
pub struct ParameterBindingSpec {
    pub name: String,
    pub source: BindingSource,
    pub target: ParamType,
}

impl ParameterBindingSpec {
    pub fn new(name: impl Into<String>, source: BindingSource, target: ParamType) -> Self {
        Self {
            name: name.into(),
            source,
            target,
        }
    }
}

enum Argument {
    Value(Box<dyn Any + Send>),
    Context,
}

/// Values bound for one handler invocation, in declared parameter order
pub struct Arguments {
    handler: String,
    values: Vec<(String, Option<Argument>)>,
}

impl Arguments {
    fn new(handler: &str, capacity: usize) -> Self {
        Self {
            handler: handler.to_string(),
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parameter names in declared order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    /// Take ownership of the bound value named `name`
    pub fn take<T: 'static>(&mut self, name: &str) -> Result<T, Error> {
        let handler = self.handler.clone();
        let slot = self
            .values
            .iter_mut()
            .find(|(param, _)| param == name)
            .map(|(_, value)| value)
            .ok_or_else(|| binding_error(name, format!("{} declares no such parameter", handler)))?;

        match slot.take() {
            Some(Argument::Value(value)) => match value.downcast::<T>() {
                Ok(value) => Ok(*value),
                Err(value) => {
                    *slot = Some(Argument::Value(value));
                    Err(binding_error(
                        name,
                        format!("not bound as {}", std::any::type_name::<T>()),
                    ))
                }
            },
            Some(Argument::Context) => {
                *slot = Some(Argument::Context);
                Err(binding_error(
                    name,
                    "context parameters are passed as the request context".to_string(),
                ))
            }
            None => Err(binding_error(name, "already taken".to_string())),
        }
    }

    /// Borrow the bound value named `name`
    pub fn get<T: 'static>(&self, name: &str) -> Result<&T, Error> {
        match self.values.iter().find(|(param, _)| param == name) {
            Some((_, Some(Argument::Value(value)))) => value.downcast_ref::<T>().ok_or_else(|| {
                binding_error(name, format!("not bound as {}", std::any::type_name::<T>()))
            }),
            Some(_) => Err(binding_error(name, "not a bound value".to_string())),
            None => Err(binding_error(
                name,
                format!("{} declares no such parameter", self.handler),
            )),
        }
    }

    /// Whether the parameter named `name` is the request context
    pub fn is_context(&self, name: &str) -> bool {
        self.values
            .iter()
            .any(|(param, value)| param == name && matches!(value, Some(Argument::Context)))
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arguments")
            .field("handler", &self.handler)
            .field("names", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

fn binding_error(parameter: &str, message: String) -> Error {
    Error::Binding {
        parameter: parameter.to_string(),
        message,
    }
}

/// Bind every parameter of `handler` from the request
pub fn bind(
    handler: &str,
    specs: &[ParameterBindingSpec],
    path_params: &HashMap<String, String>,
    ctx: &RequestContext,
) -> Result<Arguments, Error> {
    let mut args = Arguments::new(handler, specs.len());

    for spec in specs {
        let argument = match spec.source {
            BindingSource::RawBody => {
                let text = std::str::from_utf8(ctx.body())
                    .map_err(|e| binding_error(&spec.name, format!("body is not UTF-8: {}", e)))?;
                Argument::Value(Box::new(text.to_string()))
            }
            BindingSource::JsonBody => match &spec.target {
                ParamType::Json { decode, .. } => {
                    let value = decode(ctx.body())
                        .map_err(|e| Error::Deserialization(format!("{}: {}", spec.name, e)))?;
                    Argument::Value(value)
                }
                other => return Err(unsupported(handler, spec, other)),
            },
            BindingSource::Context => Argument::Context,
            BindingSource::Path => {
                let raw = path_params.get(&spec.name).map(|raw| {
                    urlencoding::decode(raw)
                        .map(|decoded| decoded.into_owned())
                        .unwrap_or_else(|_| raw.clone())
                });
                Argument::Value(coerce(handler, spec, raw.as_deref())?)
            }
            BindingSource::Query => {
                let raw = ctx.query(&spec.name).map(String::as_str);
                Argument::Value(coerce(handler, spec, raw)?)
            }
        };
        args.values.push((spec.name.clone(), Some(argument)));
    }

    Ok(args)
}

fn unsupported(handler: &str, spec: &ParameterBindingSpec, target: &ParamType) -> Error {
    Error::UnsupportedParameterType {
        handler: handler.to_string(),
        parameter: spec.name.clone(),
        type_name: target.type_name().to_string(),
    }
}

/// Coerce a raw path or query value to the declared type
fn coerce(handler: &str, spec: &ParameterBindingSpec, raw: Option<&str>) -> Result<Box<dyn Any + Send>, Error> {
    if matches!(
        spec.target,
        ParamType::Unsupported(_) | ParamType::Json { .. } | ParamType::Context
    ) {
        return Err(unsupported(handler, spec, &spec.target));
    }

    let raw = raw.ok_or_else(|| binding_error(&spec.name, "value is missing".to_string()))?;
    let value = raw.trim();

    let bound: Box<dyn Any + Send> = match spec.target {
        ParamType::I32 => Box::new(parse::<i32>(spec, value)?),
        ParamType::I64 => Box::new(parse::<i64>(spec, value)?),
        ParamType::F32 => Box::new(parse::<f32>(spec, value)?),
        ParamType::F64 => Box::new(parse::<f64>(spec, value)?),
        ParamType::Decimal => Box::new(parse::<Decimal>(spec, value)?),
        ParamType::Bool => Box::new(parse_bool(spec, value)?),
        ParamType::String => Box::new(raw.to_string()),
        ParamType::Json { .. } | ParamType::Context | ParamType::Unsupported(_) => {
            return Err(unsupported(handler, spec, &spec.target));
        }
    };
    Ok(bound)
}

fn parse<T>(spec: &ParameterBindingSpec, value: &str) -> Result<T, Error>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse::<T>().map_err(|e| {
        binding_error(
            &spec.name,
            format!("'{}' is not a valid {}: {}", value, spec.target.type_name(), e),
        )
    })
}

fn parse_bool(spec: &ParameterBindingSpec, value: &str) -> Result<bool, Error> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(binding_error(
            &spec.name,
            format!("'{}' is not a valid bool", value),
        ))
    }
}
