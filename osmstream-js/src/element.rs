use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use napi::bindgen_prelude::*;
use napi::{ValueType, check_status, sys};
use napi_derive::napi;
use osmstream::{
    access::{call_nodes, call_tags, count, positional, Arg, NodesReply, TagsReply},
    AccessError, AccessErrorKind, Entity, OsmObject, Tags,
};

/// An argument of `tags()` / `nodes()`, typed only as far as dispatch needs.
/// Missing arguments arrive as `Other(ValueType::Undefined)`.
pub enum JsArg {
    Str(String),
    Number(f64),
    Other(ValueType),
}

impl JsArg {
    fn as_arg(&self) -> Arg<'_> {
        match self {
            JsArg::Str(s) => Arg::Str(s),
            JsArg::Number(n) => Arg::Number(*n),
            JsArg::Other(value_type) => Arg::Other(js_type_name(*value_type)),
        }
    }
}

fn js_type_name(value_type: ValueType) -> &'static str {
    match value_type {
        ValueType::Undefined => "undefined",
        ValueType::Null => "null",
        ValueType::Boolean => "boolean",
        ValueType::Number => "number",
        ValueType::String => "string",
        ValueType::Symbol => "symbol",
        ValueType::Object => "object",
        ValueType::Function => "function",
        ValueType::External => "external",
        ValueType::BigInt => "bigint",
        _ => "unknown",
    }
}

impl TypeName for JsArg {
    fn type_name() -> &'static str {
        "unknown"
    }

    fn value_type() -> ValueType {
        ValueType::Unknown
    }
}

impl FromNapiValue for JsArg {
    unsafe fn from_napi_value(env: sys::napi_env, value: sys::napi_value) -> Result<Self> {
        let mut raw_type = 0;
        check_status!(unsafe { sys::napi_typeof(env, value, &mut raw_type) })?;
        match ValueType::from(raw_type) {
            ValueType::String => Ok(JsArg::Str(unsafe { String::from_napi_value(env, value)? })),
            ValueType::Number => Ok(JsArg::Number(unsafe { f64::from_napi_value(env, value)? })),
            other => Ok(JsArg::Other(other)),
        }
    }
}

fn call_args<'a>(first: &'a JsArg, second: &'a JsArg) -> Vec<Arg<'a>> {
    positional([first.as_arg(), second.as_arg()])
}

/// Raises `err` as a `TypeError`, `RangeError` or plain `Error`.
fn throw(env: &Env, err: AccessError) -> Error {
    let message = err.to_string();
    let thrown = match err.kind() {
        AccessErrorKind::Type => env.throw_type_error(&message, None),
        AccessErrorKind::Range => env.throw_range_error(&message, None),
        AccessErrorKind::Deleted => return Error::from_reason(message),
    };
    match thrown {
        Ok(()) => Error::new(Status::PendingException, message),
        Err(err) => err,
    }
}

fn tags_reply(
    env: &Env,
    tags: &Tags,
    key: JsArg,
    extra: JsArg,
) -> Result<Either3<IndexMap<String, String>, String, ()>> {
    let args = call_args(&key, &extra);
    match call_tags(tags, &args).map_err(|err| throw(env, err))? {
        TagsReply::Map(tags) => Ok(Either3::A(
            tags.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )),
        TagsReply::Value(Some(value)) => Ok(Either3::B(value.to_string())),
        TagsReply::Value(None) => Ok(Either3::C(())),
    }
}

fn date(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
        Error::from_reason(format!("timestamp {} is outside the Date range", seconds))
    })
}

// Accessors shared by all three entity classes.
macro_rules! common_accessors {
    ($class:ident) => {
        #[napi]
        impl $class {
            #[napi(getter)]
            pub fn id(&self) -> i64 {
                self.inner.id()
            }
            #[napi(getter)]
            pub fn visible(&self) -> bool {
                self.inner.visible()
            }
            #[napi(getter)]
            pub fn version(&self) -> u32 {
                self.inner.version()
            }
            #[napi(getter)]
            pub fn changeset(&self) -> i64 {
                self.inner.changeset()
            }
            #[napi(getter)]
            pub fn user(&self) -> String {
                self.inner.user().to_string()
            }
            #[napi(getter)]
            pub fn uid(&self) -> i64 {
                self.inner.uid()
            }
            #[napi(getter, js_name = "timestamp_seconds_since_epoch")]
            pub fn timestamp_seconds_since_epoch(&self) -> i64 {
                self.inner.timestamp_seconds_since_epoch()
            }
            /// Converted on every call.
            #[napi]
            pub fn timestamp(&self) -> Result<DateTime<Utc>> {
                date(self.inner.timestamp_seconds_since_epoch())
            }
            /// `tags()` returns every tag, `tags(key)` one value or undefined.
            #[napi(ts_return_type = "Record<string, string> | string | undefined")]
            pub fn tags(
                &self,
                env: &Env,
                key: JsArg,
                extra: JsArg,
            ) -> Result<Either3<IndexMap<String, String>, String, ()>> {
                tags_reply(env, self.inner.tags(), key, extra)
            }
        }
    };
}

#[napi(js_name = "Node")]
pub struct JsNode {
    inner: osmstream::Node,
}

#[napi]
impl JsNode {
    #[napi(getter)]
    pub fn lon(&self) -> Result<f64> {
        self.inner
            .lon()
            .map_err(|err| Error::from_reason(err.to_string()))
    }
    #[napi(getter)]
    pub fn lat(&self) -> Result<f64> {
        self.inner
            .lat()
            .map_err(|err| Error::from_reason(err.to_string()))
    }
}

#[napi(js_name = "Way")]
pub struct JsWay {
    inner: osmstream::Way,
}

#[napi]
impl JsWay {
    #[napi(getter, js_name = "nodes_count")]
    pub fn nodes_count(&self, env: &Env) -> Result<u32> {
        count("nodes_count", self.inner.nodes_count()).map_err(|err| throw(env, err))
    }
    /// `nodes()` returns every node id, `nodes(i)` the one at index `i`.
    #[napi(ts_return_type = "number[] | number")]
    pub fn nodes(
        &self,
        env: &Env,
        index: JsArg,
        extra: JsArg,
    ) -> Result<Either<Vec<i64>, i64>> {
        let args = call_args(&index, &extra);
        match call_nodes(&self.inner, &args).map_err(|err| throw(env, err))? {
            NodesReply::List(refs) => Ok(Either::A(refs.to_vec())),
            NodesReply::Ref(id) => Ok(Either::B(id)),
        }
    }
}

#[napi(object)]
pub struct JsMember {
    #[napi(js_name = "type")]
    pub kind: String,
    #[napi(js_name = "ref")]
    pub id: i64,
    pub role: String,
}

#[napi(js_name = "Relation")]
pub struct JsRelation {
    inner: osmstream::Relation,
}

#[napi]
impl JsRelation {
    #[napi]
    pub fn members(&self) -> Result<Vec<JsMember>> {
        let members = self
            .inner
            .members()
            .map_err(|err| Error::from_reason(err.to_string()))?;
        Ok(members
            .iter()
            .map(|member| JsMember {
                kind: member.kind().as_str().to_string(),
                id: member.id(),
                role: member.role().to_string(),
            })
            .collect())
    }

    #[napi(getter, js_name = "members_count")]
    pub fn members_count(&self, env: &Env) -> Result<u32> {
        let len = self.inner.members().map_or(0, |members| members.len());
        count("members_count", len).map_err(|err| throw(env, err))
    }
}

common_accessors!(JsNode);
common_accessors!(JsWay);
common_accessors!(JsRelation);

pub type JsEntity = Either3<JsNode, JsWay, JsRelation>;

pub fn construct_js_entity(entity: Entity) -> JsEntity {
    match entity {
        Entity::Node(inner) => Either3::A(JsNode { inner }),
        Entity::Way(inner) => Either3::B(JsWay { inner }),
        Entity::Relation(inner) => Either3::C(JsRelation { inner }),
    }
}
