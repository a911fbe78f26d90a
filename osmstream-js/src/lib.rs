use crate::element::{JsEntity, construct_js_entity};
use napi::bindgen_prelude::*;
use napi_derive::napi;
use osmstream::{ElementFilter, EntityStream, prelude::*};
use std::sync::Arc;
use tokio::sync::Mutex;
pub mod element;

#[napi(object)]
pub struct JsElementFilter {
    pub node: Option<bool>,
    pub way: Option<bool>,
    pub relation: Option<bool>,
}

#[napi(object)]
#[derive(Clone)]
pub struct JsBounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

#[napi(object)]
#[derive(Clone)]
pub struct JsHeader {
    pub generator: Option<String>,
    pub bounds: Vec<JsBounds>,
}

#[napi(js_name = "Reader")]
pub struct JsReader {
    stream: Arc<Mutex<EntityStream>>,
    header: JsHeader,
}

#[napi]
impl JsReader {
    /// Opens `path` and reads its header. Kinds missing from `options` are
    /// enabled.
    #[napi(constructor)]
    pub fn new(path: String, options: Option<JsElementFilter>) -> Result<Self> {
        let filter = options.map_or_else(ElementFilter::all, |options| {
            ElementFilter::from_options(options.node, options.way, options.relation)
        });
        let stream = OsmReader::from_path(&path)
            .and_then(|reader| reader.with_filter(filter).entities())
            .map_err(|err| Error::from_reason(err.to_string()))?;

        let header = stream.header();
        let header = JsHeader {
            generator: header.generator.clone(),
            bounds: header
                .bounds
                .iter()
                .map(|b| JsBounds {
                    min_lon: b.min_lon,
                    min_lat: b.min_lat,
                    max_lon: b.max_lon,
                    max_lat: b.max_lat,
                })
                .collect(),
        };

        Ok(Self {
            stream: Arc::new(Mutex::new(stream)),
            header,
        })
    }

    #[napi]
    pub fn header(&self) -> JsHeader {
        self.header.clone()
    }

    /// Resolves to the next entity, or `undefined` once the input is
    /// exhausted or the reader is closed. A decode error rejects this and
    /// every later call.
    #[napi(ts_return_type = "Promise<Node | Way | Relation | undefined>")]
    pub async fn next(&self) -> Result<Option<JsEntity>> {
        let stream = self.stream.clone();
        let entity = tokio::task::spawn_blocking(move || stream.blocking_lock().next_entity())
            .await
            .map_err(|err| Error::from_reason(err.to_string()))?
            .map_err(|err| Error::from_reason(err.to_string()))?;
        Ok(entity.map(construct_js_entity))
    }

    /// Stops decoding and releases the file. Later `next()` calls resolve
    /// to `undefined`.
    #[napi]
    pub fn close(&self) -> Result<()> {
        let mut stream = self.stream.try_lock().map_err(|_| {
            Error::from_reason("close() called while next() is pending".to_string())
        })?;
        stream.close();
        Ok(())
    }
}
