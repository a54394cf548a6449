//! A7 — minimal OpenAPI description builder, trimmed from
//! `original_source/openapi.cpp`/`openapi.h`'s `OpenAPIServer`: a
//! path/operation registry that serializes to an OpenAPI 3 JSON document.
//! The full source's schema-object tree and Swagger-UI file serving are
//! dropped; summary/description/parameter registration per method survives.

use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Default)]
pub struct Info {
    pub title: String,
    pub version: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum ParamLocation {
    Query,
    Path,
    Header,
}

impl ParamLocation {
    fn as_str(self) -> &'static str {
        match self {
            ParamLocation::Query => "query",
            ParamLocation::Path => "path",
            ParamLocation::Header => "header",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Operation {
    summary: String,
    description: String,
    params: Vec<Parameter>,
    deprecated: bool,
}

#[derive(Debug, Clone, Default)]
struct PathEntry {
    get: Option<Operation>,
    put: Option<Operation>,
    post: Option<Operation>,
    delete: Option<Operation>,
}

/// Accumulates path/method registrations and renders an OpenAPI 3 document.
/// The registry is index-addressed (`addPath` returns a handle) the way the
/// source's `PathReg` vector plus `PathInfo` builder works, minus the C++
/// template machinery.
#[derive(Debug, Clone, Default)]
pub struct OpenApiBuilder {
    info: Info,
    paths: Vec<(String, PathEntry)>,
}

pub struct PathHandle(usize);

impl OpenApiBuilder {
    pub fn new(info: Info) -> OpenApiBuilder {
        OpenApiBuilder { info, paths: Vec::new() }
    }

    pub fn add_path(&mut self, path: &str) -> PathHandle {
        self.paths.push((path.to_string(), PathEntry::default()));
        PathHandle(self.paths.len() - 1)
    }

    fn op(&mut self, handle: &PathHandle, summary: &str, description: &str, params: Vec<Parameter>) -> Operation {
        Operation { summary: summary.to_string(), description: description.to_string(), params, deprecated: false }
    }

    pub fn get(&mut self, handle: &PathHandle, summary: &str, description: &str, params: Vec<Parameter>) {
        let operation = self.op(handle, summary, description, params);
        self.paths[handle.0].1.get = Some(operation);
    }

    pub fn put(&mut self, handle: &PathHandle, summary: &str, description: &str, params: Vec<Parameter>) {
        let operation = self.op(handle, summary, description, params);
        self.paths[handle.0].1.put = Some(operation);
    }

    pub fn post(&mut self, handle: &PathHandle, summary: &str, description: &str, params: Vec<Parameter>) {
        let operation = self.op(handle, summary, description, params);
        self.paths[handle.0].1.post = Some(operation);
    }

    pub fn delete(&mut self, handle: &PathHandle, summary: &str, description: &str, params: Vec<Parameter>) {
        let operation = self.op(handle, summary, description, params);
        self.paths[handle.0].1.delete = Some(operation);
    }

    /// Renders the accumulated registry to an OpenAPI 3 document.
    pub fn generate(&self) -> Value {
        let mut paths = Map::new();
        for (path, entry) in &self.paths {
            let mut methods = Map::new();
            for (name, operation) in [("get", &entry.get), ("put", &entry.put), ("post", &entry.post), ("delete", &entry.delete)] {
                if let Some(op) = operation {
                    methods.insert(name.to_string(), operation_to_json(op));
                }
            }
            if !methods.is_empty() {
                paths.insert(path.clone(), Value::Object(methods));
            }
        }
        json!({
            "openapi": "3.0.3",
            "info": {
                "title": self.info.title,
                "version": self.info.version,
                "description": self.info.description,
            },
            "paths": paths,
        })
    }
}

fn operation_to_json(op: &Operation) -> Value {
    let params: Vec<Value> = op
        .params
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "in": p.location.as_str(),
                "description": p.description,
                "required": p.required,
            })
        })
        .collect();
    json!({
        "summary": op.summary,
        "description": op.description,
        "deprecated": op.deprecated,
        "parameters": params,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn renders_registered_path() {
        let mut builder = OpenApiBuilder::new(Info { title: "demo".into(), version: "1.0".into(), description: String::new() });
        let handle = builder.add_path("/items/{id}");
        builder.get(
            &handle,
            "fetch item",
            "",
            vec![Parameter { name: "id".into(), location: ParamLocation::Path, description: "item id".into(), required: true }],
        );
        let doc = builder.generate();
        assert_eq!(doc["paths"]["/items/{id}"]["get"]["summary"], "fetch item");
    }
}
