//! A declarative service-execution engine.
//!
//! A service is declared once, as a [`Declaration`]: a set of bound names,
//! loaders, callbacks and rule lists keyed by dotted path, optionally
//! composed from other declarations ("traits"). It is then run many times,
//! each run a fresh [`Service`] instance seeded with its own inputs.
//!
//! The resolver walks every input, every declared loader and every ruled key
//! to a fixed point: loaders populate data on demand (at most once per
//! instance), rule lists validate the data reached by their own dotted key
//! against a pluggable [`RuleValidator`] (JSON Schema draft 2020-12 by
//! default), and callbacks fire once their dependencies and the key they are
//! attached to have both validated. A loader may itself return a child
//! service descriptor, composing a tree of services whose errors fold back
//! into their parent under the loader's key.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use declarative_service::{DeclarationBuilder, Response, Service};
//! use serde_json::{json, Map};
//!
//! let declaration = DeclarationBuilder::new("Greeting")
//!     .rule("result", json!({"required": ["name"]}))
//!     .build()
//!     .unwrap();
//!
//! let mut inputs = Map::new();
//! inputs.insert("result".to_string(), json!({"name": "Ada"}));
//!
//! let mut service = Service::new(declaration, inputs, BTreeMap::new()).unwrap();
//! match service.run().unwrap() {
//!     Response::Result(value) => assert_eq!(value, json!({"name": "Ada"})),
//!     Response::Errors(_) => unreachable!(),
//! }
//! ```
mod callbacks;
mod declaration;
mod error;
mod names;
mod options;
mod path;
mod response;
mod rules;
mod service;
mod validator;
mod value;

pub use declaration::{Callback, CallbackFn, Declaration, DeclarationBuilder, Loader, LoaderFn, RuleListBucket};
pub use error::EngineError;
pub use options::EngineOptions;
pub use response::Response;
pub use service::Service;
pub use validator::{default_messages, JsonSchemaRuleValidator, RuleValidator};
pub use value::{ChildSpec, LoaderOutput};
