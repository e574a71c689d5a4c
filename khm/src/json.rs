//! JSON dump of a model, for inspecting files by eye and diffing exports.

use crate::{Error, Model, Result};

impl Model {
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Json {
            message: e.to_string(),
        })
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Json {
            message: e.to_string(),
        })
    }
}
