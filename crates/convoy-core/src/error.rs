//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Reserved label '{label}' has been manually set on {name}")]
    ReservedLabel { label: String, name: String },

    #[error("Required label '{label}' must be manually set on {name}")]
    MissingLabel { label: String, name: String },

    #[error("Required selector '{label}' must be manually set on {name}")]
    MissingSelector { label: String, name: String },

    #[error("The {label}={label_value} label does not match selector {label}={selector_value} on {name}")]
    SelectorMismatch {
        label: String,
        label_value: String,
        selector_value: String,
        name: String,
    },

    #[error("Invalid strategy provided: {0}")]
    InvalidStrategy(String),

    #[error("Invalid cluster config {path}: {message}")]
    InvalidClusterConfig { path: String, message: String },

    #[error("Invalid manifest {path}: {message}")]
    InvalidManifest { path: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Glob pattern error: {message}")]
    GlobPattern { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
