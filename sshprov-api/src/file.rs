//! The File resource kind: a file at a path on a remote host.

use serde::{Deserialize, Serialize};

use crate::managed::ResourceKind;

/// Configurable fields of a File.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileParameters {
    /// Absolute path of the file on the remote host.
    pub file: String,
}

/// Observable fields of a File.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileObservation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

#[derive(Debug, Clone, Copy)]
pub struct File;

impl ResourceKind for File {
    const KIND: &'static str = "File";
    type Parameters = FileParameters;
    type Observation = FileObservation;
}
