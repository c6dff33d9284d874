use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use tonic::{Code, Status};

/// The outcome of a call that reached the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(serialize_with = "serialize_code")]
    pub status: Code,
    /// The decoded reply, present when `status` is `Ok`.
    pub message: Option<serde_json::Value>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub trailers: BTreeMap<String, Vec<String>>,
    /// The server's status, present when `status` isn't `Ok`.
    pub error: Option<StatusError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusError {
    pub code: i32,
    pub message: String,
}

impl Response {
    /// A reply whose call ended with a non-OK status. The status metadata is reported as
    /// trailers.
    pub(crate) fn from_status(status: &Status) -> Self {
        Self {
            status: status.code(),
            message: None,
            headers: BTreeMap::new(),
            trailers: crate::grpc::metadata_to_map(status.metadata()),
            error: Some(StatusError {
                code: status.code() as i32,
                message: status.message().to_string(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Code::Ok
    }
}

fn serialize_code<S: Serializer>(code: &Code, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i32(*code as i32)
}
