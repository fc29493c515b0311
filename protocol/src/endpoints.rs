use {
    crate::{
        ChangeEvent, DateTimeUtc, FileEntry, ObserverId, Password, Permissions, RelativePath,
        UserInfo,
    },
    serde::{Deserialize, Serialize},
};

pub trait RequestToResponse {
    type Response;
    const PATH: &'static str;
}
macro_rules! response_type {
    ($request:ty, $response:ty, $version:literal) => {
        impl RequestToResponse for $request {
            type Response = $response;
            const PATH: &'static str = concat!("/api/", $version, "/", stringify!($request));
        }
    };
}

pub trait RequestToStreamingResponse {
    type ResponseItem;
    const PATH: &'static str;
}
macro_rules! streaming_response_type {
    ($request:ty, $response:ty, $version:literal) => {
        impl RequestToStreamingResponse for $request {
            type ResponseItem = $response;
            const PATH: &'static str = concat!("/api/", $version, "/", stringify!($request));
        }
    };
}

/// Requests that carry a file body instead of a bincode body.
/// They are addressed as `CONTENT_PATH` followed by the encoded request.
pub trait ContentRequest {
    const CONTENT_PATH: &'static str = "/api/v1/content/";
}

/// Client-supplied `/`-separated path relative to the user's home.
///
/// It's kept as a plain string on the wire: the server normalizes it and
/// rejects anything that leaves the home directory.
pub type RequestPath = String;

pub type Response<Request> = <Request as RequestToResponse>::Response;
pub type StreamingResponseItem<Request> = <Request as RequestToStreamingResponse>::ResponseItem;

/// Stores the request body at `path` (`PUT`).
///
/// Fails with `Conflict` if the path exists and `overwrite` is false,
/// or if the path is an existing directory.
/// Missing parent directories are created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFile {
    pub path: RequestPath,
    pub modified_at: Option<DateTimeUtc>,
    pub overwrite: bool,
    /// Observer registered by the uploading client, so that it can
    /// recognize its own changes.
    pub origin: Option<ObserverId>,
}
impl ContentRequest for UploadFile {}

/// Returns the content of a file (`GET`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadFile {
    pub path: RequestPath,
}
impl ContentRequest for DownloadFile {}

/// Removes a file or a directory with everything inside.
#[derive(Debug, Serialize, Deserialize)]
pub struct RemovePath {
    pub path: RequestPath,
    pub origin: Option<ObserverId>,
}
response_type!(RemovePath, (), "v1");

/// Creates a directory and its missing parents. Succeeds if it already exists.
#[derive(Debug, Serialize, Deserialize)]
pub struct MakeDirectory {
    pub path: RequestPath,
    pub origin: Option<ObserverId>,
}
response_type!(MakeDirectory, (), "v1");

/// Lists the content of a directory. Entry paths are relative to `path`.
/// Only direct children are returned unless `recursive` is set.
/// Results are ordered by path within each directory.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListDirectory {
    pub path: RequestPath,
    pub recursive: bool,
}
streaming_response_type!(ListDirectory, FileEntry, "v1");

/// Returns metadata of a single path. The entry path is relative to the user's home.
#[derive(Debug, Serialize, Deserialize)]
pub struct Stat {
    pub path: RequestPath,
}
response_type!(Stat, FileEntry, "v1");

#[derive(Debug, Serialize, Deserialize)]
pub struct GetServerTime;
response_type!(GetServerTime, DateTimeUtc, "v1");

/// Starts recording changes under `path`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListenChanges {
    pub path: RequestPath,
}
response_type!(ListenChanges, ObserverId, "v1");

/// Returns changes recorded since the previous poll, waiting for
/// the server's poll timeout if there are none yet.
#[derive(Debug, Serialize, Deserialize)]
pub struct PollChanges {
    pub id: ObserverId,
}
response_type!(PollChanges, Vec<ChangeEvent>, "v1");

#[derive(Debug, Serialize, Deserialize)]
pub struct GetUsers;
response_type!(GetUsers, Vec<UserInfo>, "v1");

/// Creates or updates a user. `password: None` keeps the current password.
#[derive(Debug, Serialize, Deserialize)]
pub struct SaveUser {
    pub login: String,
    pub home: RelativePath,
    pub permissions: Permissions,
    pub password: Option<Password>,
}
response_type!(SaveUser, (), "v1");

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteUser {
    pub login: String,
}
response_type!(DeleteUser, (), "v1");

#[derive(Debug, Serialize, Deserialize)]
pub struct WhoAmI;
response_type!(WhoAmI, UserInfo, "v1");
