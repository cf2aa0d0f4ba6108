use crate::assets::AssetError;

#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("Invalid stack name {name:?}\nMust only consist of alphanumeric characters and hyphens, Must start with an alphabetical character, and cannot be longer than 128 characters.")]
    InvalidStackName { name: String },

    #[error("{0}")]
    InvalidRegion(String),

    #[error("Invalid construct id {id:?} under {parent}\nMust be non-empty and cannot contain '/'")]
    InvalidId { parent: String, id: String },

    #[error("Construct #{index} does not belong to this stack")]
    UnknownNode { index: usize },

    #[error("There is already a construct with id {id:?} in {parent}")]
    DuplicateId { parent: String, id: String },

    #[error("Construct {path} does not hold a resource of the requested type")]
    ResourceMismatch { path: String },

    #[error("Validation failed on resource '{logical_id}'\n{message}")]
    Validation { logical_id: String, message: String },

    #[error("Logical id {logical_id} is produced by both {first} and {second}")]
    DuplicateLogicalId { logical_id: String, first: String, second: String },

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error("Failed to serialize template\n{0}")]
    Serialize(#[from] serde_json::Error),
}
