mod response;

pub use response::{
    BoolResponse, CollectionDescription, IdResponse, PartitionDescription, Status,
    StringListResponse, TsoResponse,
};
