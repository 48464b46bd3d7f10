//! Generated protobuf message and gRPC client/server stubs for the
//! LakeSoul metadata service (see `proto/lakesoul_metadata.proto`).

tonic::include_proto!("lakesoul.metadata");
