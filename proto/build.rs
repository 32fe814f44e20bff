extern crate protoc_grpcio;

use std::path::Path;

fn main() {
    let protos = [
        ("p4runtime/proto", "p4/v1/p4runtime.proto"),
        ("p4runtime/proto", "p4/v1/p4data.proto"),
        ("p4runtime/proto", "p4/config/v1/p4info.proto"),
        ("p4runtime/proto", "p4/config/v1/p4types.proto"),
        ("googleapis", "google/rpc/status.proto"),
        ("googleapis", "google/rpc/code.proto"),
    ];
    for proto in &protos {
        println!("cargo:rerun-if-changed={}/{}", proto.0, proto.1);
    }

    // Generated modules land next to the hand-written `mod.rs`.
    let out_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    protoc_grpcio::compile_grpc_protos(
        &protos.iter().map(|x| x.1).collect::<Vec<&str>>(),
        &protos.iter().map(|x| x.0).collect::<Vec<&str>>(),
        &out_dir,
        None,
    )
    .expect("Failed to compile gRPC definitions!");
}
