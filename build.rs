fn main() {
    let protoc = protoc_bin_vendored::protoc_bin_path().expect("protoc not found");
    // SAFETY: build scripts are single threaded.
    unsafe {
        std::env::set_var("PROTOC", protoc);
    }
    let includes = &["proto"];

    // Server stubs are only used by the in-process peer in the tests.
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/mesh.proto"], includes)
        .expect("failed to compile mesh.proto");

    println!("cargo:rerun-if-changed=proto/mesh.proto");
}
