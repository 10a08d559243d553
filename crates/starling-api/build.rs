fn main() {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());
    }
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR").unwrap());
    tonic_build::configure()
        .file_descriptor_set_path(out_dir.join("cluster_descriptor.bin"))
        .compile_protos(&["proto/cluster.proto"], &["proto/"])
        .expect("failed to compile proto/cluster.proto");
}
